/// SQL DDL for the palaver store.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL DEFAULT 'direct',
    title TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_members (
    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
    participant_role TEXT NOT NULL,
    participant_id INTEGER NOT NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (conversation_id, participant_role, participant_id)
);

CREATE TABLE IF NOT EXISTS participants (
    participant_role TEXT NOT NULL,
    participant_id INTEGER NOT NULL,
    display_name TEXT NOT NULL,
    PRIMARY KEY (participant_role, participant_id)
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
    sender_role TEXT NOT NULL,
    sender_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    reply_to_id INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS presence (
    participant_role TEXT NOT NULL,
    participant_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    last_active_at TEXT NOT NULL,
    PRIMARY KEY (participant_role, participant_id)
);

CREATE TABLE IF NOT EXISTS typing_indicators (
    conversation_id INTEGER NOT NULL,
    participant_role TEXT NOT NULL,
    participant_id INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    PRIMARY KEY (conversation_id, participant_role, participant_id)
);

CREATE INDEX IF NOT EXISTS idx_members_identity
    ON conversation_members(participant_role, participant_id);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
CREATE INDEX IF NOT EXISTS idx_typing_started ON typing_indicators(started_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
