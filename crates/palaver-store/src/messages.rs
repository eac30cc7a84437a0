use chrono::Utc;
use tracing::instrument;

use palaver_core::identity::ParticipantIdentity;
use palaver_core::ids::{ConversationId, MessageId};

use crate::database::Database;
use crate::error::StoreError;

/// A persisted message with its store-assigned id. The id is
/// monotonically increasing; the relay broadcasts only ids that exist in
/// the store (write-then-broadcast).
#[derive(Clone, Debug)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: ParticipantIdentity,
    pub content: String,
    pub reply_to_id: Option<MessageId>,
    pub created_at: String,
}

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a message and return the stored row. Fails on unknown
    /// conversation (foreign key) or connectivity loss; the caller must
    /// not broadcast on failure.
    #[instrument(skip(self, content), fields(conversation_id = %conversation_id, sender = %sender))]
    pub fn insert(
        &self,
        conversation_id: ConversationId,
        sender: &ParticipantIdentity,
        content: &str,
        reply_to_id: Option<MessageId>,
    ) -> Result<MessageRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, sender_role, sender_id, content, reply_to_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    conversation_id.as_i64(),
                    sender.role.as_str(),
                    sender.id,
                    content,
                    reply_to_id.map(MessageId::as_i64),
                    now
                ],
            )?;
            Ok(MessageRow {
                id: MessageId::from_raw(conn.last_insert_rowid()),
                conversation_id,
                sender: *sender,
                content: content.to_owned(),
                reply_to_id,
                created_at: now.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::{ConversationKind, ConversationRepo};
    use palaver_core::identity::ParticipantRole;

    fn setup() -> (Database, ConversationId) {
        let db = Database::in_memory().unwrap();
        let conv = ConversationRepo::new(db.clone())
            .create(ConversationKind::Direct, None)
            .unwrap();
        (db, conv.id)
    }

    fn user(id: i64) -> ParticipantIdentity {
        ParticipantIdentity::new(ParticipantRole::User, id)
    }

    #[test]
    fn insert_assigns_monotonic_ids() {
        let (db, conv) = setup();
        let repo = MessageRepo::new(db);
        let m1 = repo.insert(conv, &user(7), "first", None).unwrap();
        let m2 = repo.insert(conv, &user(7), "second", None).unwrap();
        assert!(m1.id < m2.id);
    }

    #[test]
    fn insert_preserves_reply_to() {
        let (db, conv) = setup();
        let repo = MessageRepo::new(db);
        let m1 = repo.insert(conv, &user(7), "first", None).unwrap();
        let m2 = repo.insert(conv, &user(7), "reply", Some(m1.id)).unwrap();
        assert_eq!(m2.reply_to_id, Some(m1.id));
    }

    #[test]
    fn insert_into_unknown_conversation_fails() {
        let (db, _) = setup();
        let repo = MessageRepo::new(db);
        let result = repo.insert(ConversationId::from_raw(9999), &user(7), "lost", None);
        assert!(matches!(result, Err(StoreError::Database(_))));
    }
}
