use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use palaver_core::identity::{ParticipantIdentity, ParticipantRole};
use palaver_core::ids::ConversationId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Conversation shape: two parties, or a named group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl std::fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Group => write!(f, "group"),
        }
    }
}

impl std::str::FromStr for ConversationKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown conversation kind: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub created_at: String,
}

/// Conversation and membership queries. Creation and membership writes
/// belong to the HTTP layer; they live here because both layers share the
/// store, and the relay's tests need to seed them.
pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn create(
        &self,
        kind: ConversationKind,
        title: Option<&str>,
    ) -> Result<ConversationRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (kind, title, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![kind.to_string(), title, now],
            )?;
            Ok(ConversationRow {
                id: ConversationId::from_raw(conn.last_insert_rowid()),
                kind,
                title: title.map(str::to_owned),
                created_at: now.clone(),
            })
        })
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id, identity = %identity))]
    pub fn add_member(
        &self,
        conversation_id: ConversationId,
        identity: &ParticipantIdentity,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversation_members
                     (conversation_id, participant_role, participant_id, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    conversation_id.as_i64(),
                    identity.role.as_str(),
                    identity.id,
                    now
                ],
            )?;
            Ok(())
        })
    }

    /// Every conversation the identity is a member of. One query per
    /// connection, at authentication.
    #[instrument(skip(self), fields(identity = %identity))]
    pub fn ids_for(
        &self,
        identity: &ParticipantIdentity,
    ) -> Result<Vec<ConversationId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id FROM conversation_members
                 WHERE participant_role = ?1 AND participant_id = ?2
                 ORDER BY conversation_id",
            )?;
            let mut rows = stmt.query(rusqlite::params![identity.role.as_str(), identity.id])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                ids.push(ConversationId::from_raw(row_helpers::get(
                    row,
                    0,
                    "conversation_members",
                    "conversation_id",
                )?));
            }
            Ok(ids)
        })
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ParticipantIdentity>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT participant_role, participant_id FROM conversation_members
                 WHERE conversation_id = ?1
                 ORDER BY participant_role, participant_id",
            )?;
            let mut rows = stmt.query([conversation_id.as_i64()])?;
            let mut members = Vec::new();
            while let Some(row) = rows.next()? {
                let role: String = row_helpers::get(row, 0, "conversation_members", "participant_role")?;
                let role: ParticipantRole =
                    row_helpers::parse_enum(&role, "conversation_members", "participant_role")?;
                let id: i64 = row_helpers::get(row, 1, "conversation_members", "participant_id")?;
                members.push(ParticipantIdentity::new(role, id));
            }
            Ok(members)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64) -> ParticipantIdentity {
        ParticipantIdentity::new(ParticipantRole::User, id)
    }

    fn mentor(id: i64) -> ParticipantIdentity {
        ParticipantIdentity::new(ParticipantRole::Mentor, id)
    }

    #[test]
    fn create_conversation() {
        let repo = ConversationRepo::new(Database::in_memory().unwrap());
        let conv = repo.create(ConversationKind::Group, Some("standup")).unwrap();
        assert_eq!(conv.kind, ConversationKind::Group);
        assert_eq!(conv.title.as_deref(), Some("standup"));
    }

    #[test]
    fn conversation_ids_are_monotonic() {
        let repo = ConversationRepo::new(Database::in_memory().unwrap());
        let a = repo.create(ConversationKind::Direct, None).unwrap();
        let b = repo.create(ConversationKind::Direct, None).unwrap();
        assert!(a.id < b.id);
    }

    #[test]
    fn membership_round_trip() {
        let repo = ConversationRepo::new(Database::in_memory().unwrap());
        let conv = repo.create(ConversationKind::Direct, None).unwrap();
        repo.add_member(conv.id, &user(7)).unwrap();
        repo.add_member(conv.id, &mentor(3)).unwrap();

        let members = repo.members(conv.id).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains(&user(7)));
        assert!(members.contains(&mentor(3)));

        assert_eq!(repo.ids_for(&user(7)).unwrap(), vec![conv.id]);
        assert!(repo.ids_for(&user(999)).unwrap().is_empty());
    }

    #[test]
    fn add_member_is_idempotent() {
        let repo = ConversationRepo::new(Database::in_memory().unwrap());
        let conv = repo.create(ConversationKind::Direct, None).unwrap();
        repo.add_member(conv.id, &user(7)).unwrap();
        repo.add_member(conv.id, &user(7)).unwrap();
        assert_eq!(repo.members(conv.id).unwrap().len(), 1);
    }

    #[test]
    fn same_numeric_id_different_roles_are_distinct_members() {
        let repo = ConversationRepo::new(Database::in_memory().unwrap());
        let conv = repo.create(ConversationKind::Group, None).unwrap();
        repo.add_member(conv.id, &user(1)).unwrap();
        repo.add_member(conv.id, &ParticipantIdentity::new(ParticipantRole::Admin, 1))
            .unwrap();
        assert_eq!(repo.members(conv.id).unwrap().len(), 2);
    }
}
