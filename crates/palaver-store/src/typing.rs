use chrono::{Duration, Utc};
use tracing::instrument;

use palaver_core::identity::ParticipantIdentity;
use palaver_core::ids::ConversationId;

use crate::database::Database;
use crate::error::StoreError;

/// Ephemeral typing rows, keyed by (conversation, identity). Written and
/// deleted as fire-and-forget side effects of typing events; the expiry
/// sweep handles clients that vanish without a typing_stop.
pub struct TypingRepo {
    db: Database,
}

impl TypingRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id, identity = %identity))]
    pub fn set(
        &self,
        conversation_id: ConversationId,
        identity: &ParticipantIdentity,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO typing_indicators
                     (conversation_id, participant_role, participant_id, started_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (conversation_id, participant_role, participant_id)
                 DO UPDATE SET started_at = excluded.started_at",
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

    #[instrument(skip(self), fields(conversation_id = %conversation_id, identity = %identity))]
    pub fn clear(
        &self,
        conversation_id: ConversationId,
        identity: &ParticipantIdentity,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM typing_indicators
                 WHERE conversation_id = ?1 AND participant_role = ?2 AND participant_id = ?3",
                rusqlite::params![conversation_id.as_i64(), identity.role.as_str(), identity.id],
            )?;
            Ok(())
        })
    }

    /// Delete rows older than the ttl. Returns how many were removed.
    #[instrument(skip(self))]
    pub fn sweep_expired(&self, ttl: Duration) -> Result<usize, StoreError> {
        let cutoff = (Utc::now() - ttl).to_rfc3339();
        self.db.with_conn(|conn| {
            let removed =
                conn.execute("DELETE FROM typing_indicators WHERE started_at < ?1", [&cutoff])?;
            Ok(removed)
        })
    }

    #[cfg(test)]
    fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM typing_indicators", [], |row| row.get(0))
                .map_err(StoreError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::identity::ParticipantRole;

    fn admin(id: i64) -> ParticipantIdentity {
        ParticipantIdentity::new(ParticipantRole::Admin, id)
    }

    #[test]
    fn set_then_clear() {
        let repo = TypingRepo::new(Database::in_memory().unwrap());
        let conv = ConversationId::from_raw(5);
        repo.set(conv, &admin(1)).unwrap();
        assert_eq!(repo.count().unwrap(), 1);

        repo.clear(conv, &admin(1)).unwrap();
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn set_is_upsert() {
        let repo = TypingRepo::new(Database::in_memory().unwrap());
        let conv = ConversationId::from_raw(5);
        repo.set(conv, &admin(1)).unwrap();
        repo.set(conv, &admin(1)).unwrap();
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn clear_missing_row_is_fine() {
        let repo = TypingRepo::new(Database::in_memory().unwrap());
        repo.clear(ConversationId::from_raw(5), &admin(1)).unwrap();
    }

    #[test]
    fn sweep_removes_only_expired() {
        let repo = TypingRepo::new(Database::in_memory().unwrap());
        repo.set(ConversationId::from_raw(5), &admin(1)).unwrap();

        assert_eq!(repo.sweep_expired(Duration::seconds(60)).unwrap(), 0);
        assert_eq!(repo.count().unwrap(), 1);

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(repo.sweep_expired(Duration::zero()).unwrap(), 1);
        assert_eq!(repo.count().unwrap(), 0);
    }
}
