use tracing::instrument;

use palaver_core::identity::ParticipantIdentity;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Display-name lookups. Profile rows are owned by the HTTP layer; the
/// relay only reads them when stamping `sender_name` onto a broadcast.
pub struct ParticipantRepo {
    db: Database,
}

impl ParticipantRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(identity = %identity))]
    pub fn upsert(
        &self,
        identity: &ParticipantIdentity,
        display_name: &str,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO participants (participant_role, participant_id, display_name)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (participant_role, participant_id)
                 DO UPDATE SET display_name = excluded.display_name",
                rusqlite::params![identity.role.as_str(), identity.id, display_name],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(identity = %identity))]
    pub fn display_name(
        &self,
        identity: &ParticipantIdentity,
    ) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT display_name FROM participants
                 WHERE participant_role = ?1 AND participant_id = ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![identity.role.as_str(), identity.id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_helpers::get(row, 0, "participants", "display_name")?)),
                None => Ok(None),
            }
        })
    }
}
