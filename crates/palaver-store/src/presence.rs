use chrono::{Duration, Utc};
use tracing::instrument;

use palaver_core::identity::{ParticipantIdentity, ParticipantRole};
use palaver_core::presence::PresenceStatus;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug)]
pub struct PresenceRow {
    pub identity: ParticipantIdentity,
    pub status: PresenceStatus,
    pub last_active_at: String,
}

pub struct PresenceRepo {
    db: Database,
}

impl PresenceRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert the presence row. Idempotent; also refreshes the
    /// last-activity timestamp.
    #[instrument(skip(self), fields(identity = %identity, status = %status))]
    pub fn set(
        &self,
        identity: &ParticipantIdentity,
        status: PresenceStatus,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO presence (participant_role, participant_id, status, last_active_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (participant_role, participant_id)
                 DO UPDATE SET status = excluded.status, last_active_at = excluded.last_active_at",
                rusqlite::params![identity.role.as_str(), identity.id, status.as_str(), now],
            )?;
            Ok(())
        })
    }

    /// Refresh last-activity without touching the status. No-op for
    /// identities with no presence row.
    #[instrument(skip(self), fields(identity = %identity))]
    pub fn touch(&self, identity: &ParticipantIdentity) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE presence SET last_active_at = ?1
                 WHERE participant_role = ?2 AND participant_id = ?3",
                rusqlite::params![now, identity.role.as_str(), identity.id],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(identity = %identity))]
    pub fn get(&self, identity: &ParticipantIdentity) -> Result<Option<PresenceRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status, last_active_at FROM presence
                 WHERE participant_role = ?1 AND participant_id = ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![identity.role.as_str(), identity.id])?;
            match rows.next()? {
                Some(row) => {
                    let status: String = row_helpers::get(row, 0, "presence", "status")?;
                    Ok(Some(PresenceRow {
                        identity: *identity,
                        status: row_helpers::parse_enum(&status, "presence", "status")?,
                        last_active_at: row_helpers::get(row, 1, "presence", "last_active_at")?,
                    }))
                }
                None => Ok(None),
            }
        })
    }

    /// Demote `online` rows whose last activity is older than the
    /// threshold to `away`, returning the identities that changed.
    #[instrument(skip(self))]
    pub fn demote_stale(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<ParticipantIdentity>, StoreError> {
        let cutoff = (Utc::now() - stale_after).to_rfc3339();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT participant_role, participant_id FROM presence
                 WHERE status = 'online' AND last_active_at < ?1",
            )?;
            let mut rows = stmt.query([&cutoff])?;
            let mut stale = Vec::new();
            while let Some(row) = rows.next()? {
                let role: String = row_helpers::get(row, 0, "presence", "participant_role")?;
                let role: ParticipantRole =
                    row_helpers::parse_enum(&role, "presence", "participant_role")?;
                let id: i64 = row_helpers::get(row, 1, "presence", "participant_id")?;
                stale.push(ParticipantIdentity::new(role, id));
            }

            conn.execute(
                "UPDATE presence SET status = 'away'
                 WHERE status = 'online' AND last_active_at < ?1",
                [&cutoff],
            )?;
            Ok(stale)
        })
    }
}
