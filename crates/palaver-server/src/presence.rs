use std::sync::Arc;

use chrono::Utc;

use palaver_core::events::ServerEvent;
use palaver_core::identity::ParticipantIdentity;
use palaver_core::presence::PresenceStatus;
use palaver_store::StoreGateway;

/// Presence transitions. Writes through the gateway are best-effort:
/// a store failure is logged and the status_change event is still
/// produced, so live peers see the transition even when the persisted
/// row lags.
pub struct PresenceTracker {
    gateway: Arc<dyn StoreGateway>,
}

impl PresenceTracker {
    pub fn new(gateway: Arc<dyn StoreGateway>) -> Self {
        Self { gateway }
    }

    pub fn went_online(&self, identity: &ParticipantIdentity) -> ServerEvent {
        self.set(identity, PresenceStatus::Online)
    }

    pub fn went_offline(&self, identity: &ParticipantIdentity) -> ServerEvent {
        self.set(identity, PresenceStatus::Offline)
    }

    fn set(&self, identity: &ParticipantIdentity, status: PresenceStatus) -> ServerEvent {
        if let Err(err) = self.gateway.set_presence(identity, status) {
            tracing::warn!(identity = %identity, %status, error = %err, "Presence write failed");
        }
        status_event(identity, status)
    }

    /// Refresh last-activity on inbound traffic.
    pub fn touch(&self, identity: &ParticipantIdentity) {
        if let Err(err) = self.gateway.touch_presence(identity) {
            tracing::warn!(identity = %identity, error = %err, "Presence touch failed");
        }
    }
}

/// Build the status_change broadcast for a transition.
pub fn status_event(identity: &ParticipantIdentity, status: PresenceStatus) -> ServerEvent {
    ServerEvent::StatusChange {
        user_id: identity.key(),
        participant_type: identity.role,
        participant_id: identity.id,
        status,
        timestamp: Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::identity::ParticipantRole;
    use palaver_store::{Database, SqliteGateway};

    fn tracker() -> (PresenceTracker, Arc<SqliteGateway>) {
        let gateway = Arc::new(SqliteGateway::new(Database::in_memory().unwrap()));
        (PresenceTracker::new(gateway.clone()), gateway)
    }

    fn mentor(id: i64) -> ParticipantIdentity {
        ParticipantIdentity::new(ParticipantRole::Mentor, id)
    }

    #[test]
    fn online_transition_persists_and_reports() {
        let (tracker, _gateway) = tracker();
        let event = tracker.went_online(&mentor(3));
        match event {
            ServerEvent::StatusChange { user_id, status, participant_id, .. } => {
                assert_eq!(user_id, "mentor_3");
                assert_eq!(participant_id, 3);
                assert_eq!(status, PresenceStatus::Online);
            }
            other => panic!("expected status_change, got {other:?}"),
        }
    }

    #[test]
    fn offline_transition_reports_offline() {
        let (tracker, _gateway) = tracker();
        tracker.went_online(&mentor(3));
        let event = tracker.went_offline(&mentor(3));
        assert!(matches!(
            event,
            ServerEvent::StatusChange { status: PresenceStatus::Offline, .. }
        ));
    }

    #[test]
    fn touch_without_presence_row_is_quiet() {
        let (tracker, _gateway) = tracker();
        tracker.touch(&mentor(404));
    }
}
