use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use palaver_core::identity::ParticipantIdentity;
use palaver_core::ids::ConversationId;

/// In-memory index from conversation to the identities currently
/// connected and interested. Derived state: empty after restart, rebuilt
/// as connections re-authenticate. Broadcast callers take a snapshot of
/// the subscriber set and release the lock before any I/O.
pub struct SubscriptionRegistry {
    inner: RwLock<HashMap<ConversationId, HashSet<ParticipantIdentity>>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }

    /// Add the identity to one conversation's subscriber set.
    pub fn subscribe(&self, identity: ParticipantIdentity, conversation_id: ConversationId) {
        self.inner.write().entry(conversation_id).or_default().insert(identity);
    }

    /// Add the identity to every listed conversation, in one lock pass.
    /// Used at auth time with the membership list from the store.
    pub fn subscribe_all(&self, identity: ParticipantIdentity, conversations: &[ConversationId]) {
        let mut inner = self.inner.write();
        for &conversation_id in conversations {
            inner.entry(conversation_id).or_default().insert(identity);
        }
    }

    /// Remove the identity from every conversation it appears in,
    /// dropping entries left empty. Returns the conversations it was
    /// subscribed to.
    pub fn unsubscribe_all(&self, identity: &ParticipantIdentity) -> Vec<ConversationId> {
        let mut inner = self.inner.write();
        let mut removed = Vec::new();
        inner.retain(|&conversation_id, subscribers| {
            if subscribers.remove(identity) {
                removed.push(conversation_id);
            }
            !subscribers.is_empty()
        });
        removed
    }

    /// Snapshot of one conversation's subscribers.
    pub fn subscribers_of(&self, conversation_id: ConversationId) -> Vec<ParticipantIdentity> {
        self.inner
            .read()
            .get(&conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn is_subscribed(
        &self,
        identity: &ParticipantIdentity,
        conversation_id: ConversationId,
    ) -> bool {
        self.inner
            .read()
            .get(&conversation_id)
            .is_some_and(|set| set.contains(identity))
    }

    /// Everyone sharing at least one conversation with the identity,
    /// deduplicated, excluding the identity itself. Recipient set for
    /// `status_change` broadcasts.
    pub fn peers_of(&self, identity: &ParticipantIdentity) -> Vec<ParticipantIdentity> {
        let inner = self.inner.read();
        let mut peers = HashSet::new();
        for subscribers in inner.values() {
            if subscribers.contains(identity) {
                peers.extend(subscribers.iter().copied());
            }
        }
        peers.remove(identity);
        peers.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::identity::ParticipantRole;

    fn user(id: i64) -> ParticipantIdentity {
        ParticipantIdentity::new(ParticipantRole::User, id)
    }

    fn conv(id: i64) -> ConversationId {
        ConversationId::from_raw(id)
    }

    #[test]
    fn subscribe_and_lookup() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(user(7), conv(42));
        assert_eq!(registry.subscribers_of(conv(42)), vec![user(7)]);
        assert!(registry.is_subscribed(&user(7), conv(42)));
        assert!(!registry.is_subscribed(&user(7), conv(43)));
    }

    #[test]
    fn subscribe_all_covers_each_conversation() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe_all(user(7), &[conv(1), conv(2)]);
        assert_eq!(registry.subscribers_of(conv(1)), vec![user(7)]);
        assert_eq!(registry.subscribers_of(conv(2)), vec![user(7)]);
    }

    #[test]
    fn identical_roles_distinct_ids_coexist() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(user(7), conv(42));
        registry.subscribe(user(9), conv(42));
        assert_eq!(registry.subscribers_of(conv(42)).len(), 2);
    }

    #[test]
    fn unsubscribe_all_prunes_and_reports() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe_all(user(7), &[conv(1), conv(2)]);
        registry.subscribe(user(9), conv(1));

        let mut removed = registry.unsubscribe_all(&user(7));
        removed.sort();
        assert_eq!(removed, vec![conv(1), conv(2)]);

        // conv(2) had only user_7 and must be gone entirely.
        assert!(registry.subscribers_of(conv(2)).is_empty());
        assert_eq!(registry.subscribers_of(conv(1)), vec![user(9)]);
    }

    #[test]
    fn unsubscribe_unknown_identity_is_empty() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.unsubscribe_all(&user(404)).is_empty());
    }

    #[test]
    fn peers_deduplicate_across_shared_conversations() {
        let registry = SubscriptionRegistry::new();
        // user_9 shares two conversations with user_7 but is one peer.
        registry.subscribe_all(user(7), &[conv(1), conv(2)]);
        registry.subscribe_all(user(9), &[conv(1), conv(2)]);
        registry.subscribe(user(11), conv(2));
        registry.subscribe(user(12), conv(3));

        let mut peers = registry.peers_of(&user(7));
        peers.sort_by_key(|p| p.id);
        assert_eq!(peers, vec![user(9), user(11)]);
    }
}
