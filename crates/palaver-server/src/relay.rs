//! The per-connection protocol state machine: Unauthenticated →
//! Authenticated → Closed. Validates inbound events, persists through the
//! gateway, and fans out to live subscribers. Handlers run to completion
//! per event on a given connection; different connections interleave
//! freely.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use palaver_core::errors::RelayError;
use palaver_core::events::{
    AuthPayload, ClientEvent, EventParseError, MessagePayload, ServerEvent, SubscribePayload,
    TypingPayload,
};
use palaver_core::identity::ParticipantIdentity;
use palaver_core::ids::ConnectionId;
use palaver_core::presence::PresenceStatus;
use palaver_store::StoreGateway;

use crate::connection::{ConnectionRegistry, OutboundFrame};
use crate::presence::{self, PresenceTracker};
use crate::subscriptions::SubscriptionRegistry;

/// Per-connection state owned by the connection's reader task. Everything
/// shared lives in the registries.
#[derive(Debug, Default)]
pub struct ConnState {
    pub identity: Option<ParticipantIdentity>,
}

/// Shared relay context, constructed once at startup and captured by
/// every connection handler.
pub struct Relay {
    gateway: Arc<dyn StoreGateway>,
    connections: Arc<ConnectionRegistry>,
    subscriptions: SubscriptionRegistry,
    presence: PresenceTracker,
    identity_locks: DashMap<ParticipantIdentity, Arc<Mutex<()>>>,
}

impl Relay {
    pub fn new(gateway: Arc<dyn StoreGateway>, connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            presence: PresenceTracker::new(gateway.clone()),
            subscriptions: SubscriptionRegistry::new(),
            gateway,
            connections,
            identity_locks: DashMap::new(),
        }
    }

    /// One mutex per identity, serializing auth setup against disconnect
    /// teardown for that identity. Without it, a closing connection that
    /// has already passed `unbind_if_current` could wipe the bindings,
    /// subscriptions, and presence a concurrent reconnect just created.
    fn identity_lock(&self, identity: &ParticipantIdentity) -> Arc<Mutex<()>> {
        self.identity_locks.entry(*identity).or_default().value().clone()
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn gateway(&self) -> &Arc<dyn StoreGateway> {
        &self.gateway
    }

    /// Handle one inbound text frame. A failure here answers the
    /// offending connection and never escapes to any other connection.
    pub fn handle_frame(&self, conn_id: &ConnectionId, state: &mut ConnState, raw: &str) {
        let event = match ClientEvent::parse(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(connection_id = %conn_id, error = %err, "Rejected inbound frame");
                let message = match err {
                    EventParseError::UnknownType(_) => "Unknown message type",
                    EventParseError::Malformed(_) => "Invalid message format",
                };
                self.send_event(conn_id, &ServerEvent::error(message));
                return;
            }
        };

        match event {
            ClientEvent::Auth(payload) => self.handle_auth(conn_id, state, payload),
            ClientEvent::Message(payload) => self.handle_message(conn_id, state, payload),
            ClientEvent::TypingStart(payload) => self.handle_typing(state, payload, true),
            ClientEvent::TypingStop(payload) => self.handle_typing(state, payload, false),
            ClientEvent::SubscribeConversation(payload) => {
                self.handle_subscribe(conn_id, state, payload)
            }
            ClientEvent::Ping => {
                if let Some(identity) = &state.identity {
                    self.presence.touch(identity);
                }
                self.send_event(conn_id, &ServerEvent::Pong);
            }
        }
    }

    fn handle_auth(&self, conn_id: &ConnectionId, state: &mut ConnState, payload: AuthPayload) {
        if state.identity.is_some() {
            self.send_error(conn_id, &RelayError::Protocol("Already authenticated".into()));
            return;
        }
        let identity = ParticipantIdentity::new(payload.participant_type, payload.participant_id);

        let conversations = match self.gateway.conversation_ids_for(&identity) {
            Ok(conversations) => conversations,
            Err(err) => {
                tracing::error!(identity = %identity, error = %err, "Membership lookup failed");
                self.send_event(conn_id, &ServerEvent::error("Failed to load conversations"));
                return;
            }
        };

        let lock = self.identity_lock(&identity);
        {
            let _guard = lock.lock();
            // Last writer wins on the identity binding; the stale
            // connection is closed so it cannot receive duplicate
            // deliveries.
            if let Some(stale) = self.connections.bind(identity, conn_id) {
                tracing::info!(identity = %identity, displaced = %stale, "Reconnect displaced stale connection");
                self.connections.remove(&stale);
            }
            self.subscriptions.subscribe_all(identity, &conversations);
            state.identity = Some(identity);

            let status = self.presence.went_online(&identity);
            self.broadcast(&self.subscriptions.peers_of(&identity), &status);
        }

        tracing::info!(connection_id = %conn_id, identity = %identity, conversations = conversations.len(), "Authenticated");
        self.send_event(
            conn_id,
            &ServerEvent::AuthSuccess { user_id: identity.key(), conversations },
        );
    }

    /// The send pipeline: validate → persist → snapshot subscribers →
    /// broadcast → ack. Persistence failure short-circuits with an error
    /// reply and nothing is broadcast.
    fn handle_message(&self, conn_id: &ConnectionId, state: &ConnState, payload: MessagePayload) {
        let Some(identity) = state.identity else {
            self.send_error(conn_id, &RelayError::NotAuthenticated);
            return;
        };

        let row = match self.gateway.persist_message(
            payload.conversation_id,
            &identity,
            &payload.content,
            payload.reply_to_id,
        ) {
            Ok(row) => row,
            Err(err) => {
                let err = RelayError::Store(err.to_string());
                tracing::error!(
                    identity = %identity,
                    conversation_id = %payload.conversation_id,
                    kind = err.error_kind(),
                    error = %err,
                    "Message persist failed"
                );
                self.send_error(conn_id, &err);
                return;
            }
        };
        self.presence.touch(&identity);

        let sender_name = match self.gateway.display_name_for(&identity) {
            Ok(Some(name)) => name,
            Ok(None) => identity.key(),
            Err(err) => {
                tracing::warn!(identity = %identity, error = %err, "Display name lookup failed");
                identity.key()
            }
        };

        let event = ServerEvent::NewMessage {
            message_id: row.id,
            conversation_id: row.conversation_id,
            sender_type: identity.role,
            sender_id: identity.id,
            sender_name,
            content: row.content,
            reply_to_id: row.reply_to_id,
            created_at: row.created_at,
        };
        let recipients = self.subscriptions.subscribers_of(payload.conversation_id);
        self.broadcast(&recipients, &event);

        self.send_event(
            conn_id,
            &ServerEvent::MessageSent { message_id: row.id, temp_id: payload.temp_id },
        );
    }

    /// Typing indicators are never echoed to the sender, and a
    /// pre-auth typing event is dropped without a reply.
    fn handle_typing(&self, state: &ConnState, payload: TypingPayload, is_typing: bool) {
        let Some(identity) = state.identity else {
            return;
        };

        let written = if is_typing {
            self.gateway.set_typing(payload.conversation_id, &identity)
        } else {
            self.gateway.clear_typing(payload.conversation_id, &identity)
        };
        if let Err(err) = written {
            tracing::warn!(identity = %identity, error = %err, "Typing write failed");
        }
        self.presence.touch(&identity);

        let event = ServerEvent::UserTyping {
            conversation_id: payload.conversation_id,
            user_id: identity.key(),
            participant_type: identity.role,
            participant_id: identity.id,
            is_typing,
        };
        let recipients: Vec<ParticipantIdentity> = self
            .subscriptions
            .subscribers_of(payload.conversation_id)
            .into_iter()
            .filter(|subscriber| *subscriber != identity)
            .collect();
        self.broadcast(&recipients, &event);
    }

    /// Explicit subscribe, for conversations created after this
    /// connection authenticated. Membership was already settled by
    /// whoever created the conversation; no re-validation here.
    fn handle_subscribe(
        &self,
        conn_id: &ConnectionId,
        state: &ConnState,
        payload: SubscribePayload,
    ) {
        let Some(identity) = state.identity else {
            return;
        };
        self.subscriptions.subscribe(identity, payload.conversation_id);
        self.send_event(
            conn_id,
            &ServerEvent::Subscribed { conversation_id: payload.conversation_id },
        );
    }

    /// Cleanup shared by graceful close, transport error, and heartbeat
    /// termination. Identity-level teardown only runs when this
    /// connection still owns the identity binding; a connection displaced
    /// by a reconnect leaves the newer connection's state alone.
    pub fn handle_disconnect(&self, conn_id: &ConnectionId, state: &ConnState) {
        self.connections.remove(conn_id);

        let Some(identity) = state.identity else {
            tracing::debug!(connection_id = %conn_id, "Unauthenticated connection closed");
            return;
        };
        let lock = self.identity_lock(&identity);
        let _guard = lock.lock();
        if !self.connections.unbind_if_current(&identity, conn_id) {
            tracing::debug!(connection_id = %conn_id, identity = %identity, "Stale connection closed after reconnect");
            return;
        }

        let peers = self.subscriptions.peers_of(&identity);
        self.subscriptions.unsubscribe_all(&identity);
        let status = self.presence.went_offline(&identity);
        self.broadcast(&peers, &status);
        tracing::info!(connection_id = %conn_id, identity = %identity, "Disconnected");
    }

    /// Broadcast a status transition decided outside any connection's
    /// handler (the stale-presence sweep).
    pub fn announce_status(&self, identity: &ParticipantIdentity, status: PresenceStatus) {
        let event = presence::status_event(identity, status);
        self.broadcast(&self.subscriptions.peers_of(identity), &event);
    }

    /// Serialize once, share the frame across every recipient with a
    /// live bound connection.
    fn broadcast(&self, recipients: &[ParticipantIdentity], event: &ServerEvent) {
        let Ok(json) = serde_json::to_string(event) else {
            return;
        };
        let frame = Arc::new(json);
        for identity in recipients {
            if let Some(conn_id) = self.connections.connection_for(identity) {
                self.connections.send_to(&conn_id, OutboundFrame::Text(frame.clone()));
            }
        }
    }

    fn send_event(&self, conn_id: &ConnectionId, event: &ServerEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            self.connections.send_to(conn_id, OutboundFrame::Text(Arc::new(json)));
        }
    }

    fn send_error(&self, conn_id: &ConnectionId, err: &RelayError) {
        self.send_event(conn_id, &ServerEvent::error(err.client_message()));
    }
}
