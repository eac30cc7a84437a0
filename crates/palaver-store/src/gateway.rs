//! The query seam between the relay and the durable store. The relay
//! depends only on [`StoreGateway`]; tests may substitute a fake, and a
//! networked relational store would slot in behind the same trait.

use chrono::Duration;

use palaver_core::identity::ParticipantIdentity;
use palaver_core::ids::{ConversationId, MessageId};
use palaver_core::presence::PresenceStatus;

use crate::conversations::ConversationRepo;
use crate::database::Database;
use crate::error::StoreError;
use crate::messages::{MessageRepo, MessageRow};
use crate::participants::ParticipantRepo;
use crate::presence::PresenceRepo;
use crate::typing::TypingRepo;

/// Operations the relay consumes. No retries are performed here; callers
/// decide whether a failure aborts the operation (a failed
/// `persist_message` must) or is logged and swallowed (presence and
/// typing writes).
pub trait StoreGateway: Send + Sync {
    /// Every conversation the identity is a member of. Called once per
    /// connection, at authentication.
    fn conversation_ids_for(
        &self,
        identity: &ParticipantIdentity,
    ) -> Result<Vec<ConversationId>, StoreError>;

    /// Insert a message and return the stored row, including the
    /// store-assigned monotonically-increasing id.
    fn persist_message(
        &self,
        conversation_id: ConversationId,
        sender: &ParticipantIdentity,
        content: &str,
        reply_to_id: Option<MessageId>,
    ) -> Result<MessageRow, StoreError>;

    /// Upsert presence. Idempotent.
    fn set_presence(
        &self,
        identity: &ParticipantIdentity,
        status: PresenceStatus,
    ) -> Result<(), StoreError>;

    /// Refresh last-activity only.
    fn touch_presence(&self, identity: &ParticipantIdentity) -> Result<(), StoreError>;

    /// Membership of one conversation. Exposed for callers that need to
    /// notify beyond the live subscription set (the HTTP layer); the
    /// relay's own broadcasts use the in-memory registry.
    fn conversation_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ParticipantIdentity>, StoreError>;

    /// Display name for broadcast stamping; `None` when no profile row
    /// exists.
    fn display_name_for(
        &self,
        identity: &ParticipantIdentity,
    ) -> Result<Option<String>, StoreError>;

    fn set_typing(
        &self,
        conversation_id: ConversationId,
        identity: &ParticipantIdentity,
    ) -> Result<(), StoreError>;

    fn clear_typing(
        &self,
        conversation_id: ConversationId,
        identity: &ParticipantIdentity,
    ) -> Result<(), StoreError>;

    fn sweep_expired_typing(&self, ttl: Duration) -> Result<usize, StoreError>;

    fn demote_stale_presence(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<ParticipantIdentity>, StoreError>;
}

/// SQLite-backed gateway over the repos.
pub struct SqliteGateway {
    conversations: ConversationRepo,
    messages: MessageRepo,
    participants: ParticipantRepo,
    presence: PresenceRepo,
    typing: TypingRepo,
}

impl SqliteGateway {
    pub fn new(db: Database) -> Self {
        Self {
            conversations: ConversationRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            participants: ParticipantRepo::new(db.clone()),
            presence: PresenceRepo::new(db.clone()),
            typing: TypingRepo::new(db),
        }
    }
}

impl StoreGateway for SqliteGateway {
    fn conversation_ids_for(
        &self,
        identity: &ParticipantIdentity,
    ) -> Result<Vec<ConversationId>, StoreError> {
        self.conversations.ids_for(identity)
    }

    fn persist_message(
        &self,
        conversation_id: ConversationId,
        sender: &ParticipantIdentity,
        content: &str,
        reply_to_id: Option<MessageId>,
    ) -> Result<MessageRow, StoreError> {
        self.messages.insert(conversation_id, sender, content, reply_to_id)
    }

    fn set_presence(
        &self,
        identity: &ParticipantIdentity,
        status: PresenceStatus,
    ) -> Result<(), StoreError> {
        self.presence.set(identity, status)
    }

    fn touch_presence(&self, identity: &ParticipantIdentity) -> Result<(), StoreError> {
        self.presence.touch(identity)
    }

    fn conversation_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ParticipantIdentity>, StoreError> {
        self.conversations.members(conversation_id)
    }

    fn display_name_for(
        &self,
        identity: &ParticipantIdentity,
    ) -> Result<Option<String>, StoreError> {
        self.participants.display_name(identity)
    }

    fn set_typing(
        &self,
        conversation_id: ConversationId,
        identity: &ParticipantIdentity,
    ) -> Result<(), StoreError> {
        self.typing.set(conversation_id, identity)
    }

    fn clear_typing(
        &self,
        conversation_id: ConversationId,
        identity: &ParticipantIdentity,
    ) -> Result<(), StoreError> {
        self.typing.clear(conversation_id, identity)
    }

    fn sweep_expired_typing(&self, ttl: Duration) -> Result<usize, StoreError> {
        self.typing.sweep_expired(ttl)
    }

    fn demote_stale_presence(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<ParticipantIdentity>, StoreError> {
        self.presence.demote_stale(stale_after)
    }
}
