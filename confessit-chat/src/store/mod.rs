//! Persistence gateway: one trait per collection, combined into [`Store`].
//!
//! Every state change on a conversation is a single conditional update. A
//! method returning `Ok(None)` means the precondition no longer held when the
//! write was applied (zero rows affected); callers turn that into a conflict.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use confessit_shared::AppResult;
use uuid::Uuid;

use crate::models::{Conversation, ConversationStatus, Match, Message, MessageReport, User};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, regno: &str) -> AppResult<Option<User>>;

    async fn insert_user(&self, user: User) -> AppResult<User>;

    /// Users other than `exclude`, of a different gender, opted into matchmaking.
    async fn count_candidates(&self, exclude: &str, gender: &str) -> AppResult<i64>;

    /// The candidate at `offset` in a stable (regno) ordering of the same pool.
    async fn candidate_at(&self, exclude: &str, gender: &str, offset: i64) -> AppResult<Option<User>>;

    async fn touch_matchmaking_time(&self, regno: &str, at: DateTime<Utc>) -> AppResult<()>;
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn insert_match(&self, m: Match) -> AppResult<Match>;

    async fn get_match(&self, id: Uuid) -> AppResult<Option<Match>>;

    /// Matches where the user is either side, newest first.
    async fn matches_for_user(&self, regno: &str, limit: i64) -> AppResult<Vec<Match>>;

    async fn matches_expiring_after(&self, marker: DateTime<Utc>) -> AppResult<Vec<Match>>;

    /// Pulls `expires_at` forward to `at`; never pushes it later.
    async fn collapse_match_expiry(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Match>>;

    async fn list_matches(&self, limit: i64) -> AppResult<Vec<Match>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fails with `ConversationAlreadyExists` when the match already has one.
    async fn insert_conversation(&self, conversation: Conversation) -> AppResult<Conversation>;

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    async fn get_conversation_by_match(&self, match_id: Uuid) -> AppResult<Option<Conversation>>;

    /// `status = to` where `status IN from`, stamping the timestamp that
    /// belongs to `to`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: &[ConversationStatus],
        to: ConversationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>>;

    /// Terminates and blocks under the admin marker in one write.
    async fn terminate_conversation(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Conversation>>;

    /// Only applies to an accepted, currently unblocked conversation.
    async fn set_blocked(&self, id: Uuid, actor: &str) -> AppResult<Option<Conversation>>;

    /// Only applies when `actor` is the one who blocked.
    async fn clear_blocked(&self, id: Uuid, actor: &str) -> AppResult<Option<Conversation>>;

    async fn update_last_message(&self, id: Uuid, preview: &str, at: DateTime<Utc>) -> AppResult<()>;

    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
        limit: i64,
    ) -> AppResult<Vec<Conversation>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: Message) -> AppResult<Message>;

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Oldest first.
    async fn list_messages(&self, conversation_id: Uuid, limit: i64) -> AppResult<Vec<Message>>;

    /// Marks the receiver's unread messages read; returns how many flipped.
    async fn mark_read(&self, conversation_id: Uuid, receiver: &str) -> AppResult<usize>;

    async fn messages_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Message>>;

    async fn delete_messages(&self, ids: &[Uuid]) -> AppResult<usize>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn find_report(&self, message_id: Uuid, reporter: &str) -> AppResult<Option<MessageReport>>;

    /// Fails with `DuplicateReport` on a second report for the same pair.
    async fn insert_report(&self, report: MessageReport) -> AppResult<MessageReport>;
}

/// The full persistence surface the service depends on.
#[async_trait]
pub trait Store: UserStore + MatchStore + ConversationStore + MessageStore + ReportStore {
    async fn ping(&self) -> AppResult<()>;

    fn backend(&self) -> &'static str;
}
