//! Shared test fixtures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use confessit_shared::{AppError, AppResult};

use crate::models::{Conversation, ConversationStatus, Match, Message, MessageReport, User};
use crate::notifier::Notifier;
use crate::realtime::ConnectionRegistry;
use crate::services::archival::MessageArchiver;
use crate::services::conversation::ConversationService;
use crate::services::live_session::SessionIssuer;
use crate::services::matchmaking::MatchmakingEngine;
use crate::services::messages::MessageService;
use crate::services::UserNotifications;
use crate::store::{ConversationStore, MatchStore, MemoryStore, MessageStore, ReportStore, Store, UserStore};

pub const SESSION_SECRET: &str = "test-session-secret";

pub fn user(regno: &str, gender: &str) -> User {
    User {
        regno: regno.to_string(),
        name: format!("User {regno}"),
        email: format!("{}@campus.test", regno.to_lowercase()),
        username: Some(regno.to_lowercase()),
        emoji: None,
        bio: Some("hello".into()),
        which_class: Some("CSE".into()),
        profile_picture_id: None,
        gender: gender.to_string(),
        interests: vec!["music".into()],
        is_matchmaking: true,
        is_notifications: true,
        user_role: "user".into(),
        last_matchmaking_time: None,
    }
}

/// Records every notification; optionally fails each call after recording it.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(String, String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.calls().into_iter().map(|(user, _, _)| user).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &str, heading: &str, body: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((user_id.to_string(), heading.to_string(), body.to_string()));
        if self.fail {
            anyhow::bail!("notification sink unavailable");
        }
        Ok(())
    }
}

/// Delegates to a [`MemoryStore`], failing the next N status transitions or
/// preview updates.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    transitions: AtomicUsize,
    previews: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            transitions: AtomicUsize::new(0),
            previews: AtomicUsize::new(0),
        }
    }

    pub fn fail_transitions(&self, n: usize) {
        self.transitions.store(n, Ordering::SeqCst);
    }

    pub fn fail_previews(&self, n: usize) {
        self.previews.store(n, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicUsize, what: &str) -> AppResult<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(AppError::Internal(anyhow::anyhow!("{what} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for FlakyStore {
    async fn get_user(&self, regno: &str) -> AppResult<Option<User>> {
        self.inner.get_user(regno).await
    }

    async fn insert_user(&self, user: User) -> AppResult<User> {
        self.inner.insert_user(user).await
    }

    async fn count_candidates(&self, exclude: &str, gender: &str) -> AppResult<i64> {
        self.inner.count_candidates(exclude, gender).await
    }

    async fn candidate_at(&self, exclude: &str, gender: &str, offset: i64) -> AppResult<Option<User>> {
        self.inner.candidate_at(exclude, gender, offset).await
    }

    async fn touch_matchmaking_time(&self, regno: &str, at: DateTime<Utc>) -> AppResult<()> {
        self.inner.touch_matchmaking_time(regno, at).await
    }
}

#[async_trait]
impl MatchStore for FlakyStore {
    async fn insert_match(&self, m: Match) -> AppResult<Match> {
        self.inner.insert_match(m).await
    }

    async fn get_match(&self, id: Uuid) -> AppResult<Option<Match>> {
        self.inner.get_match(id).await
    }

    async fn matches_for_user(&self, regno: &str, limit: i64) -> AppResult<Vec<Match>> {
        self.inner.matches_for_user(regno, limit).await
    }

    async fn matches_expiring_after(&self, marker: DateTime<Utc>) -> AppResult<Vec<Match>> {
        self.inner.matches_expiring_after(marker).await
    }

    async fn collapse_match_expiry(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Match>> {
        self.inner.collapse_match_expiry(id, at).await
    }

    async fn list_matches(&self, limit: i64) -> AppResult<Vec<Match>> {
        self.inner.list_matches(limit).await
    }
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn insert_conversation(&self, conversation: Conversation) -> AppResult<Conversation> {
        self.inner.insert_conversation(conversation).await
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        self.inner.get_conversation(id).await
    }

    async fn get_conversation_by_match(&self, match_id: Uuid) -> AppResult<Option<Conversation>> {
        self.inner.get_conversation_by_match(match_id).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[ConversationStatus],
        to: ConversationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        Self::trip(&self.transitions, "status transition")?;
        self.inner.transition_status(id, from, to, at).await
    }

    async fn terminate_conversation(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Conversation>> {
        self.inner.terminate_conversation(id, at).await
    }

    async fn set_blocked(&self, id: Uuid, actor: &str) -> AppResult<Option<Conversation>> {
        self.inner.set_blocked(id, actor).await
    }

    async fn clear_blocked(&self, id: Uuid, actor: &str) -> AppResult<Option<Conversation>> {
        self.inner.clear_blocked(id, actor).await
    }

    async fn update_last_message(&self, id: Uuid, preview: &str, at: DateTime<Utc>) -> AppResult<()> {
        Self::trip(&self.previews, "preview update")?;
        self.inner.update_last_message(id, preview, at).await
    }

    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
        limit: i64,
    ) -> AppResult<Vec<Conversation>> {
        self.inner.list_conversations(status, limit).await
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn insert_message(&self, message: Message) -> AppResult<Message> {
        self.inner.insert_message(message).await
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        self.inner.get_message(id).await
    }

    async fn list_messages(&self, conversation_id: Uuid, limit: i64) -> AppResult<Vec<Message>> {
        self.inner.list_messages(conversation_id, limit).await
    }

    async fn mark_read(&self, conversation_id: Uuid, receiver: &str) -> AppResult<usize> {
        self.inner.mark_read(conversation_id, receiver).await
    }

    async fn messages_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Message>> {
        self.inner.messages_older_than(cutoff).await
    }

    async fn delete_messages(&self, ids: &[Uuid]) -> AppResult<usize> {
        self.inner.delete_messages(ids).await
    }
}

#[async_trait]
impl ReportStore for FlakyStore {
    async fn find_report(&self, message_id: Uuid, reporter: &str) -> AppResult<Option<MessageReport>> {
        self.inner.find_report(message_id, reporter).await
    }

    async fn insert_report(&self, report: MessageReport) -> AppResult<MessageReport> {
        self.inner.insert_report(report).await
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn ping(&self) -> AppResult<()> {
        self.inner.ping().await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

/// Every service wired over one in-memory store.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub registry: ConnectionRegistry,
    pub sessions: SessionIssuer,
    pub matchmaking: MatchmakingEngine,
    pub conversations: Arc<ConversationService>,
    pub messages: MessageService,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_notifier(RecordingNotifier::new())
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(notifier);
        let registry = ConnectionRegistry::new();
        let sessions = SessionIssuer::new(SESSION_SECRET);

        let dyn_store: Arc<dyn Store> = store.clone();
        let notifications = UserNotifications::new(dyn_store.clone(), notifier.clone(), registry.clone());

        Self {
            matchmaking: MatchmakingEngine::new(dyn_store.clone(), notifications.clone()),
            conversations: Arc::new(ConversationService::new(
                dyn_store.clone(),
                notifications,
                registry.clone(),
                sessions.clone(),
            )),
            messages: MessageService::new(dyn_store, registry.clone()),
            store,
            notifier,
            registry,
            sessions,
        }
    }

    pub fn archiver(&self, dir: impl Into<std::path::PathBuf>) -> MessageArchiver {
        MessageArchiver::new(self.store.clone(), dir)
    }

    pub async fn add_user(&self, regno: &str, gender: &str) -> User {
        self.store.insert_user(user(regno, gender)).await.unwrap()
    }

    /// A match between `initiator` and `receiver` created at `created_at`, with
    /// its conversation forced into `status`.
    pub async fn conversation(
        &self,
        initiator: &str,
        receiver: &str,
        status: ConversationStatus,
        created_at: DateTime<Utc>,
    ) -> (Match, Conversation) {
        let m = self
            .store
            .insert_match(Match::open(initiator, receiver, created_at))
            .await
            .unwrap();
        let mut c = Conversation::pending(&m, created_at);
        c.status = status;
        if status == ConversationStatus::Accepted {
            c.requested_at = Some(created_at);
            c.accepted_at = Some(created_at);
        }
        let c = self.store.insert_conversation(c).await.unwrap();
        (m, c)
    }

    pub async fn accepted(&self, initiator: &str, receiver: &str) -> (Match, Conversation) {
        self.conversation(initiator, receiver, ConversationStatus::Accepted, Utc::now())
            .await
    }
}
