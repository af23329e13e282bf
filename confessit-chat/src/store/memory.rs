//! In-memory store for tests and single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use confessit_shared::{AppError, AppResult, ErrorCode};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ConversationStore, MatchStore, MessageStore, ReportStore, Store, UserStore};
use crate::models::{
    Conversation, ConversationStatus, Match, Message, MessageReport, User, ADMIN_BLOCKER,
};

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    matches: HashMap<Uuid, Match>,
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Message>,
    reports: HashMap<Uuid, MessageReport>,
}

/// All collections sit behind one lock, so every conditional update is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn candidate_pool<'a>(tables: &'a Tables, exclude: &str, gender: &str) -> Vec<&'a User> {
    let mut pool: Vec<&User> = tables
        .users
        .values()
        .filter(|u| u.regno != exclude && u.gender != gender && u.is_matchmaking)
        .collect();
    pool.sort_by(|a, b| a.regno.cmp(&b.regno));
    pool
}

fn stamp(conversation: &mut Conversation, to: ConversationStatus, at: DateTime<Utc>) {
    match to {
        ConversationStatus::Requested => conversation.requested_at = Some(at),
        ConversationStatus::Accepted => conversation.accepted_at = Some(at),
        ConversationStatus::Terminated => conversation.terminated_at = Some(at),
        _ => {}
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, regno: &str) -> AppResult<Option<User>> {
        Ok(self.tables.read().await.users.get(regno).cloned())
    }

    async fn insert_user(&self, user: User) -> AppResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.regno) {
            return Err(AppError::conflict("user already exists"));
        }
        tables.users.insert(user.regno.clone(), user.clone());
        Ok(user)
    }

    async fn count_candidates(&self, exclude: &str, gender: &str) -> AppResult<i64> {
        let tables = self.tables.read().await;
        Ok(candidate_pool(&tables, exclude, gender).len() as i64)
    }

    async fn candidate_at(&self, exclude: &str, gender: &str, offset: i64) -> AppResult<Option<User>> {
        let tables = self.tables.read().await;
        let pool = candidate_pool(&tables, exclude, gender);
        Ok(usize::try_from(offset)
            .ok()
            .and_then(|i| pool.get(i))
            .map(|u| (*u).clone()))
    }

    async fn touch_matchmaking_time(&self, regno: &str, at: DateTime<Utc>) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(regno)
            .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))?;
        user.last_matchmaking_time = Some(at);
        Ok(())
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn insert_match(&self, m: Match) -> AppResult<Match> {
        self.tables.write().await.matches.insert(m.id, m.clone());
        Ok(m)
    }

    async fn get_match(&self, id: Uuid) -> AppResult<Option<Match>> {
        Ok(self.tables.read().await.matches.get(&id).cloned())
    }

    async fn matches_for_user(&self, regno: &str, limit: i64) -> AppResult<Vec<Match>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Match> = tables
            .matches
            .values()
            .filter(|m| m.involves(regno))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn matches_expiring_after(&self, marker: DateTime<Utc>) -> AppResult<Vec<Match>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Match> = tables
            .matches
            .values()
            .filter(|m| m.expires_at > marker)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(found)
    }

    async fn collapse_match_expiry(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Match>> {
        let mut tables = self.tables.write().await;
        Ok(tables.matches.get_mut(&id).map(|m| {
            if at < m.expires_at {
                m.expires_at = at;
            }
            m.clone()
        }))
    }

    async fn list_matches(&self, limit: i64) -> AppResult<Vec<Match>> {
        let tables = self.tables.read().await;
        let mut all: Vec<Match> = tables.matches.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn insert_conversation(&self, conversation: Conversation) -> AppResult<Conversation> {
        let mut tables = self.tables.write().await;
        if tables
            .conversations
            .values()
            .any(|c| c.match_id == conversation.match_id)
        {
            return Err(AppError::new(
                ErrorCode::ConversationAlreadyExists,
                "a conversation for this match already exists",
            ));
        }
        tables.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.tables.read().await.conversations.get(&id).cloned())
    }

    async fn get_conversation_by_match(&self, match_id: Uuid) -> AppResult<Option<Conversation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .conversations
            .values()
            .find(|c| c.match_id == match_id)
            .cloned())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[ConversationStatus],
        to: ConversationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let mut tables = self.tables.write().await;
        let Some(conversation) = tables.conversations.get_mut(&id) else {
            return Ok(None);
        };
        if !from.contains(&conversation.status) {
            return Ok(None);
        }
        conversation.status = to;
        stamp(conversation, to, at);
        Ok(Some(conversation.clone()))
    }

    async fn terminate_conversation(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Conversation>> {
        let mut tables = self.tables.write().await;
        let Some(conversation) = tables.conversations.get_mut(&id) else {
            return Ok(None);
        };
        if !ConversationStatus::TERMINABLE.contains(&conversation.status) {
            return Ok(None);
        }
        conversation.status = ConversationStatus::Terminated;
        conversation.terminated_at = Some(at);
        conversation.is_blocked = true;
        conversation.blocked_by = Some(ADMIN_BLOCKER.to_string());
        Ok(Some(conversation.clone()))
    }

    async fn set_blocked(&self, id: Uuid, actor: &str) -> AppResult<Option<Conversation>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .conversations
            .get_mut(&id)
            .filter(|c| c.status == ConversationStatus::Accepted && !c.is_blocked)
            .map(|c| {
                c.is_blocked = true;
                c.blocked_by = Some(actor.to_string());
                c.clone()
            }))
    }

    async fn clear_blocked(&self, id: Uuid, actor: &str) -> AppResult<Option<Conversation>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .conversations
            .get_mut(&id)
            .filter(|c| c.is_blocked && c.blocked_by.as_deref() == Some(actor))
            .map(|c| {
                c.is_blocked = false;
                c.blocked_by = None;
                c.clone()
            }))
    }

    async fn update_last_message(&self, id: Uuid, preview: &str, at: DateTime<Utc>) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(c) = tables.conversations.get_mut(&id) {
            c.last_message_preview = Some(preview.to_string());
            c.last_message_at = Some(at);
        }
        Ok(())
    }

    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
        limit: i64,
    ) -> AppResult<Vec<Conversation>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: Message) -> AppResult<Message> {
        self.tables.write().await.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.tables.read().await.messages.get(&id).cloned())
    }

    async fn list_messages(&self, conversation_id: Uuid, limit: i64) -> AppResult<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        // v7 ids break timestamp ties in insertion order
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn mark_read(&self, conversation_id: Uuid, receiver: &str) -> AppResult<usize> {
        let mut tables = self.tables.write().await;
        let mut flipped = 0;
        for m in tables.messages.values_mut() {
            if m.conversation_id == conversation_id && m.receiver_id == receiver && !m.read {
                m.read = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn messages_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| m.timestamp < cutoff)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn delete_messages(&self, ids: &[Uuid]) -> AppResult<usize> {
        let mut tables = self.tables.write().await;
        Ok(ids.iter().filter(|id| tables.messages.remove(*id).is_some()).count())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn find_report(&self, message_id: Uuid, reporter: &str) -> AppResult<Option<MessageReport>> {
        let tables = self.tables.read().await;
        Ok(tables
            .reports
            .values()
            .find(|r| r.message_id == message_id && r.reporter_id == reporter)
            .cloned())
    }

    async fn insert_report(&self, report: MessageReport) -> AppResult<MessageReport> {
        let mut tables = self.tables.write().await;
        if tables
            .reports
            .values()
            .any(|r| r.message_id == report.message_id && r.reporter_id == report.reporter_id)
        {
            return Err(AppError::new(
                ErrorCode::DuplicateReport,
                "you have already reported this message",
            ));
        }
        tables.reports.insert(report.id, report.clone());
        Ok(report)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
