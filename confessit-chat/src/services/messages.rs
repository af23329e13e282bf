use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use confessit_shared::errors::{AppError, AppResult, ErrorCode};

use crate::models::{Conversation, ConversationStatus, Match, Message, MessageReport, REPORT_STATUS_PENDING};
use crate::policy;
use crate::realtime::{ConnectionRegistry, ServerEvent};
use crate::store::Store;

pub struct MessageService {
    store: Arc<dyn Store>,
    registry: ConnectionRegistry,
}

impl MessageService {
    pub fn new(store: Arc<dyn Store>, registry: ConnectionRegistry) -> Self {
        Self { store, registry }
    }

    /// Participant of an accepted conversation. Shared by reads and writes.
    async fn open_conversation(&self, conversation_id: Uuid, regno: &str) -> AppResult<(Conversation, Match)> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))?;
        let m = self
            .store
            .get_match(conversation.match_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::MatchNotFound, "match not found"))?;

        if !conversation.is_participant(regno) || !m.involves(regno) {
            return Err(AppError::new(
                ErrorCode::NotConversationParticipant,
                "you are not part of this conversation",
            ));
        }
        if conversation.status != ConversationStatus::Accepted {
            return Err(AppError::new(
                ErrorCode::ConversationNotActive,
                format!("conversation is {}", conversation.status),
            ));
        }
        Ok((conversation, m))
    }

    pub async fn send(&self, conversation_id: Uuid, sender: &str, text: &str) -> AppResult<Message> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("message text cannot be empty".into()));
        }

        let now = Utc::now();
        let (conversation, m) = self.open_conversation(conversation_id, sender).await?;

        if conversation.is_blocked {
            return Err(AppError::new(ErrorCode::ConversationBlocked, "this conversation is blocked"));
        }
        if m.is_expired(now) || policy::conversation_window_elapsed(conversation.created_at, now) {
            return Err(AppError::new(ErrorCode::MatchExpired, "this match has ended"));
        }

        let message = self
            .store
            .insert_message(Message {
                id: Uuid::now_v7(),
                conversation_id: conversation.id,
                sender_id: sender.to_string(),
                receiver_id: conversation.other_participant(sender).to_string(),
                text: text.to_string(),
                timestamp: now,
                read: false,
            })
            .await?;

        // The message is already stored; a stale preview must not fail the send.
        if let Err(e) = self
            .store
            .update_last_message(conversation.id, &policy::message_preview(text), now)
            .await
        {
            tracing::warn!(
                message_id = %message.id,
                conversation_id = %conversation.id,
                error = %e,
                "failed to update last message preview"
            );
        }

        let delivered = self
            .registry
            .broadcast_to_conversation(
                conversation.id,
                ServerEvent::NewMessage {
                    conversation_id: conversation.id,
                    match_id: m.id,
                    message: message.clone(),
                    timestamp: now,
                },
                None,
            )
            .await;

        metrics::counter!("messages_sent_total").increment(1);
        tracing::debug!(
            message_id = %message.id,
            conversation_id = %conversation.id,
            sender = %sender,
            delivered,
            "message sent"
        );

        Ok(message)
    }

    /// Oldest first. Marks everything addressed to `regno` as read; history
    /// stays readable while blocked.
    pub async fn fetch(&self, conversation_id: Uuid, regno: &str, limit: Option<i64>) -> AppResult<Vec<Message>> {
        let (conversation, _) = self.open_conversation(conversation_id, regno).await?;

        let mut messages = self
            .store
            .list_messages(conversation.id, policy::clamp_fetch_limit(limit))
            .await?;
        let flipped = self.store.mark_read(conversation.id, regno).await?;
        if flipped > 0 {
            for message in messages.iter_mut().filter(|m| m.receiver_id == regno) {
                message.read = true;
            }
        }
        Ok(messages)
    }

    /// Only the recipient of a message may report it.
    pub async fn report(&self, message_id: Uuid, reporter: &str, reason: &str) -> AppResult<MessageReport> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation("a reason is required".into()));
        }

        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))?;

        if message.receiver_id != reporter {
            return Err(AppError::new(
                ErrorCode::CannotReportMessage,
                "you can only report messages sent to you",
            ));
        }

        let conversation = self
            .store
            .get_conversation(message.conversation_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))?;
        if conversation.status != ConversationStatus::Accepted {
            return Err(AppError::new(
                ErrorCode::ConversationNotActive,
                format!("conversation is {}", conversation.status),
            ));
        }

        if self.store.find_report(message.id, reporter).await?.is_some() {
            return Err(AppError::new(
                ErrorCode::DuplicateReport,
                "you have already reported this message",
            ));
        }

        let report = self
            .store
            .insert_report(MessageReport {
                id: Uuid::now_v7(),
                message_id: message.id,
                conversation_id: conversation.id,
                reporter_id: reporter.to_string(),
                reported_user_id: message.sender_id.clone(),
                reason: reason.to_string(),
                reported_at: Utc::now(),
                status: REPORT_STATUS_PENDING.to_string(),
            })
            .await?;

        tracing::warn!(
            report_id = %report.id,
            message_id = %message.id,
            reporter = %reporter,
            reported_user = %message.sender_id,
            "message reported"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConversationStore, MatchStore, MessageStore};
    use crate::testing::{Fixture, FlakyStore};
    use chrono::Duration;

    #[tokio::test]
    async fn send_persists_unread_and_broadcasts() {
        let fx = Fixture::new();
        let (_, c) = fx.accepted("A1", "B1").await;
        let (_conn, mut rx) = fx.registry.register("B1", c.id).await;

        let message = fx.messages.send(c.id, "A1", "hello there").await.unwrap();
        assert_eq!(message.receiver_id, "B1");
        assert!(!message.read);

        match rx.try_recv().unwrap() {
            ServerEvent::NewMessage { message: pushed, .. } => assert_eq!(pushed.id, message.id),
            other => panic!("unexpected event {other:?}"),
        }
        let stored = fx.store.get_conversation(c.id).await.unwrap().unwrap();
        assert_eq!(stored.last_message_preview.as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn preview_failure_still_delivers_the_stored_message() {
        let fx = Fixture::new();
        let (_, c) = fx.accepted("A1", "B1").await;
        let flaky = Arc::new(FlakyStore::new(fx.store.clone()));
        flaky.fail_previews(1);
        let messages = MessageService::new(flaky, fx.registry.clone());
        let (_conn, mut rx) = fx.registry.register("B1", c.id).await;

        let message = messages.send(c.id, "A1", "still here").await.unwrap();

        match rx.try_recv().unwrap() {
            ServerEvent::NewMessage { message: pushed, .. } => assert_eq!(pushed.id, message.id),
            other => panic!("unexpected event {other:?}"),
        }
        let history = fx.store.list_messages(c.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        let stored = fx.store.get_conversation(c.id).await.unwrap().unwrap();
        assert!(stored.last_message_preview.is_none());
    }

    #[tokio::test]
    async fn send_is_gated_on_status_block_and_expiry() {
        let fx = Fixture::new();
        let now = Utc::now();

        for status in [
            ConversationStatus::Pending,
            ConversationStatus::Requested,
            ConversationStatus::Rejected,
            ConversationStatus::Expired,
            ConversationStatus::Terminated,
        ] {
            let (_, c) = fx.conversation("A1", "B1", status, now).await;
            let err = fx.messages.send(c.id, "A1", "hi").await.unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::ConversationNotActive), "{status}");
        }

        let (_, stale) = fx
            .conversation("A1", "B1", ConversationStatus::Accepted, now - Duration::hours(5))
            .await;
        let err = fx.messages.send(stale.id, "A1", "hi").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::MatchExpired));

        let (m, collapsed) = fx.accepted("A1", "B1").await;
        fx.store.collapse_match_expiry(m.id, now - Duration::seconds(1)).await.unwrap();
        let err = fx.messages.send(collapsed.id, "A1", "hi").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::MatchExpired));

        let err = fx.messages.send(collapsed.id, "C1", "hi").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotConversationParticipant));
    }

    #[tokio::test]
    async fn blocked_conversation_is_read_only_until_unblocked() {
        let fx = Fixture::new();
        let (_, c) = fx.accepted("A1", "B1").await;
        fx.messages.send(c.id, "A1", "before").await.unwrap();

        fx.conversations.block(c.id, "B1").await.unwrap();
        let err = fx.messages.send(c.id, "A1", "during").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ConversationBlocked));

        let history = fx.messages.fetch(c.id, "B1", None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "before");

        fx.conversations.unblock(c.id, "B1").await.unwrap();
        fx.messages.send(c.id, "A1", "after").await.unwrap();
    }

    #[tokio::test]
    async fn fetch_marks_only_the_readers_messages() {
        let fx = Fixture::new();
        let (_, c) = fx.accepted("A1", "B1").await;
        fx.messages.send(c.id, "A1", "one").await.unwrap();
        fx.messages.send(c.id, "B1", "two").await.unwrap();
        fx.messages.send(c.id, "A1", "three").await.unwrap();

        let fetched = fx.messages.fetch(c.id, "B1", None).await.unwrap();
        let texts: Vec<&str> = fetched.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);

        let stored = fx.store.list_messages(c.id, 10).await.unwrap();
        for m in &stored {
            assert_eq!(m.read, m.receiver_id == "B1", "{}", m.text);
        }
        assert!(fetched.iter().filter(|m| m.receiver_id == "B1").all(|m| m.read));

        let limited = fx.messages.fetch(c.id, "A1", Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn only_the_recipient_reports_and_only_once() {
        let fx = Fixture::new();
        let (_, c) = fx.accepted("A1", "B1").await;
        let message = fx.messages.send(c.id, "A1", "rude").await.unwrap();

        let err = fx.messages.report(message.id, "A1", "spam").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::CannotReportMessage));

        let report = fx.messages.report(message.id, "B1", "spam").await.unwrap();
        assert_eq!(report.reported_user_id, "A1");
        assert_eq!(report.status, REPORT_STATUS_PENDING);

        let err = fx.messages.report(message.id, "B1", "spam again").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::DuplicateReport));

        let err = fx.messages.report(Uuid::now_v7(), "B1", "spam").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::MessageNotFound));
    }
}
