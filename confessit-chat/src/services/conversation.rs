//! Conversation lifecycle.
//!
//! ```text
//! pending -> requested -> accepted -> expired      (sweeper)
//!                      \-> rejected
//! any non-final status  -> terminated               (admin)
//! ```
//!
//! `is_blocked` is orthogonal to the status and only applies while accepted.
//! Every transition is one conditional write; losing a race surfaces as
//! `InvalidTransition` rather than a silent no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use confessit_shared::errors::{AppError, AppResult, ErrorCode};

use super::live_session::{SessionIssuer, SessionToken};
use super::UserNotifications;
use crate::models::{Conversation, ConversationStatus, Match, PublicProfile, ADMIN_BLOCKER};
use crate::notifier::copy;
use crate::policy;
use crate::realtime::{ConnectionRegistry, ServerEvent, StatusChange};
use crate::store::Store;

pub const SYSTEM_ACTOR: &str = "system";

/// How many of a user's recent matches the current-state lookup considers.
const CURRENT_STATE_SCAN: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchRole {
    Initiator,
    Receiver,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationStatusView {
    pub conversation_id: Uuid,
    pub match_id: Uuid,
    pub status: ConversationStatus,
    pub initiator_id: String,
    pub receiver_id: String,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub is_blocked: bool,
    pub blocked_by: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub time_left_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentState {
    pub match_id: Uuid,
    pub role: MatchRole,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub time_left_seconds: i64,
    pub is_expired: bool,
    pub conversation_id: Option<Uuid>,
    /// Stored status, except that a lapsed match reads as `expired`.
    pub status: Option<ConversationStatus>,
    pub is_blocked: bool,
    pub blocked_by: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub counterpart: Option<PublicProfile>,
    pub session: Option<SessionToken>,
}

pub struct ConversationService {
    store: Arc<dyn Store>,
    notifications: UserNotifications,
    registry: ConnectionRegistry,
    sessions: SessionIssuer,
}

impl ConversationService {
    pub fn new(
        store: Arc<dyn Store>,
        notifications: UserNotifications,
        registry: ConnectionRegistry,
        sessions: SessionIssuer,
    ) -> Self {
        Self {
            store,
            notifications,
            registry,
            sessions,
        }
    }

    async fn load(&self, conversation_id: Uuid) -> AppResult<(Conversation, Match)> {
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
        Ok((conversation, m))
    }

    /// Loads the pair and checks membership against the match record.
    pub async fn ensure_participant(&self, conversation_id: Uuid, regno: &str) -> AppResult<(Conversation, Match)> {
        let (conversation, m) = self.load(conversation_id).await?;
        if !m.involves(regno) || !conversation.is_participant(regno) {
            return Err(AppError::new(
                ErrorCode::NotConversationParticipant,
                "you are not part of this conversation",
            ));
        }
        Ok((conversation, m))
    }

    async fn ensure_live(&self, conversation_id: Uuid, regno: &str, now: DateTime<Utc>) -> AppResult<(Conversation, Match)> {
        let (conversation, m) = self.ensure_participant(conversation_id, regno).await?;
        if m.is_expired(now) {
            return Err(AppError::new(ErrorCode::MatchExpired, "this match has ended"));
        }
        Ok((conversation, m))
    }

    async fn apply(
        &self,
        conversation: &Conversation,
        from: ConversationStatus,
        to: ConversationStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Conversation> {
        let updated = self
            .store
            .transition_status(conversation.id, &[from], to, now)
            .await?
            .ok_or_else(|| {
                AppError::new(
                    ErrorCode::InvalidTransition,
                    format!("cannot move a {} conversation to {to}", conversation.status),
                )
            })?;
        metrics::counter!("conversation_transitions_total", "to" => to.as_str()).increment(1);
        Ok(updated)
    }

    async fn announce(&self, conversation: &Conversation, actor: &str, reason: Option<&str>) {
        let event = ServerEvent::ConversationStatusUpdate {
            conversation_id: conversation.id,
            match_id: conversation.match_id,
            status: StatusChange {
                status: conversation.status,
                actor: actor.to_string(),
                reason: reason.map(str::to_string),
                is_blocked: conversation.is_blocked,
            },
            timestamp: Utc::now(),
        };
        self.registry
            .broadcast_to_conversation(conversation.id, event, None)
            .await;
    }

    pub async fn request(&self, conversation_id: Uuid, regno: &str) -> AppResult<Conversation> {
        let now = Utc::now();
        let (conversation, m) = self.ensure_live(conversation_id, regno, now).await?;
        if m.user_a_id != regno {
            return Err(AppError::forbidden("only the initiator can request a conversation"));
        }

        let updated = self
            .apply(&conversation, ConversationStatus::Pending, ConversationStatus::Requested, now)
            .await?;
        tracing::info!(conversation_id = %updated.id, user_id = %regno, "conversation requested");

        self.announce(&updated, regno, None).await;
        self.notifications
            .send(&updated.receiver_id, copy::REQUEST_HEADING, copy::REQUEST_BODY)
            .await;
        Ok(updated)
    }

    pub async fn accept(&self, conversation_id: Uuid, regno: &str) -> AppResult<Conversation> {
        let now = Utc::now();
        let (conversation, m) = self.ensure_live(conversation_id, regno, now).await?;
        if m.user_b_id != regno {
            return Err(AppError::forbidden("only the receiver can accept a conversation"));
        }

        let updated = self
            .apply(&conversation, ConversationStatus::Requested, ConversationStatus::Accepted, now)
            .await?;
        tracing::info!(conversation_id = %updated.id, user_id = %regno, "conversation accepted");

        self.announce(&updated, regno, None).await;
        self.notifications
            .send(&updated.initiator_id, copy::ACCEPTED_HEADING, copy::ACCEPTED_BODY)
            .await;
        Ok(updated)
    }

    pub async fn reject(&self, conversation_id: Uuid, regno: &str) -> AppResult<Conversation> {
        let now = Utc::now();
        let (conversation, m) = self.ensure_live(conversation_id, regno, now).await?;
        if m.user_b_id != regno {
            return Err(AppError::forbidden("only the receiver can reject a conversation"));
        }

        let updated = self
            .apply(&conversation, ConversationStatus::Requested, ConversationStatus::Rejected, now)
            .await?;
        tracing::info!(conversation_id = %updated.id, user_id = %regno, "conversation rejected");

        self.announce(&updated, regno, None).await;
        self.notifications
            .send(&updated.initiator_id, copy::REJECTED_HEADING, copy::REJECTED_BODY)
            .await;
        Ok(updated)
    }

    pub async fn block(&self, conversation_id: Uuid, regno: &str) -> AppResult<Conversation> {
        let (conversation, _) = self.ensure_live(conversation_id, regno, Utc::now()).await?;

        let Some(updated) = self.store.set_blocked(conversation.id, regno).await? else {
            return Err(if conversation.status != ConversationStatus::Accepted {
                AppError::new(ErrorCode::ConversationNotActive, "only an active conversation can be blocked")
            } else {
                AppError::new(ErrorCode::AlreadyBlocked, "conversation is already blocked")
            });
        };
        tracing::info!(conversation_id = %updated.id, user_id = %regno, "conversation blocked");

        self.announce(&updated, regno, Some("blocked")).await;
        Ok(updated)
    }

    pub async fn unblock(&self, conversation_id: Uuid, regno: &str) -> AppResult<Conversation> {
        let (conversation, _) = self.ensure_live(conversation_id, regno, Utc::now()).await?;

        let Some(updated) = self.store.clear_blocked(conversation.id, regno).await? else {
            return Err(if conversation.is_blocked {
                AppError::new(ErrorCode::NotBlocker, "only the participant who blocked can unblock")
            } else {
                AppError::conflict("conversation is not blocked")
            });
        };
        tracing::info!(conversation_id = %updated.id, user_id = %regno, "conversation unblocked");

        self.announce(&updated, regno, Some("unblocked")).await;
        Ok(updated)
    }

    /// Administrative shutdown: stored first, then announced.
    pub async fn terminate(&self, conversation_id: Uuid, admin: &str) -> AppResult<Conversation> {
        let now = Utc::now();
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))?;

        let updated = self
            .store
            .terminate_conversation(conversation.id, now)
            .await?
            .ok_or_else(|| {
                AppError::new(
                    ErrorCode::InvalidTransition,
                    format!("a {} conversation cannot be terminated", conversation.status),
                )
            })?;
        self.store.collapse_match_expiry(updated.match_id, now).await?;
        metrics::counter!("conversation_transitions_total", "to" => "terminated").increment(1);
        tracing::warn!(conversation_id = %updated.id, admin = %admin, "conversation terminated by admin");

        self.announce(&updated, ADMIN_BLOCKER, Some("terminated by an administrator")).await;
        self.registry
            .broadcast_to_conversation(
                updated.id,
                ServerEvent::MatchExpired {
                    match_id: updated.match_id,
                    timestamp: now,
                },
                None,
            )
            .await;
        Ok(updated)
    }

    /// Moves an accepted conversation to expired. Returns false when it was in
    /// any other status.
    pub async fn expire(&self, conversation_id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        let Some(updated) = self
            .store
            .transition_status(
                conversation_id,
                &[ConversationStatus::Accepted],
                ConversationStatus::Expired,
                now,
            )
            .await?
        else {
            return Ok(false);
        };
        metrics::counter!("conversation_transitions_total", "to" => "expired").increment(1);
        tracing::info!(conversation_id = %updated.id, "conversation expired");

        self.announce(&updated, SYSTEM_ACTOR, Some("match window elapsed")).await;
        Ok(true)
    }

    pub async fn get_status(&self, conversation_id: Uuid, regno: &str) -> AppResult<ConversationStatusView> {
        let now = Utc::now();
        let (c, m) = self.ensure_live(conversation_id, regno, now).await?;
        Ok(ConversationStatusView {
            conversation_id: c.id,
            match_id: m.id,
            status: c.status,
            initiator_id: c.initiator_id,
            receiver_id: c.receiver_id,
            created_at: c.created_at,
            accepted_at: c.accepted_at,
            is_blocked: c.is_blocked,
            blocked_by: c.blocked_by,
            expires_at: m.expires_at,
            time_left_seconds: policy::seconds_left(m.expires_at, now).max(0),
        })
    }

    /// Credential for the realtime channel; only for a live accepted conversation.
    pub async fn session_credential(&self, conversation_id: Uuid, regno: &str) -> AppResult<SessionToken> {
        let (conversation, m) = self.ensure_live(conversation_id, regno, Utc::now()).await?;
        if conversation.status != ConversationStatus::Accepted {
            return Err(AppError::new(
                ErrorCode::ConversationNotActive,
                "the conversation has not been accepted",
            ));
        }
        self.sessions.issue(regno, &conversation, &m)
    }

    /// The user's most relevant match: a live one they initiated, else a live
    /// one they received, else their most recent one.
    pub async fn current_state(&self, regno: &str) -> AppResult<Option<CurrentState>> {
        let now = Utc::now();
        let matches = self.store.matches_for_user(regno, CURRENT_STATE_SCAN).await?;

        let live = |initiator: bool| {
            matches
                .iter()
                .find(|m| !m.is_expired(now) && (m.user_a_id == regno) == initiator)
        };
        let Some(m) = live(true).or_else(|| live(false)).or_else(|| matches.first()).cloned() else {
            return Ok(None);
        };

        let is_expired = m.is_expired(now);
        let conversation = self.store.get_conversation_by_match(m.id).await?;
        let counterpart = match m.counterpart_of(regno) {
            Some(other) => self.store.get_user(other).await?.as_ref().map(PublicProfile::from),
            None => None,
        };

        let status = conversation.as_ref().map(|c| {
            if is_expired && !c.status.is_final() {
                ConversationStatus::Expired
            } else {
                c.status
            }
        });

        let session = match &conversation {
            Some(c) if c.status == ConversationStatus::Accepted && !is_expired => {
                Some(self.sessions.issue(regno, c, &m)?)
            }
            _ => None,
        };

        Ok(Some(CurrentState {
            match_id: m.id,
            role: if m.user_a_id == regno {
                MatchRole::Initiator
            } else {
                MatchRole::Receiver
            },
            created_at: m.created_at,
            expires_at: m.expires_at,
            time_left_seconds: policy::seconds_left(m.expires_at, now).max(0),
            is_expired,
            conversation_id: conversation.as_ref().map(|c| c.id),
            status,
            is_blocked: conversation.as_ref().is_some_and(|c| c.is_blocked),
            blocked_by: conversation.as_ref().and_then(|c| c.blocked_by.clone()),
            last_message_preview: conversation.as_ref().and_then(|c| c.last_message_preview.clone()),
            last_message_at: conversation.as_ref().and_then(|c| c.last_message_at),
            counterpart,
            session,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConversationStore, MatchStore};
    use crate::testing::{Fixture, RecordingNotifier};
    use chrono::Duration;

    #[tokio::test]
    async fn request_then_accept() {
        let fx = Fixture::new();
        fx.add_user("A1", "male").await;
        fx.add_user("B1", "female").await;
        let (_, c) = fx
            .conversation("A1", "B1", ConversationStatus::Pending, Utc::now())
            .await;

        let requested = fx.conversations.request(c.id, "A1").await.unwrap();
        assert_eq!(requested.status, ConversationStatus::Requested);
        assert!(requested.requested_at.is_some());

        let accepted = fx.conversations.accept(c.id, "B1").await.unwrap();
        assert_eq!(accepted.status, ConversationStatus::Accepted);
        assert!(accepted.accepted_at.is_some());

        assert_eq!(fx.notifier.recipients(), vec!["B1".to_string(), "A1".to_string()]);
    }

    #[tokio::test]
    async fn repeated_request_is_a_conflict() {
        let fx = Fixture::new();
        let (_, c) = fx
            .conversation("A1", "B1", ConversationStatus::Pending, Utc::now())
            .await;

        fx.conversations.request(c.id, "A1").await.unwrap();
        let err = fx.conversations.request(c.id, "A1").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidTransition));
    }

    #[tokio::test]
    async fn roles_are_enforced() {
        let fx = Fixture::new();
        let (_, c) = fx
            .conversation("A1", "B1", ConversationStatus::Pending, Utc::now())
            .await;

        let err = fx.conversations.request(c.id, "B1").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Forbidden));
        let err = fx.conversations.request(c.id, "C1").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotConversationParticipant));

        fx.conversations.request(c.id, "A1").await.unwrap();
        let err = fx.conversations.accept(c.id, "A1").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Forbidden));
    }

    #[tokio::test]
    async fn expired_match_blocks_transitions() {
        let fx = Fixture::new();
        let (_, c) = fx
            .conversation("A1", "B1", ConversationStatus::Pending, Utc::now() - Duration::hours(5))
            .await;

        let err = fx.conversations.request(c.id, "A1").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::MatchExpired));
    }

    #[tokio::test]
    async fn status_never_moves_backward() {
        let fx = Fixture::new();
        let (_, c) = fx
            .conversation("A1", "B1", ConversationStatus::Pending, Utc::now())
            .await;

        fx.conversations.request(c.id, "A1").await.unwrap();
        fx.conversations.reject(c.id, "B1").await.unwrap();
        let rank = |s: ConversationStatus| s.rank();
        let mut last = rank(ConversationStatus::Rejected);

        for attempt in [
            fx.conversations.request(c.id, "A1").await,
            fx.conversations.accept(c.id, "B1").await,
            fx.conversations.reject(c.id, "B1").await,
        ] {
            assert!(attempt.is_err());
            let now = fx.store.get_conversation(c.id).await.unwrap().unwrap().status;
            assert!(rank(now) >= last);
            last = rank(now);
        }

        assert!(!fx.conversations.expire(c.id, Utc::now()).await.unwrap());
        let terminated = fx.conversations.terminate(c.id, "admin").await.unwrap();
        assert_eq!(terminated.status, ConversationStatus::Terminated);
        let err = fx.conversations.terminate(c.id, "admin").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidTransition));
    }

    #[tokio::test]
    async fn block_and_unblock_belong_to_the_blocker() {
        let fx = Fixture::new();
        let (_, c) = fx.accepted("A1", "B1").await;

        let blocked = fx.conversations.block(c.id, "B1").await.unwrap();
        assert!(blocked.is_blocked);
        assert_eq!(blocked.status, ConversationStatus::Accepted);

        let err = fx.conversations.block(c.id, "A1").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::AlreadyBlocked));
        let err = fx.conversations.unblock(c.id, "A1").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotBlocker));

        let cleared = fx.conversations.unblock(c.id, "B1").await.unwrap();
        assert!(!cleared.is_blocked);
        assert!(cleared.blocked_by.is_none());
    }

    #[tokio::test]
    async fn block_requires_accepted() {
        let fx = Fixture::new();
        let (_, c) = fx
            .conversation("A1", "B1", ConversationStatus::Requested, Utc::now())
            .await;
        let err = fx.conversations.block(c.id, "B1").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ConversationNotActive));
    }

    #[tokio::test]
    async fn terminate_collapses_the_match_and_announces() {
        let fx = Fixture::new();
        let (m, c) = fx.accepted("A1", "B1").await;
        let (_conn, mut rx) = fx.registry.register("A1", c.id).await;

        let terminated = fx.conversations.terminate(c.id, "root").await.unwrap();
        assert!(terminated.is_blocked);
        assert_eq!(terminated.blocked_by.as_deref(), Some(ADMIN_BLOCKER));
        assert!(terminated.terminated_at.is_some());

        let collapsed = fx.store.get_match(m.id).await.unwrap().unwrap();
        assert!(collapsed.expires_at <= Utc::now());

        match rx.try_recv().unwrap() {
            ServerEvent::ConversationStatusUpdate { status, .. } => {
                assert_eq!(status.status, ConversationStatus::Terminated);
                assert_eq!(status.actor, ADMIN_BLOCKER);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::MatchExpired { .. }));
    }

    #[tokio::test]
    async fn notification_failure_does_not_undo_the_transition() {
        let fx = Fixture::with_notifier(RecordingNotifier::failing());
        fx.add_user("A1", "male").await;
        fx.add_user("B1", "female").await;
        let (_, c) = fx
            .conversation("A1", "B1", ConversationStatus::Pending, Utc::now())
            .await;

        let requested = fx.conversations.request(c.id, "A1").await.unwrap();
        assert_eq!(requested.status, ConversationStatus::Requested);
        assert_eq!(fx.notifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn current_state_prefers_live_initiated_match() {
        let fx = Fixture::new();
        fx.add_user("A1", "male").await;
        fx.add_user("B1", "female").await;
        fx.add_user("C1", "female").await;
        let now = Utc::now();

        fx.conversation("C1", "A1", ConversationStatus::Pending, now).await;
        let (mine, c) = fx
            .conversation("A1", "B1", ConversationStatus::Accepted, now - Duration::minutes(5))
            .await;

        let state = fx.conversations.current_state("A1").await.unwrap().unwrap();
        assert_eq!(state.match_id, mine.id);
        assert_eq!(state.role, MatchRole::Initiator);
        assert_eq!(state.conversation_id, Some(c.id));
        assert_eq!(state.counterpart.unwrap().regno, "B1");
        let session = state.session.unwrap();
        assert_eq!(fx.sessions.verify(&session.token).unwrap().conversation_id, c.id);
    }

    #[tokio::test]
    async fn current_state_falls_back_to_expired_match() {
        let fx = Fixture::new();
        let (m, _) = fx
            .conversation("A1", "B1", ConversationStatus::Requested, Utc::now() - Duration::hours(6))
            .await;

        let state = fx.conversations.current_state("B1").await.unwrap().unwrap();
        assert_eq!(state.match_id, m.id);
        assert_eq!(state.role, MatchRole::Receiver);
        assert!(state.is_expired);
        assert_eq!(state.status, Some(ConversationStatus::Expired));
        assert_eq!(state.time_left_seconds, 0);
        assert!(state.session.is_none());

        assert!(fx.conversations.current_state("Z9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_requires_accepted() {
        let fx = Fixture::new();
        let (_, c) = fx
            .conversation("A1", "B1", ConversationStatus::Requested, Utc::now())
            .await;
        let err = fx.conversations.session_credential(c.id, "A1").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ConversationNotActive));

        let (_, live) = fx.accepted("A2", "B2").await;
        assert!(fx.conversations.session_credential(live.id, "B2").await.is_ok());
    }
}
