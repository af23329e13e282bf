use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use confessit_shared::errors::{AppError, AppResult, ErrorCode};

use super::UserNotifications;
use crate::models::{Conversation, Match, PublicProfile, User};
use crate::notifier::copy;
use crate::policy::{self, CooldownStatus};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct MatchFound {
    #[serde(rename = "match")]
    pub matched: Match,
    pub conversation_id: Uuid,
    pub matched_with: PublicProfile,
}

pub struct MatchmakingEngine {
    store: Arc<dyn Store>,
    notifications: UserNotifications,
}

impl MatchmakingEngine {
    pub fn new(store: Arc<dyn Store>, notifications: UserNotifications) -> Self {
        Self { store, notifications }
    }

    async fn load_user(&self, regno: &str) -> AppResult<User> {
        self.store
            .get_user(regno)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))
    }

    pub async fn check_cooldown(&self, regno: &str) -> AppResult<CooldownStatus> {
        let user = self.load_user(regno).await?;
        Ok(policy::check_cooldown(user.last_matchmaking_time, Utc::now()))
    }

    pub async fn find_match(&self, regno: &str) -> AppResult<MatchFound> {
        self.find_match_at(regno, Utc::now()).await
    }

    pub(crate) async fn find_match_at(&self, regno: &str, now: DateTime<Utc>) -> AppResult<MatchFound> {
        let user = self.load_user(regno).await?;

        if let CooldownStatus::Cooldown {
            remaining_secs,
            available_at,
        } = policy::check_cooldown(user.last_matchmaking_time, now)
        {
            metrics::counter!("matchmaking_attempts_total", "outcome" => "cooldown").increment(1);
            return Err(AppError::with_details(
                ErrorCode::CooldownActive,
                "matchmaking is cooling down",
                serde_json::json!({
                    "remaining_secs": remaining_secs,
                    "available_at": available_at,
                }),
            ));
        }

        let pool_size = self.store.count_candidates(regno, &user.gender).await?;
        let candidate = if pool_size > 0 {
            let offset = rand::thread_rng().gen_range(0..pool_size);
            self.store.candidate_at(regno, &user.gender, offset).await?
        } else {
            None
        };

        let Some(candidate) = candidate else {
            // An empty search still costs the attempt.
            self.store.touch_matchmaking_time(regno, now).await?;
            metrics::counter!("matchmaking_attempts_total", "outcome" => "no_candidates").increment(1);
            tracing::info!(user_id = %regno, "no eligible candidates");
            return Err(AppError::new(ErrorCode::NoCandidates, "no one is available to match right now"));
        };

        let m = self.store.insert_match(Match::open(regno, &candidate.regno, now)).await?;
        self.store.touch_matchmaking_time(regno, now).await?;
        let conversation = self.store.insert_conversation(Conversation::pending(&m, now)).await?;

        self.notifications
            .send(&candidate.regno, copy::MATCHED_HEADING, copy::MATCHED_BODY)
            .await;

        metrics::counter!("matchmaking_attempts_total", "outcome" => "matched").increment(1);
        metrics::counter!("matches_created_total").increment(1);
        tracing::info!(
            match_id = %m.id,
            conversation_id = %conversation.id,
            initiator = %regno,
            receiver = %candidate.regno,
            "match created"
        );

        Ok(MatchFound {
            matched: m,
            conversation_id: conversation.id,
            matched_with: PublicProfile::from(&candidate),
        })
    }
}
