//! Background expiry sweep.
//!
//! Each tick looks at every match expiring after the previous tick, expires
//! accepted conversations whose match has lapsed, and warns participants of
//! matches about to lapse. A failing match is logged and skipped, and the
//! next tick starts just before it so it is picked up again.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use confessit_shared::errors::AppResult;

use crate::models::Match;
use crate::policy;
use crate::realtime::{ConnectionRegistry, ServerEvent};
use crate::services::conversation::ConversationService;
use crate::store::Store;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired_matches: usize,
    pub expired_conversations: usize,
    pub warnings: usize,
    pub failures: usize,
    /// Earliest `expires_at` among matches that failed this tick.
    pub earliest_failure: Option<DateTime<Utc>>,
}

impl SweepReport {
    /// Where the following tick should start scanning.
    pub fn next_marker(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.earliest_failure {
            Some(at) => (at - Duration::microseconds(1)).min(now),
            None => now,
        }
    }
}

enum Outcome {
    Expired { conversation_expired: bool },
    Warned,
    Idle,
}

pub struct ExpirySweeper {
    store: Arc<dyn Store>,
    conversations: Arc<ConversationService>,
    registry: ConnectionRegistry,
    warning_window: Duration,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn Store>,
        conversations: Arc<ConversationService>,
        registry: ConnectionRegistry,
        warning_window: Duration,
    ) -> Self {
        Self {
            store,
            conversations,
            registry,
            warning_window,
        }
    }

    pub async fn sweep_once(&self, marker: DateTime<Utc>, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let matches = self.store.matches_expiring_after(marker).await?;
        let mut report = SweepReport {
            scanned: matches.len(),
            ..SweepReport::default()
        };

        for m in &matches {
            match self.process(m, now).await {
                Ok(Outcome::Expired { conversation_expired }) => {
                    report.expired_matches += 1;
                    if conversation_expired {
                        report.expired_conversations += 1;
                    }
                }
                Ok(Outcome::Warned) => report.warnings += 1,
                Ok(Outcome::Idle) => {}
                Err(e) => {
                    report.failures += 1;
                    report.earliest_failure = Some(
                        report
                            .earliest_failure
                            .map_or(m.expires_at, |at| at.min(m.expires_at)),
                    );
                    tracing::error!(error = %e, match_id = %m.id, "failed to sweep match");
                }
            }
        }

        metrics::counter!("sweeper_expired_conversations_total").increment(report.expired_conversations as u64);
        metrics::counter!("sweeper_warnings_total").increment(report.warnings as u64);
        Ok(report)
    }

    async fn process(&self, m: &Match, now: DateTime<Utc>) -> AppResult<Outcome> {
        let conversation = self.store.get_conversation_by_match(m.id).await?;

        if m.expires_at <= now {
            // Status is stored before anything is announced.
            let conversation_expired = match &conversation {
                Some(c) => self.conversations.expire(c.id, now).await?,
                None => false,
            };
            let event = ServerEvent::MatchExpired {
                match_id: m.id,
                timestamp: now,
            };
            self.announce(m, conversation.as_ref().map(|c| c.id), event).await;
            return Ok(Outcome::Expired { conversation_expired });
        }

        let time_left = policy::seconds_left(m.expires_at, now);
        if time_left <= self.warning_window.num_seconds() {
            let event = ServerEvent::MatchExpiryWarning {
                match_id: m.id,
                time_left_seconds: time_left,
                timestamp: now,
            };
            self.announce(m, conversation.as_ref().map(|c| c.id), event).await;
            return Ok(Outcome::Warned);
        }

        Ok(Outcome::Idle)
    }

    /// Conversation channel when there is one, otherwise both users directly.
    async fn announce(&self, m: &Match, conversation_id: Option<uuid::Uuid>, event: ServerEvent) {
        match conversation_id {
            Some(id) => {
                self.registry.broadcast_to_conversation(id, event, None).await;
            }
            None => {
                self.registry.broadcast_to_user(&m.user_a_id, event.clone()).await;
                self.registry.broadcast_to_user(&m.user_b_id, event).await;
            }
        }
    }
}

/// Runs the sweep every `period` until `cancel` fires. The first tick looks
/// back `startup_grace`; later ticks start where the previous one ended.
pub fn spawn_expiry_sweeper(
    sweeper: ExpirySweeper,
    period: std::time::Duration,
    startup_grace: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(period_secs = period.as_secs(), "expiry sweeper started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut marker = Utc::now() - startup_grace;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = Utc::now();
                    match sweeper.sweep_once(marker, now).await {
                        Ok(report) => {
                            if report != SweepReport::default() {
                                tracing::debug!(?report, "sweep finished");
                            }
                            marker = report.next_marker(now);
                        }
                        // Marker stays put so the next tick covers this window again.
                        Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
                    }
                }
            }
        }

        tracing::info!("expiry sweeper stopped");
    })
}
