//! Time policy: cooldown and match windows, expiry derivation, and the small
//! limits shared by the conversation and message paths.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const COOLDOWN_WINDOW_HOURS: i64 = 4;
pub const MATCH_WINDOW_HOURS: i64 = 4;

pub const DEFAULT_FETCH_LIMIT: i64 = 200;
pub const MAX_FETCH_LIMIT: i64 = 500;

pub const PREVIEW_MAX_CHARS: usize = 100;

pub fn cooldown_window() -> Duration {
    Duration::hours(COOLDOWN_WINDOW_HOURS)
}

pub fn match_window() -> Duration {
    Duration::hours(MATCH_WINDOW_HOURS)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CooldownStatus {
    Eligible,
    Cooldown {
        remaining_secs: i64,
        available_at: DateTime<Utc>,
    },
}

impl CooldownStatus {
    pub fn is_eligible(&self) -> bool {
        matches!(self, CooldownStatus::Eligible)
    }
}

/// Eligible iff the user never searched, or the last search is at least one
/// cooldown window old.
pub fn check_cooldown(last_matchmaking_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> CooldownStatus {
    let Some(last) = last_matchmaking_time else {
        return CooldownStatus::Eligible;
    };

    let available_at = last + cooldown_window();
    if now >= available_at {
        CooldownStatus::Eligible
    } else {
        CooldownStatus::Cooldown {
            remaining_secs: (available_at - now).num_seconds().max(1),
            available_at,
        }
    }
}

pub fn match_expires_at(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + match_window()
}

/// Expiry is always derived from wall-clock time, never stored.
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > expires_at
}

/// Independent of the match record: a conversation never outlives one match
/// window from its own creation.
pub fn conversation_window_elapsed(created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > created_at + match_window()
}

pub fn seconds_left(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_seconds()
}

pub fn clamp_fetch_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_FETCH_LIMIT).clamp(1, MAX_FETCH_LIMIT)
}

pub fn message_preview(text: &str) -> String {
    text.chars().take(PREVIEW_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_searched_is_eligible() {
        assert_eq!(check_cooldown(None, Utc::now()), CooldownStatus::Eligible);
    }

    #[test]
    fn cooldown_boundary() {
        let now = Utc::now();

        let just_inside = check_cooldown(Some(now - cooldown_window() + Duration::seconds(30)), now);
        match just_inside {
            CooldownStatus::Cooldown { remaining_secs, .. } => assert_eq!(remaining_secs, 30),
            other => panic!("expected cooldown, got {other:?}"),
        }

        assert!(check_cooldown(Some(now - cooldown_window()), now).is_eligible());
        assert!(check_cooldown(Some(now - Duration::hours(5)), now).is_eligible());
    }

    #[test]
    fn expiry_is_strictly_after() {
        let now = Utc::now();
        assert!(!is_expired(now, now));
        assert!(is_expired(now - Duration::seconds(1), now));
        assert_eq!(match_expires_at(now) - now, Duration::hours(4));
    }

    #[test]
    fn fetch_limit_is_clamped() {
        assert_eq!(clamp_fetch_limit(None), 200);
        assert_eq!(clamp_fetch_limit(Some(10_000)), 500);
        assert_eq!(clamp_fetch_limit(Some(0)), 1);
        assert_eq!(clamp_fetch_limit(Some(42)), 42);
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let text = "é".repeat(150);
        let preview = message_preview(&text);
        assert_eq!(preview.chars().count(), 100);
        assert_eq!(message_preview("hi"), "hi");
    }
}
