use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::io::Write;
use uuid::Uuid;

use crate::policy;
use crate::schema::{conversations, matches, message_reports, messages, users};

// --- User ---

#[derive(Debug, Queryable, Insertable, Identifiable, Serialize, Deserialize, Clone)]
#[diesel(table_name = users, primary_key(regno))]
pub struct User {
    pub regno: String,
    pub name: String,
    pub email: String,
    pub username: Option<String>,
    pub emoji: Option<String>,
    pub bio: Option<String>,
    pub which_class: Option<String>,
    pub profile_picture_id: Option<String>,
    pub gender: String,
    pub interests: Vec<String>,
    pub is_matchmaking: bool,
    pub is_notifications: bool,
    pub user_role: String,
    pub last_matchmaking_time: Option<DateTime<Utc>>,
}

/// What one participant may see of the other: no gender, no contact fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicProfile {
    pub regno: String,
    pub name: String,
    pub username: Option<String>,
    pub profile_picture_id: Option<String>,
    pub which_class: Option<String>,
    pub bio: Option<String>,
    pub interests: Vec<String>,
}

impl From<&User> for PublicProfile {
    fn from(user: &User) -> Self {
        Self {
            regno: user.regno.clone(),
            name: user.name.clone(),
            username: user.username.clone(),
            profile_picture_id: user.profile_picture_id.clone(),
            which_class: user.which_class.clone(),
            bio: user.bio.clone(),
            interests: user.interests.clone(),
        }
    }
}

// --- Match ---

#[derive(Debug, Queryable, Insertable, Identifiable, Serialize, Deserialize, Clone, PartialEq)]
#[diesel(table_name = matches)]
pub struct Match {
    pub id: Uuid,
    /// The initiator: the user whose search created this match.
    pub user_a_id: String,
    /// The candidate picked for the initiator.
    pub user_b_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Match {
    pub fn open(initiator: &str, candidate: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_a_id: initiator.to_string(),
            user_b_id: candidate.to_string(),
            created_at: now,
            expires_at: policy::match_expires_at(now),
        }
    }

    pub fn involves(&self, regno: &str) -> bool {
        self.user_a_id == regno || self.user_b_id == regno
    }

    pub fn counterpart_of(&self, regno: &str) -> Option<&str> {
        if self.user_a_id == regno {
            Some(&self.user_b_id)
        } else if self.user_b_id == regno {
            Some(&self.user_a_id)
        } else {
            None
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        policy::is_expired(self.expires_at, now)
    }
}

// --- Conversation ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Pending,
    Requested,
    Accepted,
    Rejected,
    Expired,
    Terminated,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Terminated => "terminated",
        }
    }

    /// Position in the lifecycle; a legal transition always increases it.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Requested => 1,
            Self::Accepted | Self::Rejected => 2,
            Self::Expired | Self::Terminated => 3,
        }
    }

    pub fn is_final(&self) -> bool {
        self.rank() == 3
    }

    /// Statuses an administrator may terminate from.
    pub const TERMINABLE: &'static [ConversationStatus] = &[
        ConversationStatus::Pending,
        ConversationStatus::Requested,
        ConversationStatus::Accepted,
        ConversationStatus::Rejected,
    ];
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "requested" => Ok(Self::Requested),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "terminated" => Ok(Self::Terminated),
            _ => Err(format!("unknown conversation status: {s}")),
        }
    }
}

impl ToSql<Text, Pg> for ConversationStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for ConversationStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        Ok(raw.parse()?)
    }
}

#[derive(Debug, Queryable, Insertable, Identifiable, Serialize, Deserialize, Clone, PartialEq)]
#[diesel(table_name = conversations)]
pub struct Conversation {
    pub id: Uuid,
    pub match_id: Uuid,
    pub initiator_id: String,
    pub receiver_id: String,
    pub status: ConversationStatus,
    pub requested_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub is_blocked: bool,
    pub blocked_by: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn pending(m: &Match, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            match_id: m.id,
            initiator_id: m.user_a_id.clone(),
            receiver_id: m.user_b_id.clone(),
            status: ConversationStatus::Pending,
            requested_at: None,
            accepted_at: None,
            terminated_at: None,
            is_blocked: false,
            blocked_by: None,
            last_message_preview: None,
            last_message_at: None,
            created_at: now,
        }
    }

    pub fn is_participant(&self, regno: &str) -> bool {
        self.initiator_id == regno || self.receiver_id == regno
    }

    pub fn other_participant(&self, regno: &str) -> &str {
        if self.initiator_id == regno {
            &self.receiver_id
        } else {
            &self.initiator_id
        }
    }
}

/// `blocked_by` value used when an administrator terminates a conversation.
pub const ADMIN_BLOCKER: &str = "admin";

// --- Message ---

#[derive(Debug, Queryable, Insertable, Identifiable, Serialize, Deserialize, Clone, PartialEq)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

// --- MessageReport ---

#[derive(Debug, Queryable, Insertable, Identifiable, Serialize, Deserialize, Clone)]
#[diesel(table_name = message_reports)]
pub struct MessageReport {
    pub id: Uuid,
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub reporter_id: String,
    pub reported_user_id: String,
    pub reason: String,
    pub reported_at: DateTime<Utc>,
    pub status: String,
}

pub const REPORT_STATUS_PENDING: &str = "pending";
