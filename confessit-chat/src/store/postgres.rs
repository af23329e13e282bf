//! Postgres store backed by diesel. Queries run on tokio's blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use confessit_shared::clients::db::{checkout, DbPool};
use confessit_shared::errors::map_unique_violation;
use confessit_shared::{AppError, AppResult, ErrorCode};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use super::{ConversationStore, MatchStore, MessageStore, ReportStore, Store, UserStore};
use crate::models::{
    Conversation, ConversationStatus, Match, Message, MessageReport, User, ADMIN_BLOCKER,
};
use crate::schema::{conversations, matches, message_reports, messages, users};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = checkout(&pool)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| AppError::Internal(e.into()))?
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn get_user(&self, regno: &str) -> AppResult<Option<User>> {
        let regno = regno.to_string();
        self.with_conn(move |conn| {
            Ok(users::table.find(regno).first::<User>(conn).optional()?)
        })
        .await
    }

    async fn insert_user(&self, user: User) -> AppResult<User> {
        self.with_conn(move |conn| {
            diesel::insert_into(users::table)
                .values(&user)
                .get_result(conn)
                .map_err(|e| map_unique_violation(e, ErrorCode::Conflict, "user already exists"))
        })
        .await
    }

    async fn count_candidates(&self, exclude: &str, gender: &str) -> AppResult<i64> {
        let (exclude, gender) = (exclude.to_string(), gender.to_string());
        self.with_conn(move |conn| {
            Ok(users::table
                .filter(users::regno.ne(exclude))
                .filter(users::gender.ne(gender))
                .filter(users::is_matchmaking.eq(true))
                .count()
                .get_result::<i64>(conn)?)
        })
        .await
    }

    async fn candidate_at(&self, exclude: &str, gender: &str, offset: i64) -> AppResult<Option<User>> {
        if offset < 0 {
            return Ok(None);
        }
        let (exclude, gender) = (exclude.to_string(), gender.to_string());
        self.with_conn(move |conn| {
            Ok(users::table
                .filter(users::regno.ne(exclude))
                .filter(users::gender.ne(gender))
                .filter(users::is_matchmaking.eq(true))
                .order(users::regno.asc())
                .offset(offset)
                .first::<User>(conn)
                .optional()?)
        })
        .await
    }

    async fn touch_matchmaking_time(&self, regno: &str, at: DateTime<Utc>) -> AppResult<()> {
        let regno = regno.to_string();
        self.with_conn(move |conn| {
            let updated = diesel::update(users::table.find(regno))
                .set(users::last_matchmaking_time.eq(Some(at)))
                .execute(conn)?;
            if updated == 0 {
                return Err(AppError::new(ErrorCode::UserNotFound, "user not found"));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MatchStore for PgStore {
    async fn insert_match(&self, m: Match) -> AppResult<Match> {
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(matches::table).values(&m).get_result(conn)?)
        })
        .await
    }

    async fn get_match(&self, id: Uuid) -> AppResult<Option<Match>> {
        self.with_conn(move |conn| Ok(matches::table.find(id).first::<Match>(conn).optional()?))
            .await
    }

    async fn matches_for_user(&self, regno: &str, limit: i64) -> AppResult<Vec<Match>> {
        let regno = regno.to_string();
        self.with_conn(move |conn| {
            Ok(matches::table
                .filter(matches::user_a_id.eq(&regno).or(matches::user_b_id.eq(&regno)))
                .order(matches::created_at.desc())
                .limit(limit)
                .load::<Match>(conn)?)
        })
        .await
    }

    async fn matches_expiring_after(&self, marker: DateTime<Utc>) -> AppResult<Vec<Match>> {
        self.with_conn(move |conn| {
            Ok(matches::table
                .filter(matches::expires_at.gt(marker))
                .order(matches::expires_at.asc())
                .load::<Match>(conn)?)
        })
        .await
    }

    async fn collapse_match_expiry(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Match>> {
        self.with_conn(move |conn| {
            diesel::update(
                matches::table
                    .filter(matches::id.eq(id))
                    .filter(matches::expires_at.gt(at)),
            )
            .set(matches::expires_at.eq(at))
            .execute(conn)?;

            Ok(matches::table.find(id).first::<Match>(conn).optional()?)
        })
        .await
    }

    async fn list_matches(&self, limit: i64) -> AppResult<Vec<Match>> {
        self.with_conn(move |conn| {
            Ok(matches::table
                .order(matches::created_at.desc())
                .limit(limit)
                .load::<Match>(conn)?)
        })
        .await
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn insert_conversation(&self, conversation: Conversation) -> AppResult<Conversation> {
        self.with_conn(move |conn| {
            diesel::insert_into(conversations::table)
                .values(&conversation)
                .get_result(conn)
                .map_err(|e| {
                    map_unique_violation(
                        e,
                        ErrorCode::ConversationAlreadyExists,
                        "a conversation for this match already exists",
                    )
                })
        })
        .await
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        self.with_conn(move |conn| {
            Ok(conversations::table.find(id).first::<Conversation>(conn).optional()?)
        })
        .await
    }

    async fn get_conversation_by_match(&self, match_id: Uuid) -> AppResult<Option<Conversation>> {
        self.with_conn(move |conn| {
            Ok(conversations::table
                .filter(conversations::match_id.eq(match_id))
                .first::<Conversation>(conn)
                .optional()?)
        })
        .await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[ConversationStatus],
        to: ConversationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let from = from.to_vec();
        self.with_conn(move |conn| {
            let target = conversations::table
                .filter(conversations::id.eq(id))
                .filter(conversations::status.eq_any(from));

            let updated = match to {
                ConversationStatus::Requested => diesel::update(target)
                    .set((conversations::status.eq(to), conversations::requested_at.eq(Some(at))))
                    .get_result::<Conversation>(conn),
                ConversationStatus::Accepted => diesel::update(target)
                    .set((conversations::status.eq(to), conversations::accepted_at.eq(Some(at))))
                    .get_result::<Conversation>(conn),
                ConversationStatus::Terminated => diesel::update(target)
                    .set((conversations::status.eq(to), conversations::terminated_at.eq(Some(at))))
                    .get_result::<Conversation>(conn),
                _ => diesel::update(target)
                    .set(conversations::status.eq(to))
                    .get_result::<Conversation>(conn),
            };

            Ok(updated.optional()?)
        })
        .await
    }

    async fn terminate_conversation(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Conversation>> {
        self.with_conn(move |conn| {
            Ok(diesel::update(
                conversations::table
                    .filter(conversations::id.eq(id))
                    .filter(conversations::status.eq_any(ConversationStatus::TERMINABLE.to_vec())),
            )
            .set((
                conversations::status.eq(ConversationStatus::Terminated),
                conversations::terminated_at.eq(Some(at)),
                conversations::is_blocked.eq(true),
                conversations::blocked_by.eq(Some(ADMIN_BLOCKER)),
            ))
            .get_result::<Conversation>(conn)
            .optional()?)
        })
        .await
    }

    async fn set_blocked(&self, id: Uuid, actor: &str) -> AppResult<Option<Conversation>> {
        let actor = actor.to_string();
        self.with_conn(move |conn| {
            Ok(diesel::update(
                conversations::table
                    .filter(conversations::id.eq(id))
                    .filter(conversations::status.eq(ConversationStatus::Accepted))
                    .filter(conversations::is_blocked.eq(false)),
            )
            .set((
                conversations::is_blocked.eq(true),
                conversations::blocked_by.eq(Some(actor)),
            ))
            .get_result::<Conversation>(conn)
            .optional()?)
        })
        .await
    }

    async fn clear_blocked(&self, id: Uuid, actor: &str) -> AppResult<Option<Conversation>> {
        let actor = actor.to_string();
        self.with_conn(move |conn| {
            Ok(diesel::update(
                conversations::table
                    .filter(conversations::id.eq(id))
                    .filter(conversations::is_blocked.eq(true))
                    .filter(conversations::blocked_by.eq(actor)),
            )
            .set((
                conversations::is_blocked.eq(false),
                conversations::blocked_by.eq(None::<String>),
            ))
            .get_result::<Conversation>(conn)
            .optional()?)
        })
        .await
    }

    async fn update_last_message(&self, id: Uuid, preview: &str, at: DateTime<Utc>) -> AppResult<()> {
        let preview = preview.to_string();
        self.with_conn(move |conn| {
            diesel::update(conversations::table.find(id))
                .set((
                    conversations::last_message_preview.eq(Some(preview)),
                    conversations::last_message_at.eq(Some(at)),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
        limit: i64,
    ) -> AppResult<Vec<Conversation>> {
        self.with_conn(move |conn| {
            let mut query = conversations::table.into_boxed();
            if let Some(status) = status {
                query = query.filter(conversations::status.eq(status));
            }
            Ok(query
                .order(conversations::created_at.desc())
                .limit(limit)
                .load::<Conversation>(conn)?)
        })
        .await
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert_message(&self, message: Message) -> AppResult<Message> {
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(messages::table).values(&message).get_result(conn)?)
        })
        .await
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        self.with_conn(move |conn| Ok(messages::table.find(id).first::<Message>(conn).optional()?))
            .await
    }

    async fn list_messages(&self, conversation_id: Uuid, limit: i64) -> AppResult<Vec<Message>> {
        self.with_conn(move |conn| {
            Ok(messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .order((messages::timestamp.asc(), messages::id.asc()))
                .limit(limit)
                .load::<Message>(conn)?)
        })
        .await
    }

    async fn mark_read(&self, conversation_id: Uuid, receiver: &str) -> AppResult<usize> {
        let receiver = receiver.to_string();
        self.with_conn(move |conn| {
            Ok(diesel::update(
                messages::table
                    .filter(messages::conversation_id.eq(conversation_id))
                    .filter(messages::receiver_id.eq(receiver))
                    .filter(messages::read.eq(false)),
            )
            .set(messages::read.eq(true))
            .execute(conn)?)
        })
        .await
    }

    async fn messages_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Message>> {
        self.with_conn(move |conn| {
            Ok(messages::table
                .filter(messages::timestamp.lt(cutoff))
                .order((messages::timestamp.asc(), messages::id.asc()))
                .load::<Message>(conn)?)
        })
        .await
    }

    async fn delete_messages(&self, ids: &[Uuid]) -> AppResult<usize> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            Ok(diesel::delete(messages::table.filter(messages::id.eq_any(ids))).execute(conn)?)
        })
        .await
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn find_report(&self, message_id: Uuid, reporter: &str) -> AppResult<Option<MessageReport>> {
        let reporter = reporter.to_string();
        self.with_conn(move |conn| {
            Ok(message_reports::table
                .filter(message_reports::message_id.eq(message_id))
                .filter(message_reports::reporter_id.eq(reporter))
                .first::<MessageReport>(conn)
                .optional()?)
        })
        .await
    }

    async fn insert_report(&self, report: MessageReport) -> AppResult<MessageReport> {
        self.with_conn(move |conn| {
            diesel::insert_into(message_reports::table)
                .values(&report)
                .get_result(conn)
                .map_err(|e| {
                    map_unique_violation(
                        e,
                        ErrorCode::DuplicateReport,
                        "you have already reported this message",
                    )
                })
        })
        .await
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> AppResult<()> {
        self.with_conn(|conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(())
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
