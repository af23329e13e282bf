use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use confessit_shared::errors::{AppError, AppResult, ErrorCode};
use confessit_shared::middleware::AdminUser;
use confessit_shared::types::api::ApiResponse;

use super::parse_id;
use crate::models::{Conversation, ConversationStatus, Match, Message};
use crate::services::archival::{ArchiveFile, ArchiveFilter, ArchiveSummary};
use crate::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;
const DEFAULT_ARCHIVE_AGE_HOURS: i64 = 4;
const MAX_ARCHIVE_AGE_HOURS: i64 = 87_600;

#[derive(Debug, Deserialize)]
pub struct ConversationListParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ArchiveRequest {
    #[validate(custom = "validate_archive_age")]
    pub older_than_hours: Option<i64>,
}

fn validate_archive_age(hours: i64) -> Result<(), ValidationError> {
    if (0..=MAX_ARCHIVE_AGE_HOURS).contains(&hours) {
        Ok(())
    } else {
        let mut err = ValidationError::new("archive_age");
        err.message = Some("older_than_hours must be between 0 and 87600".into());
        Err(err)
    }
}

fn list_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// GET /admin/conversations?status=&limit=
pub async fn list_conversations(
    AdminUser(_admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConversationListParams>,
) -> AppResult<Json<ApiResponse<Vec<Conversation>>>> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<ConversationStatus>)
        .transpose()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e))?;

    let conversations = state
        .store
        .list_conversations(status, list_limit(params.limit))
        .await?;
    Ok(Json(ApiResponse::ok(conversations)))
}

/// POST /admin/conversations/:id/terminate
pub async fn terminate(
    AdminUser(admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Conversation>>> {
    let conversation = state
        .conversations
        .terminate(parse_id(&id)?, &admin.regno)
        .await?;
    Ok(Json(ApiResponse::ok_with_message(conversation, "conversation terminated")))
}

/// GET /admin/matches?limit=
pub async fn list_matches(
    AdminUser(_admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<ApiResponse<Vec<Match>>>> {
    let matches = state.store.list_matches(list_limit(params.limit)).await?;
    Ok(Json(ApiResponse::ok(matches)))
}

/// POST /admin/archives - move messages older than the given age to disk
pub async fn create_archive(
    AdminUser(admin): AdminUser,
    State(state): State<Arc<AppState>>,
    body: Option<Json<ArchiveRequest>>,
) -> AppResult<Json<ApiResponse<ArchiveSummary>>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;
    let hours = req.older_than_hours.unwrap_or(DEFAULT_ARCHIVE_AGE_HOURS);

    tracing::info!(admin = %admin.regno, older_than_hours = hours, "archive requested");
    let summary = state.archiver.archive(chrono::Duration::hours(hours)).await?;
    Ok(Json(ApiResponse::ok(summary)))
}

/// GET /admin/archives
pub async fn list_archives(
    AdminUser(_admin): AdminUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ArchiveFile>>>> {
    Ok(Json(ApiResponse::ok(state.archiver.list_archives().await?)))
}

/// GET /admin/archives/:date?user=&conversation_id=
pub async fn read_archive(
    AdminUser(_admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
    Query(filter): Query<ArchiveFilter>,
) -> AppResult<Json<ApiResponse<Vec<Message>>>> {
    let messages = state.archiver.read_archive(&date, filter).await?;
    Ok(Json(ApiResponse::ok(messages)))
}
