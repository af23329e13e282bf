use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use confessit_shared::errors::{AppError, AppResult, ErrorCode};
use confessit_shared::types::api::ApiResponse;
use confessit_shared::types::auth::AuthUser;

use super::parse_id;
use crate::models::{Message, MessageReport};
use crate::AppState;

// --- Request DTOs ---

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 1000, message = "text must be 1-1000 characters"))]
    pub text: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReportMessageRequest {
    #[validate(length(min = 1, max = 500, message = "reason must be 1-500 characters"))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    pub limit: Option<i64>,
}

// --- Handlers ---

/// GET /conversations/:id/messages - history, oldest first; marks the caller's unread as read
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<FetchParams>,
) -> AppResult<Json<ApiResponse<Vec<Message>>>> {
    let messages = state
        .messages
        .fetch(parse_id(&id)?, &auth_user.regno, params.limit)
        .await?;
    Ok(Json(ApiResponse::ok(messages)))
}

/// POST /conversations/:id/messages
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<ApiResponse<Message>>> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;

    let message = state
        .messages
        .send(parse_id(&id)?, &auth_user.regno, &req.text)
        .await?;
    Ok(Json(ApiResponse::ok(message)))
}

/// POST /messages/:id/report
pub async fn report_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ReportMessageRequest>,
) -> AppResult<Json<ApiResponse<MessageReport>>> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;

    let report = state
        .messages
        .report(parse_id(&id)?, &auth_user.regno, &req.reason)
        .await?;
    Ok(Json(ApiResponse::ok_with_message(report, "report submitted")))
}
