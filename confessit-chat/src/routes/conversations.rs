use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use confessit_shared::errors::AppResult;
use confessit_shared::types::api::ApiResponse;
use confessit_shared::types::auth::AuthUser;

use super::parse_id;
use crate::models::Conversation;
use crate::services::conversation::{ConversationStatusView, CurrentState};
use crate::services::live_session::SessionToken;
use crate::AppState;

/// GET /conversations/current - the caller's most relevant match, if any
pub async fn current(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Option<CurrentState>>>> {
    let current = state.conversations.current_state(&auth_user.regno).await?;
    Ok(Json(match current {
        Some(current) => ApiResponse::ok(Some(current)),
        None => ApiResponse::ok_with_message(None, "no match yet"),
    }))
}

/// GET /conversations/:id
pub async fn get_status(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<ConversationStatusView>>> {
    let view = state
        .conversations
        .get_status(parse_id(&id)?, &auth_user.regno)
        .await?;
    Ok(Json(ApiResponse::ok(view)))
}

/// POST /conversations/:id/request - initiator asks to start talking
pub async fn request(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Conversation>>> {
    let conversation = state.conversations.request(parse_id(&id)?, &auth_user.regno).await?;
    Ok(Json(ApiResponse::ok_with_message(conversation, "conversation requested")))
}

/// POST /conversations/:id/accept
pub async fn accept(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Conversation>>> {
    let conversation = state.conversations.accept(parse_id(&id)?, &auth_user.regno).await?;
    Ok(Json(ApiResponse::ok_with_message(conversation, "conversation accepted")))
}

/// POST /conversations/:id/reject
pub async fn reject(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Conversation>>> {
    let conversation = state.conversations.reject(parse_id(&id)?, &auth_user.regno).await?;
    Ok(Json(ApiResponse::ok_with_message(conversation, "conversation rejected")))
}

/// POST /conversations/:id/block
pub async fn block(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Conversation>>> {
    let conversation = state.conversations.block(parse_id(&id)?, &auth_user.regno).await?;
    Ok(Json(ApiResponse::ok_with_message(conversation, "conversation blocked")))
}

/// POST /conversations/:id/unblock
pub async fn unblock(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Conversation>>> {
    let conversation = state.conversations.unblock(parse_id(&id)?, &auth_user.regno).await?;
    Ok(Json(ApiResponse::ok_with_message(conversation, "conversation unblocked")))
}

/// GET /conversations/:id/session - credential for the realtime channel
pub async fn session(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<SessionToken>>> {
    let session = state
        .conversations
        .session_credential(parse_id(&id)?, &auth_user.regno)
        .await?;
    Ok(Json(ApiResponse::ok(session)))
}
