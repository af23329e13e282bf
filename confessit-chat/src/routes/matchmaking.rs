use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use confessit_shared::errors::AppResult;
use confessit_shared::types::api::ApiResponse;
use confessit_shared::types::auth::AuthUser;

use crate::policy::CooldownStatus;
use crate::services::matchmaking::MatchFound;
use crate::AppState;

/// GET /matchmaking/cooldown
pub async fn cooldown(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<CooldownStatus>>> {
    let status = state.matchmaking.check_cooldown(&auth_user.regno).await?;
    Ok(Json(ApiResponse::ok(status)))
}

/// POST /matchmaking/find - pair the caller with a random eligible user
pub async fn find_match(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<MatchFound>>> {
    let found = state.matchmaking.find_match(&auth_user.regno).await?;
    Ok(Json(ApiResponse::ok_with_message(found, "match found")))
}
