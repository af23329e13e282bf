pub mod admin;
pub mod conversations;
pub mod health;
pub mod matchmaking;
pub mod messages;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use confessit_shared::errors::{AppError, AppResult, ErrorCode};

use crate::socket;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        // Matchmaking
        .route("/matchmaking/cooldown", get(matchmaking::cooldown))
        .route("/matchmaking/find", post(matchmaking::find_match))
        // Conversations
        .route("/conversations/current", get(conversations::current))
        .route("/conversations/:id", get(conversations::get_status))
        .route("/conversations/:id/request", post(conversations::request))
        .route("/conversations/:id/accept", post(conversations::accept))
        .route("/conversations/:id/reject", post(conversations::reject))
        .route("/conversations/:id/block", post(conversations::block))
        .route("/conversations/:id/unblock", post(conversations::unblock))
        .route("/conversations/:id/session", get(conversations::session))
        // Messages
        .route(
            "/conversations/:id/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/messages/:id/report", post(messages::report_message))
        // Admin
        .route("/admin/conversations", get(admin::list_conversations))
        .route("/admin/conversations/:id/terminate", post(admin::terminate))
        .route("/admin/matches", get(admin::list_matches))
        .route("/admin/archives", get(admin::list_archives).post(admin::create_archive))
        .route("/admin/archives/:date", get(admin::read_archive))
        // Realtime
        .route("/ws/:conversation_id", get(socket::handlers::ws_handler))
        .layer(axum::middleware::from_fn(confessit_shared::middleware::metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Path identifiers arrive as text so a malformed one gets a domain error.
pub fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::new(ErrorCode::InvalidIdentifier, format!("invalid identifier: {raw}")))
}
