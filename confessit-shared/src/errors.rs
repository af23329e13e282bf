use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Auth errors
/// - E2xxx: User errors
/// - E3xxx: Matchmaking errors
/// - E4xxx: Conversation errors
/// - E5xxx: Message errors
/// - E6xxx: Archive errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    ServiceUnavailable,
    InvalidIdentifier,
    Conflict,

    // Auth (E1xxx)
    TokenExpired,
    TokenInvalid,

    // User (E2xxx)
    UserNotFound,

    // Matchmaking (E3xxx)
    CooldownActive,
    NoCandidates,
    MatchNotFound,
    MatchExpired,

    // Conversation (E4xxx)
    ConversationNotFound,
    NotConversationParticipant,
    InvalidTransition,
    ConversationAlreadyExists,
    ConversationNotActive,
    ConversationBlocked,
    NotBlocker,
    AlreadyBlocked,

    // Message (E5xxx)
    MessageNotFound,
    CannotReportMessage,
    DuplicateReport,

    // Archive (E6xxx)
    InvalidArchiveDate,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::ServiceUnavailable => "E0007",
            Self::InvalidIdentifier => "E0009",
            Self::Conflict => "E0010",

            // Auth
            Self::TokenExpired => "E1001",
            Self::TokenInvalid => "E1002",

            // User
            Self::UserNotFound => "E2001",

            // Matchmaking
            Self::CooldownActive => "E3001",
            Self::NoCandidates => "E3002",
            Self::MatchNotFound => "E3003",
            Self::MatchExpired => "E3004",

            // Conversation
            Self::ConversationNotFound => "E4001",
            Self::NotConversationParticipant => "E4002",
            Self::InvalidTransition => "E4003",
            Self::ConversationAlreadyExists => "E4004",
            Self::ConversationNotActive => "E4005",
            Self::ConversationBlocked => "E4006",
            Self::NotBlocker => "E4007",
            Self::AlreadyBlocked => "E4008",

            // Message
            Self::MessageNotFound => "E5001",
            Self::CannotReportMessage => "E5002",
            Self::DuplicateReport => "E5003",

            // Archive
            Self::InvalidArchiveDate => "E6001",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationError | Self::InvalidIdentifier
            | Self::InvalidArchiveDate => StatusCode::BAD_REQUEST,
            Self::NotFound | Self::UserNotFound | Self::NoCandidates | Self::MatchNotFound
            | Self::ConversationNotFound | Self::MessageNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::TokenExpired | Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::NotConversationParticipant
            | Self::ConversationBlocked | Self::NotBlocker
            | Self::CannotReportMessage => StatusCode::FORBIDDEN,
            Self::CooldownActive => StatusCode::TOO_MANY_REQUESTS,
            Self::Conflict | Self::InvalidTransition | Self::ConversationAlreadyExists
            | Self::ConversationNotActive | Self::AlreadyBlocked
            | Self::DuplicateReport => StatusCode::CONFLICT,
            Self::MatchExpired => StatusCode::GONE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The domain code carried by a `Known` error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AppError::Known { code, .. } => Some(*code),
            AppError::Validation(_) => Some(ErrorCode::ValidationError),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Known { code, .. } => code.status_code(),
            AppError::Database(diesel::result::Error::NotFound) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Maps a Postgres unique violation to `code`; other errors pass through.
pub fn map_unique_violation(err: diesel::result::Error, code: ErrorCode, message: &str) -> AppError {
    match err {
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ) => AppError::new(code, message),
        other => AppError::Database(other),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new(ErrorCode::InternalError.code(), "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new(ErrorCode::NotFound.code(), "resource not found"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new(ErrorCode::InternalError.code(), "database error"),
                    ),
                }
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new(ErrorCode::ValidationError.code(), msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn known_error_renders_envelope() {
        let (status, body) =
            body_json(AppError::new(ErrorCode::MatchExpired, "this match has expired")).await;

        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "E3004");
        assert_eq!(body["error"]["message"], "this match has expired");
        assert!(body["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn details_are_included_when_present() {
        let err = AppError::with_details(
            ErrorCode::CooldownActive,
            "cooldown active",
            serde_json::json!({ "remaining_secs": 60 }),
        );
        let (status, body) = body_json(err).await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["details"]["remaining_secs"], 60);
    }

    #[tokio::test]
    async fn internal_errors_are_masked() {
        let (status, body) = body_json(AppError::Internal(anyhow::anyhow!("pool exhausted"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "internal server error");
    }

    #[test]
    fn taxonomy_maps_to_distinct_statuses() {
        assert_eq!(ErrorCode::DuplicateReport.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::InvalidTransition.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::ConversationBlocked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::InvalidIdentifier.status_code(), StatusCode::BAD_REQUEST);
        assert_ne!(ErrorCode::MatchExpired.status_code(), ErrorCode::MatchNotFound.status_code());
    }

    #[test]
    fn other_database_errors_pass_through() {
        let err = map_unique_violation(diesel::result::Error::NotFound, ErrorCode::DuplicateReport, "dup");
        assert!(matches!(err, AppError::Database(diesel::result::Error::NotFound)));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
