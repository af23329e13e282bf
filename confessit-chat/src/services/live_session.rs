use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use confessit_shared::errors::{AppError, ErrorCode};

use crate::models::{Conversation, Match};

pub const PARTICIPANT_ROLE: &str = "participant";

/// Claims of a credential scoped to one conversation. It expires with the match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub conversation_id: Uuid,
    pub match_id: Uuid,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionToken {
    pub token: String,
    pub conversation_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionIssuer {
    secret: String,
}

impl SessionIssuer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    pub fn issue(&self, regno: &str, conversation: &Conversation, m: &Match) -> Result<SessionToken, AppError> {
        let claims = SessionClaims {
            sub: regno.to_string(),
            conversation_id: conversation.id,
            match_id: m.id,
            role: PARTICIPANT_ROLE.to_string(),
            iat: Utc::now().timestamp(),
            exp: m.expires_at.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::internal(format!("session token encoding failed: {e}")))?;

        Ok(SessionToken {
            token,
            conversation_id: conversation.id,
            expires_at: m.expires_at,
        })
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::new(ErrorCode::TokenExpired, "session has expired")
            }
            _ => AppError::new(ErrorCode::TokenInvalid, format!("invalid session token: {e}")),
        })?;

        if data.claims.role != PARTICIPANT_ROLE {
            return Err(AppError::new(ErrorCode::TokenInvalid, "session token has the wrong role"));
        }
        Ok(data.claims)
    }
}
