use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::credentials::MalformedCredential;
use crate::store::StoreError;

/// Why a credential failed to authenticate. Logged, never shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingCredential,
    UnknownToken,
    SecretMismatch,
    Disabled,
    Expired,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rejection::MissingCredential => "no credential supplied",
            Rejection::UnknownToken => "unknown token",
            Rejection::SecretMismatch => "secret mismatch",
            Rejection::Disabled => "token disabled",
            Rejection::Expired => "token expired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(Rejection),

    #[error("permission denied")]
    PermissionDenied,

    #[error("token not found")]
    NotFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed credential: {0}")]
    Malformed(#[from] MalformedCredential),

    #[error("token id conflict")]
    Conflict,

    #[error("authentication timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        AuthError::InvalidArgument(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AuthError::PermissionDenied => StatusCode::FORBIDDEN,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::InvalidArgument(_) | AuthError::Malformed(_) => StatusCode::BAD_REQUEST,
            AuthError::Conflict => StatusCode::CONFLICT,
            AuthError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => AuthError::Conflict,
            StoreError::NotFound => AuthError::NotFound,
            StoreError::Backend(e) => AuthError::Internal(e),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, code, msg) = match &self {
            AuthError::Unauthenticated(reason) => {
                tracing::debug!(%reason, "authentication rejected");
                (
                    "authentication_error",
                    "unauthenticated",
                    "invalid or missing credential".to_string(),
                )
            }
            AuthError::PermissionDenied => (
                "permission_error",
                "permission_denied",
                "not permitted to act on this token".to_string(),
            ),
            AuthError::NotFound => (
                "not_found_error",
                "token_not_found",
                "token not found".to_string(),
            ),
            AuthError::InvalidArgument(m) => ("invalid_request_error", "invalid_argument", m.clone()),
            AuthError::Malformed(e) => (
                "invalid_request_error",
                "malformed_credential",
                format!("malformed credential: {}", e),
            ),
            AuthError::Conflict => (
                "conflict_error",
                "token_conflict",
                "token id conflict, retry the request".to_string(),
            ),
            AuthError::Timeout => (
                "timeout_error",
                "auth_timeout",
                "authentication timed out".to_string(),
            ),
            AuthError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "www-authenticate",
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }

        response
    }
}
