// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use gatekeeper_common::{ErrorBody, ErrorDetail};
use thiserror::Error;

use crate::auth::token::TokenError;

/// Errors surfaced by the credential manager and the HTTP layer.
///
/// Store and token failures are mapped into these at component boundaries and
/// never leak through the public API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("challenge unavailable")]
    ChallengeUnavailable,

    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials | AuthError::Malformed(_) => StatusCode::UNAUTHORIZED,
            AuthError::ServiceUnavailable(_) | AuthError::ChallengeUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            // identical on purpose: callers cannot tell a bad code from a bad format
            AuthError::InvalidCredentials | AuthError::Malformed(_) => "AUTH_001",
            AuthError::ChallengeUnavailable => "AUTH_002",
            AuthError::ServiceUnavailable(_) => "SVC_001",
            AuthError::RateLimited { .. } => "RATE_001",
            AuthError::Internal(_) => "INT_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials | AuthError::Malformed(_) => {
                "Authentication failed".to_string()
            }
            AuthError::ChallengeUnavailable => {
                "Verification is temporarily unavailable, please try again later".to_string()
            }
            AuthError::ServiceUnavailable(_) => {
                "Service temporarily unavailable, please try again later".to_string()
            }
            AuthError::RateLimited { .. } => {
                "Rate limit exceeded, please try again later".to_string()
            }
            AuthError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(reason) => AuthError::Internal(reason),
            TokenError::InvalidSignature | TokenError::Expired | TokenError::Malformed => {
                AuthError::InvalidCredentials
            }
        }
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        AuthError::Malformed(rejection.body_text())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // detail stays in the logs
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.sanitized_message(),
            },
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let AuthError::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
