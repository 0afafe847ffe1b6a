// =========================
// tests/unit/error_tests.rs
// =========================
//! Unit tests for the error module
use axum::{
    body::to_bytes,
    http::{header, StatusCode},
    response::IntoResponse,
};
use gatekeeper::auth::token::TokenError;
use gatekeeper::error::AuthError;
use gatekeeper_common::ErrorBody;

async fn render(error: AuthError) -> (StatusCode, ErrorBody) {
    let response = error.into_response();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn test_auth_error_display() {
    assert_eq!(AuthError::InvalidCredentials.to_string(), "invalid credentials");
    assert_eq!(
        AuthError::RateLimited { retry_after: 7 }.to_string(),
        "rate limited, retry after 7s"
    );
    assert!(AuthError::ServiceUnavailable("redis down".into())
        .to_string()
        .contains("redis down"));
}

#[test]
fn test_auth_error_status_codes() {
    assert_eq!(
        AuthError::Malformed("bad".into()).status_code(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        AuthError::ServiceUnavailable("x".into()).status_code(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
        AuthError::Internal("x".into()).status_code(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn test_token_errors_collapse_to_rejection() {
    for error in [TokenError::Expired, TokenError::InvalidSignature, TokenError::Malformed] {
        assert_eq!(AuthError::from(error), AuthError::InvalidCredentials);
    }
    assert!(matches!(
        AuthError::from(TokenError::Signing("boom".into())),
        AuthError::Internal(_)
    ));
}

#[tokio::test]
async fn test_rejection_body_hides_the_reason() {
    let (status, body) = render(AuthError::Malformed("code must be 6 digits".into())).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body.error.code, "AUTH_001");
    assert_eq!(body.error.message, "Authentication failed");
}

#[tokio::test]
async fn test_store_error_text_stays_out_of_the_body() {
    let (status, body) = render(AuthError::ServiceUnavailable(
        "store unavailable: connection refused".into(),
    ))
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body.error.code, "SVC_001");
    assert_eq!(
        body.error.message,
        "Service temporarily unavailable, please try again later"
    );
}

#[tokio::test]
async fn test_challenge_unavailable_body() {
    let (status, body) = render(AuthError::ChallengeUnavailable).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body.error.code, "AUTH_002");
}

#[tokio::test]
async fn test_rate_limited_response_has_retry_after() {
    let response = AuthError::RateLimited { retry_after: 9 }.into_response();
    assert_eq!(response.headers()[header::RETRY_AFTER], "9");
}
