// ============================
// gatekeeper-backend-lib/src/handlers/auth.rs
// ============================
//! Login, confirmation, refresh, logout, session and email verification handlers.
//!
//! Handlers only translate between HTTP and [`AuthService`](crate::auth::AuthService);
//! every decision is made by the credential manager.
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;
use gatekeeper_common::{
    ChallengeResponse, LoginRequest, LoginResponse, LogoutResponse, OtpConfirmRequest,
    RefreshResponse, SessionResponse, VerificationResponse, VerifyConfirmRequest,
    VerifyConfirmResponse, DEVICE_COOKIE, REFRESH_COOKIE,
};
use serde_json::json;
use zeroize::Zeroizing;

use crate::auth::{IssuedSession, LoginInput, LoginOutcome, OtpConfirmation, VerificationOutcome};
use crate::cookies::{with_device_cookie, with_token_cookies, without_token_cookies};
use crate::error::AuthError;
use crate::handlers::extract::Payload;
use crate::middleware::{Client, CurrentPrincipal};
use crate::AppState;

fn login_response(session: &IssuedSession) -> LoginResponse {
    LoginResponse {
        user_id: session.principal_id.clone(),
        email: session.attributes.email.clone(),
        name: session.attributes.name.clone(),
        access_expires_at: session.tokens.access.expires_at,
        refresh_expires_at: session.tokens.refresh.expires_at,
        trusted_device_expires_at: None,
    }
}

/// `POST /api/login`
pub async fn login(
    State(state): State<AppState>,
    Client(client): Client,
    jar: CookieJar,
    Payload(req): Payload<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let device_id = jar.get(DEVICE_COOKIE).map(|cookie| cookie.value().to_string());
    let input = LoginInput {
        identifier: req.email,
        secret: Zeroizing::new(req.password),
        device_id,
        client,
    };

    let response = match state.auth.login(input).await? {
        LoginOutcome::TokensIssued(session) => {
            let jar = with_token_cookies(jar, &state.settings.cookies, &session.tokens);
            (StatusCode::OK, jar, Json(login_response(&session))).into_response()
        }
        LoginOutcome::ChallengeRequired { expires_in } => (
            StatusCode::ACCEPTED,
            Json(ChallengeResponse {
                requires_otp: true,
                expires_in_secs: expires_in.as_secs(),
            }),
        )
            .into_response(),
    };
    Ok(response)
}

/// `POST /api/login/otp/confirm`
pub async fn confirm_otp(
    State(state): State<AppState>,
    jar: CookieJar,
    Payload(req): Payload<OtpConfirmRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let confirmed = state
        .auth
        .confirm_challenge(OtpConfirmation {
            identifier: req.email,
            code: req.code,
            remember: req.remember_device,
        })
        .await?;

    let cookies = &state.settings.cookies;
    let mut jar = with_token_cookies(jar, cookies, &confirmed.session.tokens);
    let mut body = login_response(&confirmed.session);
    if let Some(grant) = &confirmed.device {
        jar = with_device_cookie(jar, cookies, grant);
        body.trusted_device_expires_at = Some(grant.expires_at);
    }
    Ok((jar, Json(body)))
}

/// `POST /api/refresh`
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::InvalidCredentials)?;

    let tokens = state.auth.refresh(&token).await?;
    let body = RefreshResponse {
        refreshed: true,
        access_expires_at: tokens.access.expires_at,
        refresh_expires_at: tokens.refresh.expires_at,
    };
    Ok((with_token_cookies(jar, &state.settings.cookies, &tokens), Json(body)))
}

/// `POST /api/logout`
pub async fn logout(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    state.auth.logout(&principal.principal_id).await?;
    Ok((
        without_token_cookies(jar, &state.settings.cookies),
        Json(LogoutResponse { logged_out: true }),
    ))
}

/// `GET /api/session`
pub async fn session(CurrentPrincipal(principal): CurrentPrincipal) -> Json<SessionResponse> {
    Json(SessionResponse {
        user_id: principal.principal_id,
        email: principal.attributes.email,
        name: principal.attributes.name,
        avatar_url: principal.attributes.avatar_url,
        created_at: principal.created_at,
        updated_at: principal.updated_at,
    })
}

/// `POST /api/verify/init`
pub async fn request_verification(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> Result<impl IntoResponse, AuthError> {
    let response = match state.auth.request_verification(&principal.principal_id).await? {
        VerificationOutcome::AlreadyVerified => (
            StatusCode::OK,
            Json(VerificationResponse {
                already_verified: true,
                expires_in_secs: None,
            }),
        ),
        VerificationOutcome::LinkSent { expires_in } => (
            StatusCode::ACCEPTED,
            Json(VerificationResponse {
                already_verified: false,
                expires_in_secs: Some(expires_in.as_secs()),
            }),
        ),
    };
    Ok(response)
}

/// `POST /api/verify/confirm`
pub async fn confirm_verification(
    State(state): State<AppState>,
    Payload(req): Payload<VerifyConfirmRequest>,
) -> Result<Json<VerifyConfirmResponse>, AuthError> {
    state.auth.confirm_verification(&req.token).await?;
    Ok(Json(VerifyConfirmResponse { verified: true }))
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
