// crates/backend-lib/src/middleware/session.rs

//! Session-validation gate.
use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use gatekeeper_common::ACCESS_COOKIE;

use crate::auth::AuthenticatedPrincipal;
use crate::error::AuthError;
use crate::AppState;

/// Reject requests without a live session; on success the principal is
/// stored in the request extensions for later layers and handlers.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = CookieJar::from_headers(request.headers())
        .get(ACCESS_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::InvalidCredentials)?;

    let principal = state.auth.authenticate(&token).await?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Principal placed by [`require_session`]
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub AuthenticatedPrincipal);

impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedPrincipal>()
            .cloned()
            .map(CurrentPrincipal)
            .ok_or(AuthError::InvalidCredentials)
    }
}
