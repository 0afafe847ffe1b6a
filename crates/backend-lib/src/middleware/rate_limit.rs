// crates/backend-lib/src/middleware/rate_limit.rs

//! Rate limiter middleware.
use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::client_ip::resolved_address;
use crate::auth::rate_limit::{PolicyOutcome, RateLimitPolicy, RateLimitStatus, RateLimiter, RequestIdentity};
use crate::auth::AuthenticatedPrincipal;
use crate::error::AuthError;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Limiter plus the policy for one group of routes
#[derive(Clone)]
pub struct RouteLimit {
    pub limiter: RateLimiter,
    pub policy: Arc<RateLimitPolicy>,
}

impl RouteLimit {
    pub fn new(limiter: RateLimiter, policy: RateLimitPolicy) -> Self {
        Self {
            limiter,
            policy: Arc::new(policy),
        }
    }
}

fn request_identity(request: &Request) -> RequestIdentity {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    RequestIdentity {
        method: request.method().clone(),
        address: resolved_address(request.extensions()),
        path,
        principal_id: request
            .extensions()
            .get::<AuthenticatedPrincipal>()
            .map(|principal| principal.principal_id.clone()),
    }
}

/// Write the standard headers, keeping whichever layer reported fewer remaining requests
fn apply_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    let remaining = status.remaining_clamped();
    let tighter_already_set = headers
        .get(&X_RATELIMIT_REMAINING)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .is_some_and(|existing| existing < remaining);
    if tighter_already_set {
        return;
    }

    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(status.reset_secs));
}

/// Rate limiter middleware; use with `axum::middleware::from_fn_with_state`
pub async fn rate_limit(State(limit): State<RouteLimit>, request: Request, next: Next) -> Response {
    let identity = request_identity(&request);

    match limit.policy.evaluate(&limit.limiter, &identity).await {
        PolicyOutcome::Bypassed | PolicyOutcome::Allowed(None) => next.run(request).await,
        PolicyOutcome::Allowed(Some(status)) => {
            let mut response = next.run(request).await;
            apply_headers(response.headers_mut(), &status);
            response
        }
        PolicyOutcome::Limited(status) => {
            let mut response = AuthError::RateLimited {
                retry_after: status.reset_secs.max(1),
            }
            .into_response();
            apply_headers(response.headers_mut(), &status);
            response
        }
    }
}
