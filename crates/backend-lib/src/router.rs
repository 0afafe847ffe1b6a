// ============================
// gatekeeper-backend-lib/src/router.rs
// ============================
//! Route table and per-route rate limits.
use axum::{
    body::Body,
    http::Request,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::rate_limit::{private_address_bypass, KeyStrategy, RateLimitPolicy, RateLimitRule};
use crate::handlers::auth::{
    confirm_otp, confirm_verification, health, login, logout, refresh, request_verification,
    session,
};
use crate::middleware::{rate_limit, require_session, resolve_client, RouteLimit, TrustedProxies};
use crate::AppState;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Build a route limit from rules, honouring the global switch and the private-address bypass
fn route_limit(state: &AppState, rules: impl IntoIterator<Item = RateLimitRule>) -> RouteLimit {
    let settings = &state.settings.rate_limit;
    let mut policy = RateLimitPolicy::new();
    if settings.enabled {
        for rule in rules {
            policy = policy.rule(rule);
        }
    }
    if settings.allow_private {
        policy = policy.with_bypass(private_address_bypass());
    }
    RouteLimit::new(state.rate_limiter.clone(), policy)
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id,
    )
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let limits = state.settings.rate_limit.clone();
    let trusted = TrustedProxies::new(state.settings.trusted_proxies.iter().copied());

    let login_limit = route_limit(
        &state,
        [RateLimitRule::from_settings("login", &limits.login, KeyStrategy::ByAddressAndPath)],
    );
    let otp_limit = route_limit(
        &state,
        [RateLimitRule::from_settings("otp", &limits.otp_confirm, KeyStrategy::ByAddressAndPath)],
    );
    let refresh_limit = route_limit(
        &state,
        [RateLimitRule::from_settings("refresh", &limits.refresh, KeyStrategy::ByAddressAndPath)],
    );
    let verify_confirm_limit = route_limit(
        &state,
        [RateLimitRule::from_settings(
            "verify",
            &limits.verify_confirm,
            KeyStrategy::ByAddressAndPath,
        )],
    );
    let verify_init_limit = route_limit(
        &state,
        [RateLimitRule::from_settings("verify_init", &limits.verify_init, KeyStrategy::ByPrincipal)],
    );
    let address_limit = route_limit(
        &state,
        [RateLimitRule::from_settings("api", &limits.protected_ip, KeyStrategy::ByAddress)],
    );
    let principal_limit = route_limit(
        &state,
        [RateLimitRule::from_settings("user", &limits.protected_user, KeyStrategy::ByPrincipal)],
    );

    let public = Router::new()
        .route(
            "/api/login",
            post(login).layer(from_fn_with_state(login_limit, rate_limit)),
        )
        .route(
            "/api/login/otp/confirm",
            post(confirm_otp).layer(from_fn_with_state(otp_limit, rate_limit)),
        )
        .route(
            "/api/refresh",
            post(refresh).layer(from_fn_with_state(refresh_limit, rate_limit)),
        )
        .route(
            "/api/verify/confirm",
            post(confirm_verification).layer(from_fn_with_state(verify_confirm_limit, rate_limit)),
        );

    // outermost first: address limit, session gate, principal limit
    let protected = Router::new()
        .route("/api/logout", post(logout))
        .route("/api/session", get(session))
        .route(
            "/api/verify/init",
            post(request_verification).layer(from_fn_with_state(verify_init_limit, rate_limit)),
        )
        .route_layer(from_fn_with_state(principal_limit, rate_limit))
        .route_layer(from_fn_with_state(state.clone(), require_session))
        .route_layer(from_fn_with_state(address_limit, rate_limit));

    // outermost last: request id, tracing, caller address
    Router::new()
        .route("/health", get(health))
        .merge(public)
        .merge(protected)
        .layer(from_fn_with_state(trusted, resolve_client))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
