// ==============================
// tests/unit/middleware_tests.rs
// ==============================
//! Unit tests for the rate limit, caller address and session middleware
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
};
use gatekeeper::middleware::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
use gatekeeper::router::X_REQUEST_ID;
use std::net::SocketAddr;
use crate::test_utils::{request_with_cookies, test_settings, TestApp};

const PROXY: &str = "10.0.0.2:44321";

fn login_from(peer: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let peer: SocketAddr = peer.parse().unwrap();
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .extension(ConnectInfo(peer));
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Body::from(
            serde_json::json!({ "email": "nobody@example.com", "password": "x" }).to_string(),
        ))
        .unwrap()
}

fn forwarded_for(address: &str) -> Request<Body> {
    login_from(PROXY, &[("x-forwarded-for", address)])
}

fn next_octet() -> u8 {
    use std::sync::atomic::{AtomicU8, Ordering};
    static NEXT: AtomicU8 = AtomicU8::new(10);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

#[tokio::test]
async fn test_rate_limit_headers_count_down() {
    let app = TestApp::new();

    let response = app.send(forwarded_for("198.51.100.1")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[&X_RATELIMIT_LIMIT], "5");
    assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "4");
    let reset: u64 = response.headers()[&X_RATELIMIT_RESET]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&reset));

    let response = app.send(forwarded_for("198.51.100.1")).await;
    assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "3");
}

#[tokio::test]
async fn test_counters_are_separate_per_forwarded_address() {
    let app = TestApp::new();

    for _ in 0..5 {
        app.send(forwarded_for("198.51.100.2, 10.0.0.2")).await;
    }
    let limited = app.send(forwarded_for("198.51.100.2")).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = app.send(forwarded_for("198.51.100.3")).await;
    assert_eq!(other.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(other.headers()[&X_RATELIMIT_REMAINING], "4");
}

#[tokio::test]
async fn test_spoofed_entries_left_of_the_proxy_hop_are_ignored() {
    let app = TestApp::new();

    // the proxy appends the real caller; anything before it is caller-supplied
    for _ in 0..5 {
        let chain = format!("198.51.100.{}, 203.0.113.77", next_octet());
        app.send(forwarded_for(&chain)).await;
    }
    let limited = app.send(forwarded_for("198.51.100.250, 203.0.113.77")).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_cf_connecting_ip_takes_precedence() {
    let app = TestApp::new();

    for _ in 0..5 {
        let rotating = format!("198.51.100.{}", next_octet());
        app.send(login_from(
            PROXY,
            &[("cf-connecting-ip", "203.0.113.50"), ("x-forwarded-for", rotating.as_str())],
        ))
        .await;
    }
    let limited = app
        .send(login_from(PROXY, &[("cf-connecting-ip", "203.0.113.50")]))
        .await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_direct_caller_cannot_rotate_forwarding_headers() {
    let app = TestApp::new();
    let direct = "198.51.100.99:50000";

    for _ in 0..5 {
        let rotating = format!("192.0.2.{}", next_octet());
        let response = app
            .send(login_from(
                direct,
                &[("x-forwarded-for", rotating.as_str()), ("cf-connecting-ip", rotating.as_str())],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = app
        .send(login_from(direct, &[("x-forwarded-for", "192.0.2.200")]))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_disabled_rate_limiting_sets_no_headers() {
    let mut settings = test_settings();
    settings.rate_limit.enabled = false;
    let app = TestApp::with_settings(settings);

    for _ in 0..10 {
        let response = app.send(forwarded_for("198.51.100.9")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(&X_RATELIMIT_LIMIT).is_none());
    }
}

#[tokio::test]
async fn test_private_callers_bypass_when_allowed() {
    let mut settings = test_settings();
    settings.rate_limit.allow_private = true;
    let app = TestApp::with_settings(settings);

    for _ in 0..8 {
        let response = app.send(forwarded_for("192.168.1.20")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    // public callers are still counted
    let response = app.send(forwarded_for("198.51.100.10")).await;
    assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "4");

    // claiming a private address from a public peer earns nothing
    let response = app
        .send(login_from("198.51.100.11:50000", &[("x-forwarded-for", "192.168.1.20")]))
        .await;
    assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "4");
}

#[tokio::test]
async fn test_request_id_is_assigned_or_propagated() {
    let app = TestApp::new();

    let response = app.send(request_with_cookies("GET", "/health", &[])).await;
    let assigned = response.headers()[X_REQUEST_ID].to_str().unwrap().to_string();
    assert_eq!(assigned.len(), 36);

    let mut request = request_with_cookies("GET", "/api/session", &[]);
    request
        .headers_mut()
        .insert(X_REQUEST_ID, "req-from-edge".parse().unwrap());
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[X_REQUEST_ID], "req-from-edge");
}

#[tokio::test]
async fn test_session_gate_rejects_missing_and_garbage_cookies() {
    let app = TestApp::new();

    let response = app.send(request_with_cookies("GET", "/api/session", &[])).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(request_with_cookies("GET", "/api/session", &[("access_token", "not-a-jwt")]))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(request_with_cookies("POST", "/api/logout", &[("access_token", "")]))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_is_not_limited() {
    let app = TestApp::new();

    for _ in 0..200 {
        let response = app.send(request_with_cookies("GET", "/health", &[])).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(&X_RATELIMIT_LIMIT).is_none());
    }
}
