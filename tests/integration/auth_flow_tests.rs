// =================================
// tests/integration/auth_flow_tests.rs
// =================================
//! End-to-end flows through the router: step-up login, trusted devices,
//! refresh rotation, logout, email verification and behaviour with the store
//! unavailable.
use axum::http::{header, StatusCode};
use gatekeeper::auth::TokenCodec;
use gatekeeper::error::AuthError;
use gatekeeper::middleware::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};
use gatekeeper_common::{ErrorBody, LoginResponse, SessionResponse};
use crate::test_utils::{
    app_with_unavailable_store, body_json, confirm_request, login_request, post_json, proxied,
    request_with_cookies, set_cookie_line, set_cookies, test_settings, TestApp, ADA_EMAIL, ADA_ID,
    BOB_EMAIL, PASSWORD,
};
use tower::ServiceExt;

#[tokio::test]
async fn test_unknown_device_is_challenged_then_trusted() {
    let app = TestApp::new();

    // first login from a fresh browser: no tokens, just a challenge
    let response = app.send(login_request(ADA_EMAIL, PASSWORD, &[])).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    let body = body_json(response).await;
    assert_eq!(body["requires_otp"], true);
    assert_eq!(body["expires_in_secs"], 600);

    let code = app.delivery.last_code_for(ADA_EMAIL).unwrap();
    let response = app.send(confirm_request(ADA_EMAIL, &code, true)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert!(!cookies["access_token"].is_empty());
    assert!(!cookies["refresh_token"].is_empty());
    let device_id = cookies["device_id"].clone();
    assert_eq!(device_id.len(), 43);

    let access_line = set_cookie_line(&response, "access_token").unwrap();
    assert!(access_line.contains("HttpOnly"));
    assert!(access_line.contains("SameSite=Lax"));
    assert!(access_line.contains("Path=/"));

    let body: LoginResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.user_id, ADA_ID);
    assert_eq!(body.name, "Ada");
    assert!(body.trusted_device_expires_at.is_some());

    // the remembered device goes straight through
    let deliveries = app.delivery.count();
    let response = app
        .send(login_request(ADA_EMAIL, PASSWORD, &[("device_id", &device_id)]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).contains_key("access_token"));
    assert_eq!(app.delivery.count(), deliveries);

    // trust belongs to the principal that earned it
    let response = app
        .send(login_request(BOB_EMAIL, PASSWORD, &[("device_id", &device_id)]))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_confirmation_without_remember_sets_no_device_cookie() {
    let app = TestApp::new();

    let response = app.login_with_otp(ADA_EMAIL, false).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert!(cookies.contains_key("access_token"));
    assert!(!cookies.contains_key("device_id"));
}

#[tokio::test]
async fn test_code_cannot_be_replayed() {
    let app = TestApp::new();

    app.send(login_request(ADA_EMAIL, PASSWORD, &[])).await;
    let code = app.delivery.last_code_for(ADA_EMAIL).unwrap();

    let first = app.send(confirm_request(ADA_EMAIL, &code, false)).await;
    assert_eq!(first.status(), StatusCode::OK);

    let replay = app.send(confirm_request(ADA_EMAIL, &code, false)).await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_and_wrong_codes_look_the_same() {
    let app = TestApp::new();
    app.send(login_request(ADA_EMAIL, PASSWORD, &[])).await;
    let code = app.delivery.last_code_for(ADA_EMAIL).unwrap();
    let wrong = if code == "000000" { "000001" } else { "000000" };

    let malformed = app.send(confirm_request(ADA_EMAIL, "12ab", false)).await;
    let mismatched = app.send(confirm_request(ADA_EMAIL, wrong, false)).await;
    let unknown = app.send(confirm_request("ghost@example.com", &code, false)).await;

    assert_eq!(malformed.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(mismatched.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let malformed = body_json(malformed).await;
    assert_eq!(malformed, body_json(mismatched).await);
    assert_eq!(malformed, body_json(unknown).await);

    // the real code is still pending after the failed attempts
    let response = app.send(confirm_request(ADA_EMAIL, &code, false)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_guessing_from_many_addresses_discards_the_code() {
    let app = TestApp::new();
    app.send(login_request(ADA_EMAIL, PASSWORD, &[])).await;
    let code = app.delivery.last_code_for(ADA_EMAIL).unwrap();
    let real: u32 = code.parse().unwrap();

    // every guess arrives from a different caller, so no address quota trips
    for n in 1..=20u32 {
        let guess = format!("{:06}", (real + n) % 1_000_000);
        let mut request = confirm_request(ADA_EMAIL, &guess, false);
        request.headers_mut().insert(
            "x-forwarded-for",
            format!("198.51.100.{n}").parse().unwrap(),
        );
        let response = app.send(request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // the pending code went away after the fifth miss
    let response = app.send(confirm_request(ADA_EMAIL, &code, false)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // a fresh login issues a fresh, usable code
    let response = app.login_with_otp(ADA_EMAIL, false).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unreadable_bodies_look_like_wrong_credentials() {
    let app = TestApp::new();
    let wrong = app.send(login_request(ADA_EMAIL, "not the password", &[])).await;
    let wrong = body_json(wrong).await;

    let garbage = proxied("POST", "/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = app.send(garbage).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await, wrong);

    let untyped = proxied("POST", "/api/login/otp/confirm")
        .body(axum::body::Body::from(r#"{"email":"ada@example.com","code":"123456"}"#))
        .unwrap();
    let response = app.send(untyped).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await, wrong);

    let missing_field = post_json("/api/login", serde_json::json!({ "email": ADA_EMAIL }), &[]);
    let response = app.send(missing_field).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await, wrong);
}

#[tokio::test]
async fn test_email_verification_flow() {
    let app = TestApp::new();

    let response = app.send(request_with_cookies("POST", "/api/verify/init", &[])).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let login = app.login_with_otp(ADA_EMAIL, false).await;
    let access = set_cookies(&login)["access_token"].clone();

    let response = app
        .send(request_with_cookies("POST", "/api/verify/init", &[("access_token", &access)]))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["already_verified"], false);
    assert_eq!(body["expires_in_secs"], 86_400);

    let token = app.delivery.last_verification_token_for(ADA_EMAIL).unwrap();
    let confirm = || post_json("/api/verify/confirm", serde_json::json!({ "token": token }), &[]);

    let response = app.send(confirm()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["verified"], true);

    // single use
    let response = app.send(confirm()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let deliveries = app.delivery.count();
    let response = app
        .send(request_with_cookies("POST", "/api/verify/init", &[("access_token", &access)]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["already_verified"], true);
    assert_eq!(app.delivery.count(), deliveries);
}

#[tokio::test]
async fn test_verification_requests_are_limited_per_principal() {
    let app = TestApp::new();
    let login = app.login_with_otp(BOB_EMAIL, false).await;
    let access = set_cookies(&login)["access_token"].clone();

    for _ in 0..5 {
        let response = app
            .send(request_with_cookies("POST", "/api/verify/init", &[("access_token", &access)]))
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
    let response = app
        .send(request_with_cookies("POST", "/api/verify/init", &[("access_token", &access)]))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get(header::RETRY_AFTER).is_some());
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_are_indistinguishable() {
    let app = TestApp::new();

    let wrong = app.send(login_request(ADA_EMAIL, "not the password", &[])).await;
    let unknown = app.send(login_request("ghost@example.com", PASSWORD, &[])).await;
    let malformed = app.send(login_request("not-an-email", PASSWORD, &[])).await;

    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let wrong = body_json(wrong).await;
    assert_eq!(wrong, body_json(unknown).await);
    assert_eq!(wrong, body_json(malformed).await);
    assert_eq!(app.delivery.count(), 0);
}

#[tokio::test]
async fn test_session_endpoint_reports_principal() {
    let app = TestApp::new();
    let response = app.login_with_otp(ADA_EMAIL, false).await;
    let access = set_cookies(&response)["access_token"].clone();

    let response = app
        .send(request_with_cookies("GET", "/api/session", &[("access_token", &access)]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(&X_RATELIMIT_LIMIT).is_some());

    let body: SessionResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.user_id, ADA_ID);
    assert_eq!(body.email, ADA_EMAIL);
    assert_eq!(body.avatar_url, "avatars/u-ada.png");
    assert!(body.updated_at.is_none());
}

#[tokio::test]
async fn test_refresh_rotates_and_invalidates_old_tokens() {
    let app = TestApp::new();
    let response = app.login_with_otp(ADA_EMAIL, false).await;
    let old = set_cookies(&response);

    let response = app
        .send(request_with_cookies(
            "POST",
            "/api/refresh",
            &[("refresh_token", &old["refresh_token"])],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let new = set_cookies(&response);
    assert_ne!(new["refresh_token"], old["refresh_token"]);
    assert_eq!(body_json(response).await["refreshed"], true);

    // the old refresh token lost its session id with the rotation
    let response = app
        .send(request_with_cookies(
            "POST",
            "/api/refresh",
            &[("refresh_token", &old["refresh_token"])],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(request_with_cookies("GET", "/api/session", &[("access_token", &old["access_token"])]))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(request_with_cookies("GET", "/api/session", &[("access_token", &new["access_token"])]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_access_token_is_not_a_refresh_token() {
    let app = TestApp::new();
    let response = app.login_with_otp(ADA_EMAIL, false).await;
    let cookies = set_cookies(&response);

    let response = app
        .send(request_with_cookies(
            "POST",
            "/api/refresh",
            &[("refresh_token", &cookies["access_token"])],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(request_with_cookies(
            "GET",
            "/api/session",
            &[("access_token", &cookies["refresh_token"])],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let app = TestApp::new();
    let response = app.login_with_otp(ADA_EMAIL, false).await;
    let refresh = set_cookies(&response)["refresh_token"].clone();

    let (first, second) = tokio::join!(
        app.state.auth.refresh(&refresh),
        app.state.auth.refresh(&refresh)
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| r.as_ref().err() == Some(&AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn test_logout_clears_tokens_but_keeps_device_trust() {
    let app = TestApp::new();
    let response = app.login_with_otp(ADA_EMAIL, true).await;
    let cookies = set_cookies(&response);
    let device_id = cookies["device_id"].clone();

    let response = app
        .send(request_with_cookies(
            "POST",
            "/api/logout",
            &[("access_token", &cookies["access_token"]), ("device_id", &device_id)],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = set_cookies(&response);
    assert_eq!(cleared["access_token"], "");
    assert_eq!(cleared["refresh_token"], "");
    assert!(!cleared.contains_key("device_id"));
    assert!(set_cookie_line(&response, "access_token").unwrap().contains("Max-Age=0"));
    assert_eq!(body_json(response).await["logged_out"], true);

    let response = app
        .send(request_with_cookies("GET", "/api/session", &[("access_token", &cookies["access_token"])]))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(request_with_cookies(
            "POST",
            "/api/refresh",
            &[("refresh_token", &cookies["refresh_token"])],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // the device survives logout
    let response = app
        .send(login_request(ADA_EMAIL, PASSWORD, &[("device_id", &device_id)]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_new_login_replaces_previous_session() {
    let app = TestApp::new();
    let first = set_cookies(&app.login_with_otp(ADA_EMAIL, false).await);
    let second = set_cookies(&app.login_with_otp(ADA_EMAIL, false).await);

    let response = app
        .send(request_with_cookies("GET", "/api/session", &[("access_token", &first["access_token"])]))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(request_with_cookies("GET", "/api/session", &[("access_token", &second["access_token"])]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sixth_login_is_rate_limited() {
    let app = TestApp::new();

    // preflights are never counted
    for _ in 0..10 {
        app.send(request_with_cookies("OPTIONS", "/api/login", &[])).await;
    }

    for attempt in 1..=5 {
        let response = app.send(login_request(ADA_EMAIL, "wrong", &[])).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "attempt {attempt}");
    }

    let response = app.send(login_request(ADA_EMAIL, PASSWORD, &[])).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(response.headers()[&X_RATELIMIT_LIMIT], "5");
    assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "0");

    let body: ErrorBody = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.error.code, "RATE_001");
    // the rejected request never reached the credential check
    assert_eq!(app.delivery.count(), 0);
}

#[tokio::test]
async fn test_store_outage() {
    let (router, _state) = app_with_unavailable_store();

    // the limiter fails open, then the challenge cannot be stored
    let response = router
        .clone()
        .oneshot(login_request(ADA_EMAIL, PASSWORD, &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().get(&X_RATELIMIT_LIMIT).is_none());
    let body: ErrorBody = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.error.code, "AUTH_002");

    // the gate fails closed even for a correctly signed token
    let tokens = TokenCodec::new(&test_settings().tokens)
        .issue_pair(ADA_ID, "sid-1")
        .unwrap();
    let response = router
        .clone()
        .oneshot(request_with_cookies(
            "GET",
            "/api/session",
            &[("access_token", &tokens.access.token)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .oneshot(request_with_cookies(
            "POST",
            "/api/refresh",
            &[("refresh_token", &tokens.refresh.token)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: ErrorBody = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.error.code, "SVC_001");
    assert_eq!(
        body.error.message,
        "Service temporarily unavailable, please try again later"
    );
    assert!(!body.error.message.contains("connection refused"));
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();

    let response = app.send(request_with_cookies("GET", "/health", &[])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}
