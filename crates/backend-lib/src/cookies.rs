// ============================
// gatekeeper-backend-lib/src/cookies.rs
// ============================
//! Auth cookie construction.
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use gatekeeper_common::{ACCESS_COOKIE, DEVICE_COOKIE, REFRESH_COOKIE};
use time::Duration;

use crate::auth::{DeviceGrant, TokenPair};
use crate::config::CookieSettings;

fn max_age_until(expires_at: DateTime<Utc>) -> Duration {
    Duration::seconds((expires_at - Utc::now()).num_seconds().max(0))
}

fn auth_cookie(settings: &CookieSettings, name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .http_only(true)
        .secure(settings.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age);
    if let Some(domain) = settings.domain.clone() {
        builder = builder.domain(domain);
    }
    builder.build()
}

/// Access and refresh cookies for a freshly issued pair
pub fn with_token_cookies(jar: CookieJar, settings: &CookieSettings, tokens: &TokenPair) -> CookieJar {
    jar.add(auth_cookie(
        settings,
        ACCESS_COOKIE,
        tokens.access.token.clone(),
        max_age_until(tokens.access.expires_at),
    ))
    .add(auth_cookie(
        settings,
        REFRESH_COOKIE,
        tokens.refresh.token.clone(),
        max_age_until(tokens.refresh.expires_at),
    ))
}

/// Device cookie for a newly trusted device
pub fn with_device_cookie(jar: CookieJar, settings: &CookieSettings, grant: &DeviceGrant) -> CookieJar {
    jar.add(auth_cookie(
        settings,
        DEVICE_COOKIE,
        grant.device_id.clone(),
        max_age_until(grant.expires_at),
    ))
}

/// Expire the access and refresh cookies. The device cookie is left alone.
pub fn without_token_cookies(jar: CookieJar, settings: &CookieSettings) -> CookieJar {
    jar.add(auth_cookie(settings, ACCESS_COOKIE, String::new(), Duration::ZERO))
        .add(auth_cookie(settings, REFRESH_COOKIE, String::new(), Duration::ZERO))
}
