// ============================
// crates/backend-lib/src/auth/rate_limit.rs
// ============================
//! Distributed fixed-window rate limiting.
//!
//! Counters live in the shared store, so every instance of the service sees the
//! same totals. The window starts with the first request and does not slide.
//! Store failures never block traffic: the limiter fails open.

use axum::http::Method;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LimitSettings;
use crate::store::{rate_limit_key, KvStore, StoreResult};

/// Counter state after one increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub count: i64,
    /// `limit - count`; negative once the limit has been passed
    pub remaining: i64,
    /// Seconds until the window closes
    pub reset_secs: u64,
}

impl RateLimitStatus {
    pub fn is_limited(&self) -> bool {
        self.count > i64::from(self.limit)
    }

    /// Remaining requests clamped for display
    pub fn remaining_clamped(&self) -> u64 {
        self.remaining.max(0) as u64
    }
}

/// Outcome of a single limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed(RateLimitStatus),
    Limited(RateLimitStatus),
    /// The store could not be reached; the request goes through uncounted
    FailOpen,
}

/// Rate limiter over the shared key-value store
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Count one request against `key`.
    ///
    /// The increment attaches the window expiry atomically when it creates the
    /// counter, so a crash between the two steps cannot leave an immortal key.
    pub async fn allow(&self, key: &str, max: u32, window: Duration) -> StoreResult<RateLimitStatus> {
        let count = self.store.incr_with_expiry(key, window).await?;
        let ttl = self.store.ttl(key).await?.unwrap_or(window);
        // round up so a client honouring the header never lands inside the window
        let reset_secs = ttl.as_millis().div_ceil(1000) as u64;

        Ok(RateLimitStatus {
            limit: max,
            count,
            remaining: i64::from(max) - count,
            reset_secs,
        })
    }

    /// [`allow`](Self::allow) with store failures mapped to [`RateLimitDecision::FailOpen`]
    pub async fn check(&self, key: &str, max: u32, window: Duration) -> RateLimitDecision {
        match self.allow(key, max, window).await {
            Ok(status) if status.is_limited() => {
                ::metrics::counter!(crate::metrics::RATE_LIMIT_REJECTED).increment(1);
                debug!(key, count = status.count, limit = max, "rate limit exceeded");
                RateLimitDecision::Limited(status)
            }
            Ok(status) => {
                debug!(key, count = status.count, limit = max, "rate limit counted");
                RateLimitDecision::Allowed(status)
            }
            Err(error) => {
                ::metrics::counter!(crate::metrics::RATE_LIMIT_FAIL_OPEN).increment(1);
                warn!(key, %error, "rate limiter store failure, failing open");
                RateLimitDecision::FailOpen
            }
        }
    }
}

/// What the key of a counter is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    ByAddress,
    ByAddressAndPath,
    /// Falls back to an anonymous, address-scoped key when no principal is known
    ByPrincipal,
}

/// Request attributes the key strategies draw from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub method: Method,
    pub address: Option<IpAddr>,
    /// Matched route template when available, else the raw path
    pub path: String,
    pub principal_id: Option<String>,
}

impl RequestIdentity {
    fn address_label(&self) -> String {
        self.address
            .map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
    }
}

impl KeyStrategy {
    /// Identity part of the counter key
    pub fn identity(&self, request: &RequestIdentity) -> String {
        let address = request.address_label();
        match self {
            KeyStrategy::ByAddress => format!("ip:{address}"),
            KeyStrategy::ByAddressAndPath => format!("path:{}:ip:{address}", request.path),
            KeyStrategy::ByPrincipal => match request.principal_id.as_deref() {
                Some(id) if !id.is_empty() => format!("user:{id}"),
                _ => format!("user:anon:ip:{address}"),
            },
        }
    }
}

/// One quota applied to requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    pub scope: String,
    pub max: u32,
    pub window: Duration,
    pub strategy: KeyStrategy,
}

impl RateLimitRule {
    pub fn new(scope: impl Into<String>, max: u32, window: Duration, strategy: KeyStrategy) -> Self {
        Self {
            scope: scope.into(),
            max,
            window,
            strategy,
        }
    }

    pub fn from_settings(scope: impl Into<String>, limit: &LimitSettings, strategy: KeyStrategy) -> Self {
        Self::new(scope, limit.max_requests, limit.window(), strategy)
    }

    pub fn key(&self, request: &RequestIdentity) -> String {
        rate_limit_key(&self.scope, &self.strategy.identity(request))
    }
}

/// Predicate exempting a request from every rule of a policy
pub type BypassFn = Arc<dyn Fn(&RequestIdentity) -> bool + Send + Sync>;

/// Loopback and private-network addresses, including IPv4-mapped IPv6
pub fn is_private_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_address(IpAddr::V4(v4)),
            None => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
        },
    }
}

/// Bypass for callers on loopback or private networks
pub fn private_address_bypass() -> BypassFn {
    Arc::new(|request: &RequestIdentity| request.address.is_some_and(is_private_address))
}

/// Result of running a request through a policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// Skipped entirely (bypass predicate or `OPTIONS`)
    Bypassed,
    /// Every rule passed. Carries the tightest status, `None` if all rules failed open.
    Allowed(Option<RateLimitStatus>),
    /// The first rule that rejected
    Limited(RateLimitStatus),
}

/// Ordered set of rules; the first rejection wins
#[derive(Clone, Default)]
pub struct RateLimitPolicy {
    rules: Vec<RateLimitRule>,
    bypass: Option<BypassFn>,
}

impl std::fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("rules", &self.rules)
            .field("bypass", &self.bypass.is_some())
            .finish()
    }
}

impl RateLimitPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: RateLimitRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_bypass(mut self, bypass: BypassFn) -> Self {
        self.bypass = Some(bypass);
        self
    }

    fn is_bypassed(&self, request: &RequestIdentity) -> bool {
        request.method == Method::OPTIONS
            || self.bypass.as_ref().is_some_and(|bypass| bypass(request))
    }

    /// Count the request against each rule in order, stopping at the first rejection
    pub async fn evaluate(&self, limiter: &RateLimiter, request: &RequestIdentity) -> PolicyOutcome {
        if self.is_bypassed(request) {
            return PolicyOutcome::Bypassed;
        }

        let mut tightest: Option<RateLimitStatus> = None;
        for rule in &self.rules {
            let key = rule.key(request);
            match limiter.check(&key, rule.max, rule.window).await {
                RateLimitDecision::Limited(status) => return PolicyOutcome::Limited(status),
                RateLimitDecision::Allowed(status) => {
                    if tightest.map_or(true, |t| status.remaining < t.remaining) {
                        tightest = Some(status);
                    }
                }
                RateLimitDecision::FailOpen => {}
            }
        }
        PolicyOutcome::Allowed(tightest)
    }
}
