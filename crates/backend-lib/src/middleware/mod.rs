// crates/backend-lib/src/middleware/mod.rs

//! Middleware for the `gatekeeper` HTTP surface.

pub mod client_ip;
pub mod rate_limit;
pub mod session;

pub use client_ip::{client_ip, resolve_client, Client, ClientAddress, TrustedProxies};
pub use rate_limit::{
    rate_limit, RouteLimit, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use session::{require_session, CurrentPrincipal};
