// ============================
// gatekeeper-backend-lib/src/lib.rs
// ============================
//! Core backend-lib functionality for the `gatekeeper` credential and session service.

pub mod auth;
pub mod config;
pub mod cookies;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod router;
pub mod store;
pub mod validation;

use std::sync::Arc;

use crate::auth::{AuthService, CodeDelivery, CredentialManager, PrincipalDirectory, RateLimiter};
use crate::config::Settings;
use crate::store::KvStore;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Authentication service
    pub auth: Arc<dyn AuthService>,
    /// Settings
    pub settings: Arc<Settings>,
    /// Rate limiter
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wire the credential manager and limiter against one shared store
    pub fn new(
        settings: Settings,
        store: Arc<dyn KvStore>,
        directory: Arc<dyn PrincipalDirectory>,
        delivery: Arc<dyn CodeDelivery>,
    ) -> Self {
        let auth = Arc::new(CredentialManager::from_settings(
            &settings,
            store.clone(),
            directory,
            delivery,
        ));
        Self::with_auth(settings, auth, store)
    }

    /// Use a custom [`AuthService`] implementation
    pub fn with_auth(settings: Settings, auth: Arc<dyn AuthService>, store: Arc<dyn KvStore>) -> Self {
        Self {
            auth,
            settings: Arc::new(settings),
            rate_limiter: RateLimiter::new(store),
        }
    }
}
