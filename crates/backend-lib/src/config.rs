// ============================
// gatekeeper-backend-lib/src/config.rs
// ============================
//! Configuration management.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "gatekeeper.toml";

/// Prefix for environment overrides, e.g. `GATEKEEPER_TOKENS__ACCESS_SECRET`
pub const ENV_PREFIX: &str = "GATEKEEPER_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,
    /// Emit JSON log lines instead of human readable ones
    pub log_json: bool,
    /// JSON file listing principals and their password hashes
    pub principals_file: PathBuf,
    /// JSON-lines file receiving one-time-code delivery requests
    pub outbox_file: PathBuf,
    /// Reverse proxies whose forwarding headers name the caller
    pub trusted_proxies: Vec<IpAddr>,
    pub redis: RedisSettings,
    pub tokens: TokenSettings,
    pub session: SessionSettings,
    pub otp: OtpSettings,
    pub verification: VerificationSettings,
    pub cookies: CookieSettings,
    pub rate_limit: RateLimitSettings,
}

/// Key-value store connection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisSettings {
    /// `redis://…` URL, or `memory://` for a single-process store
    pub url: String,
    /// Deadline for every store round trip
    pub timeout_ms: u64,
}

/// Token signing
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenSettings {
    pub access_secret: Zeroizing<String>,
    pub refresh_secret: Zeroizing<String>,
    pub issuer: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
}

/// Session record caching
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Lifetime of the cached session record, reset on every refresh
    pub ttl_secs: u64,
}

/// Step-up one-time codes
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OtpSettings {
    pub code_ttl_secs: u64,
    pub trusted_device_ttl_secs: u64,
    /// Deadline for handing a code to the delivery sink
    pub delivery_timeout_ms: u64,
    /// Wrong guesses tolerated before the pending code is discarded
    pub max_attempts: u32,
}

/// Email address verification links
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerificationSettings {
    pub token_ttl_secs: u64,
    /// Front-end page that receives `?token=…`
    pub link_base: String,
}

/// Attributes of the auth cookies
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieSettings {
    pub domain: Option<String>,
    pub secure: bool,
}

/// A single quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitSettings {
    /// Maximum number of requests per window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

/// Quotas per protected surface
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Skip limits for loopback and private-network callers
    pub allow_private: bool,
    pub login: LimitSettings,
    pub otp_confirm: LimitSettings,
    pub refresh: LimitSettings,
    /// Broad per-address ceiling on authenticated routes
    pub protected_ip: LimitSettings,
    /// Tighter per-principal ceiling on authenticated routes
    pub protected_user: LimitSettings,
    pub verify_init: LimitSettings,
    pub verify_confirm: LimitSettings,
}

impl LimitSettings {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self { max_requests, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_json: false,
            principals_file: PathBuf::from("principals.json"),
            outbox_file: PathBuf::from("outbox.jsonl"),
            trusted_proxies: Vec::new(),
            redis: RedisSettings::default(),
            tokens: TokenSettings::default(),
            session: SessionSettings::default(),
            otp: OtpSettings::default(),
            verification: VerificationSettings::default(),
            cookies: CookieSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            timeout_ms: 2_000,
        }
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            access_secret: Zeroizing::new(String::new()),
            refresh_secret: Zeroizing::new(String::new()),
            issuer: "gatekeeper".to_string(),
            access_ttl_secs: 60 * 60,              // 1 hour
            refresh_ttl_secs: 7 * 24 * 60 * 60,    // 7 days
        }
    }
}

impl fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSettings")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish()
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
        }
    }
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            code_ttl_secs: 10 * 60,
            trusted_device_ttl_secs: 30 * 24 * 60 * 60,
            delivery_timeout_ms: 3_000,
            max_attempts: 5,
        }
    }
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            token_ttl_secs: 24 * 60 * 60,
            link_base: "http://localhost:3000/verify-email".to_string(),
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            domain: None,
            secure: true,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_private: false,
            login: LimitSettings::new(5, 60),
            otp_confirm: LimitSettings::new(10, 60),
            refresh: LimitSettings::new(20, 60),
            protected_ip: LimitSettings::new(120, 60),
            protected_user: LimitSettings::new(60, 60),
            verify_init: LimitSettings::new(5, 60),
            verify_confirm: LimitSettings::new(30, 60),
        }
    }
}

impl Settings {
    /// Load from an explicit file plus environment overrides, then validate
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would make the service insecure or unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown log level {:?}",
                self.log_level
            )));
        }

        let tokens = &self.tokens;
        if tokens.access_secret.is_empty() || tokens.refresh_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "token secrets must be configured".to_string(),
            ));
        }
        if *tokens.access_secret == *tokens.refresh_secret {
            return Err(ConfigError::Invalid(
                "access and refresh secrets must differ".to_string(),
            ));
        }
        if tokens.access_ttl_secs == 0 || tokens.refresh_ttl_secs == 0 {
            return Err(ConfigError::Invalid("token lifetimes must be non-zero".to_string()));
        }
        if tokens.access_ttl_secs > tokens.refresh_ttl_secs {
            return Err(ConfigError::Invalid(
                "access tokens must not outlive refresh tokens".to_string(),
            ));
        }

        if self.session.ttl_secs == 0
            || self.otp.code_ttl_secs == 0
            || self.otp.trusted_device_ttl_secs == 0
            || self.verification.token_ttl_secs == 0
        {
            return Err(ConfigError::Invalid("TTLs must be non-zero".to_string()));
        }
        if self.otp.max_attempts == 0 {
            return Err(ConfigError::Invalid("otp.max_attempts must be non-zero".to_string()));
        }
        if self.redis.timeout_ms == 0 {
            return Err(ConfigError::Invalid("store timeout must be non-zero".to_string()));
        }

        let limits = &self.rate_limit;
        for (name, limit) in [
            ("login", limits.login),
            ("otp_confirm", limits.otp_confirm),
            ("refresh", limits.refresh),
            ("protected_ip", limits.protected_ip),
            ("protected_user", limits.protected_user),
            ("verify_init", limits.verify_init),
            ("verify_confirm", limits.verify_confirm),
        ] {
            if limit.max_requests == 0 || limit.window_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate limit {name} needs a non-zero quota and window"
                )));
            }
        }

        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.redis.timeout_ms)
    }
}
