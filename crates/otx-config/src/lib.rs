//! Environment-derived configuration, wall/trading time, and the clock seam.
//!
//! # Contract
//! - All policy knobs resolve **once** at startup via [`AppConfig::from_env`];
//!   never scatter `std::env::var` calls across the codebase.
//! - Missing mandatory secrets are [`ConfigError::MissingSecret`] (process
//!   exit 1); malformed values are [`ConfigError::Invalid`] (exit 2).
//! - Error messages reference env var **names**, never values.
//! - Trading-day arithmetic is pinned to America/Chicago.

pub mod clock;
pub mod trading_day;

pub use clock::{Clock, ManualClock, SystemClock};
pub use trading_day::{trading_day, trading_day_bounds_utc, TRADING_TZ};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Env var names
// ---------------------------------------------------------------------------

pub const ENV_APP_ENV: &str = "APP_ENV";
pub const ENV_DB_URL: &str = "OTX_DATABASE_URL";
pub const ENV_ENCRYPTION_KEY: &str = "ENCRYPTION_KEY";
pub const ENV_CRON_SECRET: &str = "CRON_SECRET";
pub const ENV_TASK_SIGNING_SECRET: &str = "TASK_SIGNING_SECRET";
pub const ENV_JWT_SECRET: &str = "OTX_JWT_SECRET";
pub const ENV_QUOTE_PROVIDER_URL: &str = "OTX_QUOTE_PROVIDER_URL";
pub const ENV_QUOTE_PROVIDER_KEY: &str = "OTX_QUOTE_PROVIDER_KEY";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Startup configuration failures, classified by exit code.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Mandatory secret absent or empty → process exits 1.
    #[error("missing mandatory env var '{name}'")]
    MissingSecret { name: &'static str },
    /// Present but malformed value → process exits 2.
    #[error("invalid value for env var '{name}': {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    /// Process exit code mandated for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::MissingSecret { .. } => 1,
            ConfigError::Invalid { .. } => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// AppEnv
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppEnv {
    Production,
    Staging,
    Development,
}

impl AppEnv {
    pub fn is_production(&self) -> bool {
        matches!(self, AppEnv::Production)
    }

    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => AppEnv::Production,
            "staging" => AppEnv::Staging,
            _ => AppEnv::Development,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// All runtime policy in one resolved struct. Secret values are redacted in
/// `Debug` output.
#[derive(Clone)]
pub struct AppConfig {
    pub app_env: AppEnv,
    pub database_url: String,
    /// URL-safe base64, decodes to 32 bytes; consumed by `otx-secrets`.
    pub encryption_key_b64: String,
    /// Shared secret required on every /tasks/* POST.
    pub cron_secret: String,
    pub jwt_secret: String,
    pub quote_provider_url: Option<String>,
    pub quote_provider_key: Option<String>,

    // --- worker pool / queue ---
    pub worker_count: usize,
    pub claim_batch_size: i64,
    pub lease_timeout_secs: i64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub default_max_attempts: i32,

    // --- deadlines ---
    pub provider_timeout_secs: u64,
    pub generator_deadline_secs: u64,
    pub historical_deadline_secs: u64,

    // --- inbox ---
    pub stale_after_seconds: i64,

    // --- sizing caps ---
    pub max_risk_pct_per_trade: f64,
    pub max_risk_pct_portfolio: f64,

    // --- quality gate ---
    pub stale_quote_secs: i64,
    pub wide_spread_pct: f64,
    pub breaker_failure_threshold: u32,
    pub breaker_window_secs: i64,
    pub breaker_open_secs: i64,

    // --- go-live ---
    pub paper_checkpoint_target: i32,
    pub paper_window_days: i64,
    pub failfast_max_drawdown_pct: f64,
    pub failfast_max_loss_pct: f64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets never reach logs; policy knobs are fine.
        f.debug_struct("AppConfig")
            .field("app_env", &self.app_env)
            .field("database_url", &"<REDACTED>")
            .field("encryption_key_b64", &"<REDACTED>")
            .field("cron_secret", &"<REDACTED>")
            .field("jwt_secret", &"<REDACTED>")
            .field("worker_count", &self.worker_count)
            .field("lease_timeout_secs", &self.lease_timeout_secs)
            .field("stale_after_seconds", &self.stale_after_seconds)
            .field("paper_checkpoint_target", &self.paper_checkpoint_target)
            .finish_non_exhaustive()
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingSecret { name }),
    }
}

fn optional(name: &'static str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("could not parse '{}'", v.trim()),
        }),
        _ => Ok(default),
    }
}

impl AppConfig {
    /// Resolve the full config from the environment.
    ///
    /// Mandatory: `ENCRYPTION_KEY`, `OTX_DATABASE_URL`, `OTX_JWT_SECRET`,
    /// and one of `CRON_SECRET` / `TASK_SIGNING_SECRET` (the latter is the
    /// legacy alias; when both are set `CRON_SECRET` wins).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Dev convenience; silent when the file does not exist.
        let _ = dotenvy::from_filename(".env.local");

        let app_env = AppEnv::parse(&optional(ENV_APP_ENV).unwrap_or_default());

        let cron_secret = match optional(ENV_CRON_SECRET) {
            Some(v) => v,
            None => require(ENV_TASK_SIGNING_SECRET).map_err(|_| ConfigError::MissingSecret {
                name: ENV_CRON_SECRET,
            })?,
        };

        let worker_count: usize = parse_or("OTX_WORKER_COUNT", 4)?;
        if worker_count == 0 || worker_count > 8 {
            return Err(ConfigError::Invalid {
                name: "OTX_WORKER_COUNT",
                reason: format!("must be 1..=8, got {worker_count}"),
            });
        }

        Ok(Self {
            app_env,
            database_url: require(ENV_DB_URL)?,
            encryption_key_b64: require(ENV_ENCRYPTION_KEY)?,
            cron_secret,
            jwt_secret: require(ENV_JWT_SECRET)?,
            quote_provider_url: optional(ENV_QUOTE_PROVIDER_URL),
            quote_provider_key: optional(ENV_QUOTE_PROVIDER_KEY),

            worker_count,
            claim_batch_size: parse_or("OTX_CLAIM_BATCH_SIZE", 8)?,
            lease_timeout_secs: parse_or("OTX_LEASE_TIMEOUT_SECS", 900)?,
            backoff_base_secs: parse_or("OTX_BACKOFF_BASE_SECS", 2)?,
            backoff_cap_secs: parse_or("OTX_BACKOFF_CAP_SECS", 300)?,
            default_max_attempts: parse_or("OTX_MAX_ATTEMPTS", 5)?,

            provider_timeout_secs: parse_or("OTX_PROVIDER_TIMEOUT_SECS", 10)?,
            generator_deadline_secs: parse_or("OTX_GENERATOR_DEADLINE_SECS", 300)?,
            historical_deadline_secs: parse_or("OTX_HISTORICAL_DEADLINE_SECS", 1800)?,

            stale_after_seconds: parse_or("OTX_STALE_AFTER_SECONDS", 300)?,

            max_risk_pct_per_trade: parse_or("OTX_MAX_RISK_PCT_PER_TRADE", 2.0)?,
            max_risk_pct_portfolio: parse_or("OTX_MAX_RISK_PCT_PORTFOLIO", 10.0)?,

            stale_quote_secs: parse_or("OTX_STALE_QUOTE_SECS", 120)?,
            wide_spread_pct: parse_or("OTX_WIDE_SPREAD_PCT", 5.0)?,
            breaker_failure_threshold: parse_or("OTX_BREAKER_FAILURE_THRESHOLD", 5)?,
            breaker_window_secs: parse_or("OTX_BREAKER_WINDOW_SECS", 60)?,
            breaker_open_secs: parse_or("OTX_BREAKER_OPEN_SECS", 30)?,

            paper_checkpoint_target: parse_or("OTX_PAPER_CHECKPOINT_TARGET", 3)?,
            paper_window_days: parse_or("OTX_PAPER_WINDOW_DAYS", 14)?,
            failfast_max_drawdown_pct: parse_or("OTX_FAILFAST_MAX_DRAWDOWN_PCT", 10.0)?,
            failfast_max_loss_pct: parse_or("OTX_FAILFAST_MAX_LOSS_PCT", 5.0)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Snapshot hashing
// ---------------------------------------------------------------------------

/// Canonicalize a JSON value (sorted object keys, compact form) and return
/// its SHA-256 hex digest. Used to fingerprint parameter snapshots so two
/// runs can be compared by hash.
pub fn snapshot_hash(v: &Value) -> String {
    let canonical = canonicalize_json(v);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
