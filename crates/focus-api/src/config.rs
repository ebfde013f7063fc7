use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use focus_core::config::optional_trimmed;
use focus_core::{ConfigError, EngineConfig};

const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub admin_rate_limit_per_window: u32,
    pub engine: EngineConfig,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field(
                "admin_rate_limit_per_window",
                &self.admin_rate_limit_per_window,
            )
            .field("engine", &self.engine)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "FOCUS_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = PathBuf::from(value_or_default(
            &lookup,
            "FOCUS_DATABASE_PATH",
            "focus-sync.db",
        ));

        let jwt_secret = required_trimmed(&lookup, "FOCUS_JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "FOCUS_JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }
        let jwt_issuer = value_or_default(&lookup, "FOCUS_JWT_ISSUER", "focus");

        let auth_clock_skew_secs = bounded(&lookup, "FOCUS_AUTH_CLOCK_SKEW_SECS", 60, 0, 300)?;
        let rate_limit_window_secs =
            bounded(&lookup, "FOCUS_RATE_LIMIT_WINDOW_SECS", 60, 10, 3_600)?;
        let sync_rate_limit_per_window =
            bounded(&lookup, "FOCUS_SYNC_RATE_LIMIT_PER_WINDOW", 120, 1, 10_000)?;
        let admin_rate_limit_per_window =
            bounded(&lookup, "FOCUS_ADMIN_RATE_LIMIT_PER_WINDOW", 60, 1, 10_000)?;

        let engine = EngineConfig::from_lookup(&lookup)?;

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window: u32::try_from(sync_rate_limit_per_window)
                .unwrap_or(u32::MAX),
            admin_rate_limit_per_window: u32::try_from(admin_rate_limit_per_window)
                .unwrap_or(u32::MAX),
            engine,
        })
    }
}

fn bounded(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"))
    })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}
