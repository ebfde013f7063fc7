//! Sync engine configuration.
//!
//! Shared by the API server and client apps. Values come from `FOCUS_SYNC_*`
//! environment variables and fall back to the defaults below.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::models::EntityKind;
use crate::sync::ConflictStrategy;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 5;
const DEFAULT_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Replay attempts before an offline operation is marked failed
    pub max_retries: u32,
    /// Optimistic read-modify-write attempts per entity before giving up
    pub max_write_attempts: u32,
    /// How long completed offline operations are kept
    pub completed_retention: Duration,
    /// Timeout for a single sync exchange
    pub request_timeout: Duration,
    /// Pause between replay attempts of the same operation
    pub replay_backoff: Duration,
    pub task_strategy: ConflictStrategy,
    pub session_strategy: ConflictStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            completed_retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            replay_backoff: Duration::ZERO,
            task_strategy: ConflictStrategy::LastWriteWins,
            session_strategy: ConflictStrategy::LastWriteWins,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_retries = parse_in_range(&lookup, "FOCUS_SYNC_MAX_RETRIES", 1, 20)?
            .map_or(defaults.max_retries, |value| u32::try_from(value).unwrap_or(u32::MAX));
        let max_write_attempts = parse_in_range(&lookup, "FOCUS_SYNC_MAX_WRITE_ATTEMPTS", 1, 50)?
            .map_or(defaults.max_write_attempts, |value| u32::try_from(value).unwrap_or(u32::MAX));
        let completed_retention =
            parse_in_range(&lookup, "FOCUS_SYNC_RETENTION_SECS", 0, 90 * 24 * 60 * 60)?
                .map_or(defaults.completed_retention, Duration::from_secs);
        let request_timeout = parse_in_range(&lookup, "FOCUS_SYNC_TIMEOUT_SECS", 1, 300)?
            .map_or(defaults.request_timeout, Duration::from_secs);
        let replay_backoff = parse_in_range(&lookup, "FOCUS_SYNC_REPLAY_BACKOFF_MS", 0, 60_000)?
            .map_or(defaults.replay_backoff, Duration::from_millis);

        let task_strategy = parse_strategy(&lookup, "FOCUS_SYNC_TASK_STRATEGY")?
            .unwrap_or(defaults.task_strategy);
        let session_strategy = parse_strategy(&lookup, "FOCUS_SYNC_SESSION_STRATEGY")?
            .unwrap_or(defaults.session_strategy);

        Ok(Self {
            max_retries,
            max_write_attempts,
            completed_retention,
            request_timeout,
            replay_backoff,
            task_strategy,
            session_strategy,
        })
    }

    /// Conflict strategy configured for an entity kind
    pub const fn strategy_for(&self, kind: EntityKind) -> ConflictStrategy {
        match kind {
            EntityKind::Task => self.task_strategy,
            EntityKind::Session => self.session_strategy,
        }
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    min: u64,
    max: u64,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(None);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"))
    })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(Some(value))
}

fn parse_strategy(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<ConflictStrategy>, ConfigError> {
    optional_trimmed(lookup, name)
        .map(|raw| {
            raw.parse::<ConflictStrategy>()
                .map_err(|error| ConfigError::Invalid(format!("{name}: {error}")))
        })
        .transpose()
}

/// Read an env-style value, treating blank strings as unset.
pub fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(map: &HashMap<&str, &str>) -> Result<EngineConfig, ConfigError> {
        EngineConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_defaults_when_unset() {
        let config = from_map(&HashMap::new()).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.strategy_for(EntityKind::Task), ConflictStrategy::LastWriteWins);
    }

    #[test]
    fn config_reads_per_kind_strategy() {
        let mut map = HashMap::new();
        map.insert("FOCUS_SYNC_SESSION_STRATEGY", "merge");
        map.insert("FOCUS_SYNC_MAX_RETRIES", " 5 ");
        let config = from_map(&map).unwrap();
        assert_eq!(config.strategy_for(EntityKind::Session), ConflictStrategy::FieldMerge);
        assert_eq!(config.strategy_for(EntityKind::Task), ConflictStrategy::LastWriteWins);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let mut map = HashMap::new();
        map.insert("FOCUS_SYNC_MAX_RETRIES", "0");
        let err = from_map(&map).unwrap_err();
        assert!(err.to_string().contains("FOCUS_SYNC_MAX_RETRIES"));
    }

    #[test]
    fn config_rejects_unknown_strategy() {
        let mut map = HashMap::new();
        map.insert("FOCUS_SYNC_TASK_STRATEGY", "crdt");
        assert!(from_map(&map).is_err());
    }
}
