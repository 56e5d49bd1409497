//! Application settings loading from config.toml
//!
//! Every section is optional; missing values fall back to the defaults the
//! event organisers use (teasing 6h, clue 1 2h, clue 2 30min, street 15min,
//! house number 5min before the course starts).

use crate::core::timing::RevealOffsets;
use crate::errors::{Error, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::Path;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Database location; `DATABASE_URL` wins when set
    pub database_url: Option<String>,
    /// Global reveal defaults
    pub timing: TimingSettings,
    /// Lock and retry behaviour for rematches
    pub rematch: RematchSettings,
}

/// Global timing defaults, the lowest of the three configuration layers
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TimingSettings {
    /// Minutes before course start for each reveal stage
    #[serde(flatten)]
    pub offsets: RevealOffsets,
    /// Stretch street/number offsets by travel time unless an event says otherwise
    pub travel_adjustment: bool,
    /// Spacing between stages when an organizer force-opens a course
    pub activation_step_seconds: u32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            offsets: RevealOffsets::default(),
            travel_adjustment: false,
            activation_step_seconds: 30,
        }
    }
}

impl TimingSettings {
    /// Spacing between forced reveal stages
    #[must_use]
    pub fn activation_step(&self) -> Duration {
        Duration::seconds(i64::from(self.activation_step_seconds))
    }
}

/// Rematch lock and retry policy
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RematchSettings {
    /// How long a held lock stays valid if its owner crashes
    pub lock_ttl_seconds: u32,
    /// Attempts made by `run_rematch_with_retry` before giving up on a conflict
    pub retry_attempts: u32,
    /// Pause between attempts
    pub retry_delay_ms: u64,
}

impl Default for RematchSettings {
    fn default() -> Self {
        Self {
            lock_ttl_seconds: 300,
            retry_attempts: 3,
            retry_delay_ms: 500,
        }
    }
}

impl RematchSettings {
    /// Lease length of the rematch lock
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        Duration::seconds(i64::from(self.lock_ttl_seconds))
    }

    /// Back-off between rematch attempts
    #[must_use]
    pub const fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_delay_ms)
    }
}

/// Loads application configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - The configured offsets are not ordered teasing >= clue 1 >= clue 2 >= street >= number
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;

    parse_config(&contents)
}

/// Parses and validates configuration text.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;

    if !config.timing.offsets.is_ordered() {
        return Err(Error::Config {
            message: format!(
                "Reveal offsets must not increase along the ladder: {:?}",
                config.timing.offsets
            ),
        });
    }

    Ok(config)
}

/// Loads configuration from the default location (./config.toml), falling back to
/// built-in defaults when the file does not exist.
pub fn load_default_config() -> Result<AppConfig> {
    let path = Path::new("config.toml");
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!("No config.toml found, using built-in defaults");
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            database_url = "sqlite::memory:"

            [timing]
            teasing = 240
            clue_1 = 90
            clue_2 = 30
            street = 20
            number = 10
            travel_adjustment = true
            activation_step_seconds = 15

            [rematch]
            lock_ttl_seconds = 120
            retry_attempts = 5
            retry_delay_ms = 50
        "#;

        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.timing.offsets.teasing, 240);
        assert_eq!(config.timing.offsets.street, 20);
        assert!(config.timing.travel_adjustment);
        assert_eq!(config.timing.activation_step(), Duration::seconds(15));
        assert_eq!(config.rematch.lock_ttl(), Duration::seconds(120));
        assert_eq!(config.rematch.retry_attempts, 5);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.timing.offsets.teasing, 360);
        assert_eq!(config.timing.offsets.number, 5);
        assert_eq!(config.rematch.lock_ttl_seconds, 300);
    }

    #[test]
    fn test_partial_timing_section_keeps_other_defaults() {
        let config = parse_config("[timing]\nstreet = 25\n").unwrap();
        assert_eq!(config.timing.offsets.street, 25);
        assert_eq!(config.timing.offsets.clue_2, 30);
        assert_eq!(config.timing.activation_step_seconds, 30);
    }

    #[test]
    fn test_unordered_offsets_rejected() {
        let result = parse_config("[timing]\nstreet = 45\n");
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
