use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_FORECAST_DAYS: u32 = 30;
const DEFAULT_HISTORICAL_DAYS: u32 = 90;
const DEFAULT_SAFETY_STOCK_MULTIPLIER: f64 = 1.2;
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_CONCURRENT_CAPABILITY_CALLS: usize = 8;

/// One explicit configuration value object handed to the orchestrator at
/// construction. Nothing in the pipeline reads the environment ambiently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub model: String,
    /// When set, the synthetic data source is used instead of the live
    /// commerce connector.
    pub demo_mode: bool,
    pub forecast_days: u32,
    pub historical_days: u32,
    pub safety_stock_multiplier: f64,
    pub stage_timeout_secs: u64,
    pub pipeline_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_concurrent_capability_calls: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            demo_mode: true,
            forecast_days: DEFAULT_FORECAST_DAYS,
            historical_days: DEFAULT_HISTORICAL_DAYS,
            safety_stock_multiplier: DEFAULT_SAFETY_STOCK_MULTIPLIER,
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
            pipeline_timeout_secs: DEFAULT_PIPELINE_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_concurrent_capability_calls: DEFAULT_MAX_CONCURRENT_CAPABILITY_CALLS,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from environment variables, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: std::env::var("SHOPSIGHT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            demo_mode: parse_env("DEMO_MODE", true)?,
            forecast_days: parse_env("FORECAST_DAYS", DEFAULT_FORECAST_DAYS)?,
            historical_days: parse_env("HISTORICAL_DAYS", DEFAULT_HISTORICAL_DAYS)?,
            safety_stock_multiplier: parse_env(
                "SAFETY_STOCK_MULTIPLIER",
                DEFAULT_SAFETY_STOCK_MULTIPLIER,
            )?,
            stage_timeout_secs: parse_env("STAGE_TIMEOUT_SECS", DEFAULT_STAGE_TIMEOUT_SECS)?,
            pipeline_timeout_secs: parse_env(
                "PIPELINE_TIMEOUT_SECS",
                DEFAULT_PIPELINE_TIMEOUT_SECS,
            )?,
            max_retries: parse_env("MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_backoff_ms: parse_env("RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS)?,
            max_concurrent_capability_calls: parse_env(
                "MAX_CONCURRENT_CAPABILITY_CALLS",
                DEFAULT_MAX_CONCURRENT_CAPABILITY_CALLS,
            )?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.safety_stock_multiplier <= 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "SAFETY_STOCK_MULTIPLIER",
                message: format!(
                    "must be greater than 1.0, got {}",
                    self.safety_stock_multiplier
                ),
            });
        }
        if self.forecast_days == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FORECAST_DAYS",
                message: "must be at least 1".to_string(),
            });
        }
        if self.historical_days == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HISTORICAL_DAYS",
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_concurrent_capability_calls == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_CONCURRENT_CAPABILITY_CALLS",
                message: "must be at least 1".to_string(),
            });
        }
        if self.stage_timeout_secs == 0 || self.pipeline_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STAGE_TIMEOUT_SECS",
                message: "timeouts must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn parse_env<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            key,
            message: format!("{e}"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn multiplier_at_or_below_one_is_rejected() {
        let mut config = Config::default();
        config.safety_stock_multiplier = 1.0;
        assert!(config.validate().is_err());
        config.safety_stock_multiplier = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_day_windows_are_rejected() {
        let mut config = Config::default();
        config.forecast_days = 0;
        assert!(config.validate().is_err());
    }
}
