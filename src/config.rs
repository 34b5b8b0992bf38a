//! Application configuration: file loading and startup validation.
//!
//! All sections are optional and fall back to defaults. The `[policy]` and
//! `[normalization]` sections must be complete when present, so a half-written
//! threshold table is rejected instead of silently mixing in defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trading::{
    FeedbackConfig, LedgerConfig, NormalizationConfig, PolicyConfig, RiskConfig,
};

/// Fatal configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Cycle cadence for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between trading cycles
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15 * 60,
        }
    }
}

/// Market-data collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Candidate symbols scanned every cycle
    pub symbols: Vec<String>,

    /// Only symbols moving more than this (absolute percent) are scored
    pub min_move_pct: f64,

    /// Broad-market reference symbol
    pub benchmark_symbol: Option<String>,

    /// Quote API base URL
    pub base_url: String,

    /// HTTP timeout per request
    pub request_timeout_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbols: ["AAPL", "NVDA", "TSLA", "AMD", "MSFT", "COIN", "MARA", "RIOT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_move_pct: 1.5,
            benchmark_symbol: Some("SPY".to_string()),
            base_url: "https://finnhub.io/api/v1".to_string(),
            request_timeout_secs: 15,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub risk: RiskConfig,
    pub policy: PolicyConfig,
    pub normalization: NormalizationConfig,
    pub feedback: FeedbackConfig,
    pub scheduler: SchedulerConfig,
    pub market: MarketConfig,
}

impl AppConfig {
    /// Load from a TOML file (or defaults when no path is given) and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Check every section; any failure is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ledger.validate()?;
        self.risk.validate()?;
        self.policy.validate()?;
        self.normalization.validate()?;
        self.feedback.validate()?;

        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::invalid("scheduler.interval_secs", "must be >= 1"));
        }
        if self.market.min_move_pct < 0.0 || !self.market.min_move_pct.is_finite() {
            return Err(ConfigError::invalid("market.min_move_pct", "must be >= 0"));
        }
        Ok(())
    }
}
