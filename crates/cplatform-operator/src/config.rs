//! Operator configuration
//!
//! Loaded from YAML; every field has a default so an empty document is a
//! valid configuration.

use crate::error::{OperatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level operator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct OperatorConfig {
    /// Convergence wait tuning
    pub convergence: ConvergenceConfig,
    /// Gateway call limits
    pub gateway: GatewayConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl OperatorConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: OperatorConfig = if yaml.trim().is_empty() {
            OperatorConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.convergence.validate()?;
        if self.gateway.operation_timeout.is_zero() {
            return Err(OperatorError::InvalidConfig(
                "gateway.operation_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timing of convergence waits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Give up waiting after this long
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Pause before the first probe
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Pause between probes
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// A target observation is only trusted once this much time has passed
    #[serde(with = "humantime_serde")]
    pub min_timeout: Duration,

    /// Upper bound for the backed-off poll interval
    #[serde(with = "humantime_serde")]
    pub max_poll_interval: Duration,

    /// Growth factor of the poll interval after each non-target probe
    pub backoff_multiplier: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            min_timeout: Duration::from_secs(2),
            max_poll_interval: Duration::from_secs(10),
            backoff_multiplier: 1.0,
        }
    }
}

impl ConvergenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(OperatorError::InvalidConfig(
                "convergence.timeout must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(OperatorError::InvalidConfig(
                "convergence.poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval > self.timeout || self.min_timeout > self.timeout {
            return Err(OperatorError::InvalidConfig(
                "convergence.poll_interval and convergence.min_timeout \
                 must not exceed convergence.timeout"
                    .to_string(),
            ));
        }
        if self.max_poll_interval < self.poll_interval {
            return Err(OperatorError::InvalidConfig(
                "convergence.max_poll_interval must be at least convergence.poll_interval"
                    .to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(OperatorError::InvalidConfig(format!(
                "convergence.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    /// Poll interval to use after `interval`, honoring backoff and its cap
    ///
    /// A product that does not fit a `Duration` (overflow, NaN) saturates at
    /// `max_poll_interval`.
    pub fn next_interval(&self, interval: Duration) -> Duration {
        Duration::try_from_secs_f64(interval.as_secs_f64() * self.backoff_multiplier)
            .unwrap_or(self.max_poll_interval)
            .min(self.max_poll_interval)
            .max(self.poll_interval)
    }
}

/// Limits applied to each gateway call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
