use serde::Deserialize;

use super::telemetry::{LoggingConfig, TelemetryConfig};
use super::throttling::ThrottlingSettings;
use crate::rate_limit::ThrottlingPolicy;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Counter cache settings shared by every policy
    #[serde(default)]
    pub throttling: ThrottlingSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Throttled operations (optional)
    /// Operations without a policy are never throttled
    #[serde(default)]
    pub policies: Vec<ThrottlingPolicy>,
}
