//! Observability configuration parsing from environment variables.
//!
//! This module handles loading the metrics reporter settings.

use std::env;

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub report_interval_seconds: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_seconds: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env::var("OBSERVABILITY_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse::<bool>()
                .unwrap_or(true),
            report_interval_seconds: env::var("OBSERVABILITY_REPORT_INTERVAL")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<u64>()
                .unwrap_or(60),
        }
    }
}
