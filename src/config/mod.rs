//! Configuration module for GTNet.
//!
//! This module provides structured configuration loading from environment variables,
//! organized by concern: Database, GTNet node, Scheduler, and Observability.

mod database_config;
mod gtnet_config;
mod observability_config;
mod scheduler_config;

pub use database_config::DatabaseEnvConfig;
pub use gtnet_config::GtNetEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use scheduler_config::SchedulerEnvConfig;

use anyhow::{Context, Result};

/// Main application configuration.
///
/// Aggregates the sub-configs; each one reads its own environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseEnvConfig,
    pub gtnet: GtNetEnvConfig,
    pub scheduler: SchedulerEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseEnvConfig::from_env().context("Failed to load database config")?,
            gtnet: GtNetEnvConfig::from_env().context("Failed to load GTNet config")?,
            scheduler: SchedulerEnvConfig::from_env()
                .context("Failed to load scheduler config")?,
            observability: ObservabilityEnvConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::exchange::SyncMode;

    #[test]
    fn test_config_from_env_defaults() {
        let config = Config::from_env().expect("Should parse with defaults");
        assert_eq!(config.scheduler.sync_mode, SyncMode::Incremental);
        assert!(config.observability.enabled);
    }
}
