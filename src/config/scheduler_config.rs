//! Background task scheduling configuration parsing from environment variables.
//!
//! This module handles the cadence of the exchange sync, the import worker and
//! the outbound message dispatcher.

use crate::domain::exchange::SyncMode;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Scheduler environment configuration
#[derive(Debug, Clone)]
pub struct SchedulerEnvConfig {
    pub sync_interval_minutes: u64,
    pub sync_mode: SyncMode,
    pub import_poll_seconds: u64,
    pub dispatch_interval_seconds: u64,
    pub dispatch_batch_size: usize,
}

impl SchedulerEnvConfig {
    pub fn from_env() -> Result<Self> {
        let sync_mode_str =
            env::var("GTNET_SYNC_MODE").unwrap_or_else(|_| "INCREMENTAL".to_string());

        Ok(Self {
            sync_interval_minutes: Self::parse_u64("GTNET_SYNC_INTERVAL_MINUTES", 60)?,
            sync_mode: SyncMode::from_str(&sync_mode_str)?,
            import_poll_seconds: Self::parse_u64("GTNET_IMPORT_POLL_SECONDS", 5)?,
            dispatch_interval_seconds: Self::parse_u64("GTNET_DISPATCH_INTERVAL_SECONDS", 10)?,
            dispatch_batch_size: env::var("GTNET_DISPATCH_BATCH_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse::<usize>()
                .context("Failed to parse GTNET_DISPATCH_BATCH_SIZE")?,
        })
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerEnvConfig::from_env().expect("Should parse with defaults");
        assert_eq!(config.sync_mode, SyncMode::Incremental);
        assert_eq!(config.sync_interval_minutes, 60);
        assert_eq!(config.dispatch_batch_size, 100);
    }
}
