//! GTNet node configuration parsing from environment variables.
//!
//! Identity of this node's own peer entry, flags applied to instruments that
//! appear for the first time in a full recreation, and the answer cache lifetime.

use crate::domain::exchange::ExchangeFlags;
use anyhow::{Context, Result};
use std::env;

/// GTNet environment configuration
#[derive(Debug, Clone)]
pub struct GtNetEnvConfig {
    /// Id of the `gt_net` row describing this node, when registered
    pub my_entry_id: Option<i64>,
    pub default_exchange_flags: ExchangeFlags,
    /// Lifetime of cached answers; None keeps them until overwritten
    pub answer_ttl_seconds: Option<u64>,
}

impl GtNetEnvConfig {
    pub fn from_env() -> Result<Self> {
        let my_entry_id = match env::var("GTNET_MY_ENTRY_ID") {
            Ok(value) if !value.trim().is_empty() => Some(
                value
                    .trim()
                    .parse::<i64>()
                    .context("Failed to parse GTNET_MY_ENTRY_ID")?,
            ),
            _ => None,
        };

        let answer_ttl = Self::parse_u64("GTNET_ANSWER_TTL_SECONDS", 3600)?;

        Ok(Self {
            my_entry_id,
            default_exchange_flags: ExchangeFlags {
                receive_live: Self::parse_bool("GTNET_DEFAULT_RECEIVE_LIVE", false)?,
                send_live: Self::parse_bool("GTNET_DEFAULT_SEND_LIVE", false)?,
                receive_historical: Self::parse_bool("GTNET_DEFAULT_RECEIVE_HISTORICAL", false)?,
                send_historical: Self::parse_bool("GTNET_DEFAULT_SEND_HISTORICAL", false)?,
            },
            // 0 disables expiry
            answer_ttl_seconds: (answer_ttl > 0).then_some(answer_ttl),
        })
    }

    fn parse_bool(key: &str, default: bool) -> Result<bool> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {}", key))
    }
}
