//! Database configuration parsing from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Database environment configuration
#[derive(Debug, Clone)]
pub struct DatabaseEnvConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/gtnet.db".to_string()),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<u32>()
                .context("Failed to parse DATABASE_MAX_CONNECTIONS")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseEnvConfig::from_env().expect("Should parse with defaults");
        assert!(config.url.starts_with("sqlite:"));
        assert!(config.max_connections >= 1);
    }
}
