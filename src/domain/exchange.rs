use crate::domain::errors::GtNetError;
use crate::domain::peer::DataKinds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Four independent directional switches per instrument
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeFlags {
    pub receive_live: bool,
    pub send_live: bool,
    pub receive_historical: bool,
    pub send_historical: bool,
}

impl ExchangeFlags {
    pub fn receive_kinds(&self) -> DataKinds {
        let mut kinds = DataKinds::empty();
        kinds.set(DataKinds::LAST_PRICE, self.receive_live);
        kinds.set(DataKinds::HISTORICAL_PRICES, self.receive_historical);
        kinds
    }

    pub fn send_kinds(&self) -> DataKinds {
        let mut kinds = DataKinds::empty();
        kinds.set(DataKinds::LAST_PRICE, self.send_live);
        kinds.set(DataKinds::HISTORICAL_PRICES, self.send_historical);
        kinds
    }

    pub fn any(&self) -> bool {
        self.receive_live || self.send_live || self.receive_historical || self.send_historical
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub instrument_id: i64,
    pub flags: ExchangeFlags,
    pub changed_at: DateTime<Utc>,
}

/// Operator-selected synchronization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Only rows changed since the last successful run
    Incremental,
    /// Rebuild the whole exchange set from local entities
    FullRecreation,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Incremental => write!(f, "INCREMENTAL"),
            SyncMode::FullRecreation => write!(f, "FULL_RECREATION"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = GtNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "INCREMENTAL" => Ok(SyncMode::Incremental),
            "FULL_RECREATION" => Ok(SyncMode::FullRecreation),
            _ => Err(GtNetError::UnknownSyncMode {
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub instrument_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub processed: usize,
    pub messages_queued: usize,
    pub answers_applied: usize,
    pub failures: Vec<SyncFailure>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            processed: 0,
            messages_queued: 0,
            answers_applied: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_to_kinds() {
        let flags = ExchangeFlags {
            receive_live: true,
            send_historical: true,
            ..Default::default()
        };
        assert_eq!(flags.receive_kinds(), DataKinds::LAST_PRICE);
        assert_eq!(flags.send_kinds(), DataKinds::HISTORICAL_PRICES);
        assert!(flags.any());
        assert!(!ExchangeFlags::default().any());
    }

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("incremental".parse::<SyncMode>(), Ok(SyncMode::Incremental));
        assert_eq!(
            "full-recreation".parse::<SyncMode>(),
            Ok(SyncMode::FullRecreation)
        );
        assert!(matches!(
            "weekly".parse::<SyncMode>(),
            Err(GtNetError::UnknownSyncMode { .. })
        ));
        assert_eq!(SyncMode::FullRecreation.to_string(), "FULL_RECREATION");
    }
}
