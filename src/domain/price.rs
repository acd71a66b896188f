use crate::domain::errors::GtNetError;
use crate::domain::instrument::InstrumentKey;
use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A freshly fetched price for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub key: InstrumentKey,
    pub last: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Option<i64>,
    /// Source timestamp of the quote, not the time it was fetched. Kept to the
    /// microsecond, the precision of the pool.
    pub timestamp: DateTime<Utc>,
}

impl PriceObservation {
    pub fn new(key: InstrumentKey, last: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            last,
            open: None,
            high: None,
            low: None,
            volume: None,
            timestamp: timestamp.trunc_subsecs(6),
        }
    }

    pub fn security(
        isin: &str,
        currency: &str,
        last: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, GtNetError> {
        Ok(Self::new(InstrumentKey::security(isin, currency)?, last, timestamp))
    }

    pub fn currency_pair(
        from_currency: &str,
        to_currency: &str,
        last: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, GtNetError> {
        Ok(Self::new(
            InstrumentKey::currency_pair(from_currency, to_currency)?,
            last,
            timestamp,
        ))
    }
}

/// Price pool row: the freshest known price of a pooled instrument
#[derive(Debug, Clone, PartialEq)]
pub struct LastPrice {
    pub instrument_id: i64,
    pub timestamp: DateTime<Utc>,
    pub last: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Option<i64>,
    /// None when the price came from this node's own connector
    pub source_peer_id: Option<i64>,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// Stored timestamp was equal or newer
    Discarded,
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeOutcome::Inserted => write!(f, "inserted"),
            MergeOutcome::Updated => write!(f, "updated"),
            MergeOutcome::Discarded => write!(f, "discarded"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceMergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub discarded: usize,
}

impl PriceMergeReport {
    pub fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Discarded => self.discarded += 1,
        }
    }

    /// Rows inserted or updated; discarded observations do not count
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }
}
