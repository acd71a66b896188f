use crate::domain::instrument::{Instrument, InstrumentKey};
use crate::domain::repositories::InstrumentRepository;
use anyhow::Result;
use std::sync::Arc;

/// Peer-agnostic instrument identity keyed by natural key
pub struct InstrumentPool {
    instruments: Arc<dyn InstrumentRepository>,
}

impl InstrumentPool {
    pub fn new(instruments: Arc<dyn InstrumentRepository>) -> Self {
        Self { instruments }
    }

    pub async fn find_or_create(&self, key: &InstrumentKey) -> Result<Instrument> {
        self.instruments.find_or_create(key).await
    }

    pub async fn find_or_create_security(&self, isin: &str, currency: &str) -> Result<Instrument> {
        let key = InstrumentKey::security(isin, currency)?;
        self.instruments.find_or_create(&key).await
    }

    pub async fn find_or_create_currency_pair(
        &self,
        from_currency: &str,
        to_currency: &str,
    ) -> Result<Instrument> {
        let key = InstrumentKey::currency_pair(from_currency, to_currency)?;
        self.instruments.find_or_create(&key).await
    }

    pub async fn get(&self, instrument_id: i64) -> Result<Option<Instrument>> {
        self.instruments.find_by_id(instrument_id).await
    }

    pub async fn find_by_ids(&self, instrument_ids: &[i64]) -> Result<Vec<Instrument>> {
        self.instruments.find_by_ids(instrument_ids).await
    }

    /// Exact (ISIN, currency) matches in one round trip
    pub async fn find_by_isin_currency_tuples(
        &self,
        tuples: &[(String, String)],
    ) -> Result<Vec<Instrument>> {
        if tuples.is_empty() {
            return Ok(Vec::new());
        }
        self.instruments.find_by_isin_currency_tuples(tuples).await
    }

    /// Exact (from, to) currency pair matches in one round trip
    pub async fn find_by_currency_tuples(
        &self,
        tuples: &[(String, String)],
    ) -> Result<Vec<Instrument>> {
        if tuples.is_empty() {
            return Ok(Vec::new());
        }
        self.instruments.find_by_currency_tuples(tuples).await
    }
}
