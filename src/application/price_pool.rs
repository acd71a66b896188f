use crate::application::instrument_pool::InstrumentPool;
use crate::domain::instrument::InstrumentKey;
use crate::domain::ports::PriceConnector;
use crate::domain::price::{LastPrice, PriceMergeReport, PriceObservation};
use crate::domain::repositories::{ExchangeRepository, LastPriceRepository, LocalEntityRepository};
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared last-price pool with last-write-wins by source timestamp
pub struct PricePool {
    instruments: Arc<InstrumentPool>,
    prices: Arc<dyn LastPriceRepository>,
    exchange: Arc<dyn ExchangeRepository>,
    local: Arc<dyn LocalEntityRepository>,
    metrics: Metrics,
}

impl PricePool {
    pub fn new(
        instruments: Arc<InstrumentPool>,
        prices: Arc<dyn LastPriceRepository>,
        exchange: Arc<dyn ExchangeRepository>,
        local: Arc<dyn LocalEntityRepository>,
        metrics: Metrics,
    ) -> Self {
        Self {
            instruments,
            prices,
            exchange,
            local,
            metrics,
        }
    }

    /// Merges fetched observations into the pool. `source_peer_id` is None for
    /// prices from this node's own connectors.
    ///
    /// Each merge is a single compare-and-swap, so concurrent writers converge
    /// on the observation with the newest timestamp whatever the arrival order.
    pub async fn update_from_connector_fetch(
        &self,
        observations: &[PriceObservation],
        source_peer_id: Option<i64>,
    ) -> Result<PriceMergeReport> {
        let mut report = PriceMergeReport::default();

        for observation in observations {
            let instrument = self.instruments.find_or_create(&observation.key).await?;
            let outcome = self
                .prices
                .merge(instrument.id, observation, source_peer_id)
                .await?;
            debug!(
                "PricePool: {} @ {} -> {}",
                observation.key, observation.timestamp, outcome
            );
            self.metrics.inc_price_merge(&outcome.to_string());
            report.record(outcome);
        }

        info!(
            "PricePool: {} observations merged ({} inserted, {} updated, {} stale)",
            observations.len(),
            report.inserted,
            report.updated,
            report.discarded
        );
        Ok(report)
    }

    pub async fn last_price(&self, instrument_id: i64) -> Result<Option<LastPrice>> {
        self.prices.find(instrument_id).await
    }

    pub async fn last_prices_for(&self, instrument_ids: &[i64]) -> Result<Vec<LastPrice>> {
        self.prices.find_many(instrument_ids).await
    }

    /// Fetches quotes for local securities marked send-live and merges them
    pub async fn refresh_from_connector(
        &self,
        connector: &dyn PriceConnector,
    ) -> Result<PriceMergeReport> {
        let sending: HashSet<i64> = self
            .exchange
            .all()
            .await?
            .into_iter()
            .filter(|c| c.flags.send_live)
            .map(|c| c.instrument_id)
            .collect();
        if sending.is_empty() {
            return Ok(PriceMergeReport::default());
        }

        let securities = self.local.all_securities().await?;
        let tuples: Vec<(String, String)> = securities
            .iter()
            .map(|s| (s.isin.clone(), s.currency.clone()))
            .collect();
        let pooled: HashMap<String, i64> = self
            .instruments
            .find_by_isin_currency_tuples(&tuples)
            .await?
            .into_iter()
            .map(|i| (i.key.natural_key(), i.id))
            .collect();

        let selected: Vec<_> = securities
            .into_iter()
            .filter(|s| match InstrumentKey::security(&s.isin, &s.currency) {
                Ok(key) => pooled
                    .get(&key.natural_key())
                    .is_some_and(|id| sending.contains(id)),
                Err(e) => {
                    warn!("PricePool: local security {} skipped: {}", s.id, e);
                    false
                }
            })
            .collect();
        if selected.is_empty() {
            return Ok(PriceMergeReport::default());
        }

        let observations = connector.fetch_last_prices(&selected).await?;
        self.update_from_connector_fetch(&observations, None).await
    }
}
