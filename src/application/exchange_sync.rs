use crate::application::instrument_pool::InstrumentPool;
use crate::application::message_service::MessageService;
use crate::application::peer_registry::PeerRegistry;
use crate::application::supplier_history::{SupplierHistoryService, supplied_kinds};
use crate::domain::exchange::{ExchangeConfig, ExchangeFlags, SyncFailure, SyncMode, SyncReport};
use crate::domain::instrument::InstrumentKey;
use crate::domain::message::{MessageCode, MessageEnvelope};
use crate::domain::peer::{DataKinds, Peer};
use crate::domain::repositories::{ExchangeRepository, LocalEntityRepository};
use crate::infrastructure::observability::Metrics;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UnitOutcome {
    queued: usize,
    applied: usize,
}

/// Keeps peers informed about which instruments this node wants to receive or send.
pub struct ExchangeSyncService {
    registry: Arc<PeerRegistry>,
    messages: Arc<MessageService>,
    instruments: Arc<InstrumentPool>,
    exchange: Arc<dyn ExchangeRepository>,
    local: Arc<dyn LocalEntityRepository>,
    history: Arc<SupplierHistoryService>,
    metrics: Metrics,
    default_flags: ExchangeFlags,
}

impl ExchangeSyncService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<PeerRegistry>,
        messages: Arc<MessageService>,
        instruments: Arc<InstrumentPool>,
        exchange: Arc<dyn ExchangeRepository>,
        local: Arc<dyn LocalEntityRepository>,
        history: Arc<SupplierHistoryService>,
        metrics: Metrics,
        default_flags: ExchangeFlags,
    ) -> Self {
        Self {
            registry,
            messages,
            instruments,
            exchange,
            local,
            history,
            metrics,
            default_flags,
        }
    }

    pub async fn set_flags(&self, instrument_id: i64, flags: ExchangeFlags) -> Result<ExchangeConfig> {
        if self.instruments.get(instrument_id).await?.is_none() {
            return Err(anyhow!("Instrument {} is not in the pool", instrument_id));
        }
        self.exchange.upsert(instrument_id, flags, Utc::now()).await
    }

    pub async fn flags_for(&self, instrument_id: i64) -> Result<Option<ExchangeConfig>> {
        self.exchange.find(instrument_id).await
    }

    /// One sync pass. Cancellation is checked between units; units already
    /// processed stay committed. Only an uncancelled run is recorded, and only a
    /// run without failures moves the incremental watermark.
    pub async fn run(&self, mode: SyncMode, cancel: &watch::Receiver<bool>) -> Result<SyncReport> {
        let started_at = Utc::now();
        let mut report = SyncReport::new(mode);
        let local_peer = self.registry.local_peer().await?;

        let rows = match mode {
            SyncMode::Incremental => {
                let since = self.exchange.last_successful_sync().await?;
                self.exchange.changed_since(since).await?
            }
            SyncMode::FullRecreation => self
                .recreate(started_at)
                .await?
                .into_iter()
                .filter(|c| c.flags.any())
                .collect(),
        };
        let partners = self.registry.exchange_partners().await?;
        info!(
            "ExchangeSync: {} run over {} instruments and {} partners",
            mode,
            rows.len(),
            partners.len()
        );

        for row in &rows {
            if *cancel.borrow() {
                warn!("ExchangeSync: cancelled after {} units", report.processed);
                report.cancelled = true;
                break;
            }

            match self.sync_unit(&local_peer, &partners, row).await {
                Ok(outcome) => {
                    report.processed += 1;
                    report.messages_queued += outcome.queued;
                    report.answers_applied += outcome.applied;
                    self.metrics.inc_sync_units("ok");
                }
                Err(e) => {
                    warn!("ExchangeSync: instrument {} failed: {:#}", row.instrument_id, e);
                    report.failures.push(SyncFailure {
                        instrument_id: row.instrument_id,
                        reason: format!("{:#}", e),
                    });
                    self.metrics.inc_sync_units("failed");
                }
            }
        }

        if !report.cancelled {
            self.exchange
                .record_sync_run(mode, started_at, Utc::now(), report.is_clean())
                .await?;
        }

        info!(
            "ExchangeSync: {} done: {} processed, {} queued, {} from cache, {} failed",
            mode,
            report.processed,
            report.messages_queued,
            report.answers_applied,
            report.failures.len()
        );
        Ok(report)
    }

    /// Rebuilds the exchange set with one row per local security and currency pair
    async fn recreate(&self, at: DateTime<Utc>) -> Result<Vec<ExchangeConfig>> {
        let existing: HashMap<i64, ExchangeFlags> = self
            .exchange
            .all()
            .await?
            .into_iter()
            .map(|c| (c.instrument_id, c.flags))
            .collect();

        let mut keys = Vec::new();
        for security in self.local.all_securities().await? {
            match InstrumentKey::security(&security.isin, &security.currency) {
                Ok(key) => keys.push(key),
                Err(e) => warn!("ExchangeSync: local security {} skipped: {}", security.id, e),
            }
        }
        for pair in self.local.all_currency_pairs().await? {
            match InstrumentKey::currency_pair(&pair.from_currency, &pair.to_currency) {
                Ok(key) => keys.push(key),
                Err(e) => warn!("ExchangeSync: local currency pair {} skipped: {}", pair.id, e),
            }
        }

        let mut instrument_ids = BTreeSet::new();
        for key in &keys {
            instrument_ids.insert(self.instruments.find_or_create(key).await?.id);
        }

        let configs: Vec<ExchangeConfig> = instrument_ids
            .into_iter()
            .map(|instrument_id| ExchangeConfig {
                instrument_id,
                flags: existing
                    .get(&instrument_id)
                    .copied()
                    .unwrap_or(self.default_flags),
                changed_at: at,
            })
            .collect();

        self.exchange.replace_all(&configs).await?;
        Ok(configs)
    }

    async fn sync_unit(
        &self,
        local_peer: &Peer,
        partners: &[Peer],
        row: &ExchangeConfig,
    ) -> Result<UnitOutcome> {
        let instrument = self
            .instruments
            .get(row.instrument_id)
            .await?
            .ok_or_else(|| anyhow!("Instrument {} is not in the pool", row.instrument_id))?;
        let receive = row.flags.receive_kinds();
        let send = row.flags.send_kinds();
        let names = |kinds: DataKinds| -> Vec<&'static str> {
            kinds.kinds().iter().map(|k| k.as_str()).collect()
        };

        let mut outcome = UnitOutcome::default();
        for peer in partners {
            if !(peer.can_supply(receive) || peer.consumes(send)) {
                continue;
            }

            let envelope = MessageEnvelope::new(MessageCode::ExchangeSync, local_peer.id, peer.id)
                .with_argument("instrument", serde_json::to_value(&instrument.key)?)
                .with_argument("receive", names(receive))
                .with_argument("send", names(send));
            let message = self
                .messages
                .get_message_answer_by(local_peer, peer, &envelope)
                .await?;

            if message.from_cache() {
                self.history
                    .record_snapshot(
                        instrument.id,
                        peer.id,
                        supplied_kinds(&message.payload),
                        message.timestamp,
                    )
                    .await?;
                outcome.applied += 1;
            } else {
                outcome.queued += 1;
            }
        }
        Ok(outcome)
    }

    /// Periodic runner for the server
    pub async fn run_periodically(
        self: Arc<Self>,
        mode: SyncMode,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("ExchangeSync: scheduled every {:?} ({})", interval, mode);
        let cancel = shutdown.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run(mode, &cancel).await {
                        error!("ExchangeSync: run failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("ExchangeSync: shutting down");
                    break;
                }
            }
        }
    }
}
