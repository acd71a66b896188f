mod common;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gtnet::application::bootstrap::GtNetServices;
use gtnet::application::exchange_sync::ExchangeSyncService;
use gtnet::domain::exchange::{ExchangeConfig, ExchangeFlags, SyncMode};
use gtnet::domain::message::{Message, MessageResponse};
use gtnet::domain::peer::{DataKinds, Peer, PeerConfig};
use gtnet::domain::ports::PeerTransport;
use gtnet::domain::repositories::{ExchangeRepository, LocalEntityRepository};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;

fn receive_live() -> ExchangeFlags {
    ExchangeFlags {
        receive_live: true,
        ..Default::default()
    }
}

async fn node() -> GtNetServices {
    let services = common::services().await;
    common::local_peer(&services).await;
    common::trusted_peer(&services, "https://partner.example", DataKinds::all(), DataKinds::all()).await;
    services
}

#[tokio::test]
async fn test_incremental_only_sends_changed_rows() {
    let services = node().await;
    let (_tx, cancel) = watch::channel(false);
    let roche = services.instruments.find_or_create_security("CH0012032048", "CHF").await.unwrap();
    services.exchange_sync.set_flags(roche.id, receive_live()).await.unwrap();

    let first = services.exchange_sync.run(SyncMode::Incremental, &cancel).await.unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(first.messages_queued, 1);
    assert!(first.is_clean());

    let second = services.exchange_sync.run(SyncMode::Incremental, &cancel).await.unwrap();
    assert_eq!(second.processed, 0);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    services
        .exchange_sync
        .set_flags(
            roche.id,
            ExchangeFlags {
                send_live: true,
                ..receive_live()
            },
        )
        .await
        .unwrap();
    let third = services.exchange_sync.run(SyncMode::Incremental, &cancel).await.unwrap();
    assert_eq!(third.processed, 1);
}

#[tokio::test]
async fn test_full_recreation_rebuilds_from_local_entities() {
    let mut config = common::gtnet_config();
    config.default_exchange_flags = receive_live();
    let services = common::services_with(config).await;
    common::local_peer(&services).await;
    common::trusted_peer(&services, "https://partner.example", DataKinds::all(), DataKinds::all()).await;

    let local = &services.persistence.local_entity_repository;
    local.save_security("CH0012032048", "CHF", "Roche").await.unwrap();
    local.save_security("US0378331005", "USD", "Apple").await.unwrap();
    local.save_currency_pair("EUR", "CHF").await.unwrap();

    // Existing flags survive the rebuild; a row without local counterpart is dropped
    let roche = services.instruments.find_or_create_security("CH0012032048", "CHF").await.unwrap();
    let send_only = ExchangeFlags {
        send_historical: true,
        ..Default::default()
    };
    services.exchange_sync.set_flags(roche.id, send_only).await.unwrap();
    let orphan = services.instruments.find_or_create_security("DE0007164600", "EUR").await.unwrap();
    services.exchange_sync.set_flags(orphan.id, receive_live()).await.unwrap();

    let (_tx, cancel) = watch::channel(false);
    let report = services.exchange_sync.run(SyncMode::FullRecreation, &cancel).await.unwrap();
    assert_eq!(report.processed, 3);
    assert!(report.failures.is_empty());

    let rows = services.persistence.exchange_repository.all().await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.instrument_id != orphan.id));
    assert_eq!(
        services.exchange_sync.flags_for(roche.id).await.unwrap().unwrap().flags,
        send_only
    );
}

#[tokio::test]
async fn test_cached_answer_updates_supplier_history() {
    let services = node().await;
    let (_tx, cancel) = watch::channel(false);
    let roche = services.instruments.find_or_create_security("CH0012032048", "CHF").await.unwrap();
    services.exchange_sync.set_flags(roche.id, receive_live()).await.unwrap();

    services.exchange_sync.run(SyncMode::Incremental, &cancel).await.unwrap();
    let queued = services.messages.pending_outbound(10).await.unwrap();
    assert_eq!(queued.len(), 1);
    services
        .messages
        .record_response(&MessageResponse::payload(
            queued[0].id,
            json!({"supplied": ["LAST_PRICE"]}),
        ))
        .await
        .unwrap();

    services.persistence.local_entity_repository
        .save_security("CH0012032048", "CHF", "Roche")
        .await
        .unwrap();
    let report = services.exchange_sync.run(SyncMode::FullRecreation, &cancel).await.unwrap();
    assert_eq!(report.answers_applied, 1);
    assert_eq!(report.messages_queued, 0);

    let current = services.supplier_history.current(roche.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].kinds, DataKinds::LAST_PRICE);
}

/// Partner that answers every sync request with its live price offer
struct LivePriceSupplier;

#[async_trait]
impl PeerTransport for LivePriceSupplier {
    async fn deliver(
        &self,
        _peer: &Peer,
        _config: &PeerConfig,
        message: &Message,
    ) -> Result<Option<MessageResponse>> {
        Ok(Some(MessageResponse::payload(
            message.id,
            json!({"supplied": ["LAST_PRICE"]}),
        )))
    }
}

#[tokio::test]
async fn test_dispatched_reply_updates_supplier_history() {
    let services = node().await;
    let partner = services
        .registry
        .find_supplier_candidates(DataKinds::LAST_PRICE)
        .await
        .unwrap()
        .remove(0);
    let (_tx, cancel) = watch::channel(false);
    let roche = services.instruments.find_or_create_security("CH0012032048", "CHF").await.unwrap();
    services.exchange_sync.set_flags(roche.id, receive_live()).await.unwrap();

    let report = services.exchange_sync.run(SyncMode::Incremental, &cancel).await.unwrap();
    assert_eq!(report.messages_queued, 1);
    assert!(services.supplier_history.current(roche.id).await.unwrap().is_empty());

    let dispatched = services
        .dispatcher(Arc::new(LivePriceSupplier), 10)
        .dispatch_pending()
        .await
        .unwrap();
    assert_eq!(dispatched.responses, 1);

    let current = services.supplier_history.current(roche.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].peer_id, partner.id);
    assert_eq!(current[0].kinds, DataKinds::LAST_PRICE);
}

#[tokio::test]
async fn test_cancelled_run_is_not_recorded() {
    let services = node().await;
    let roche = services.instruments.find_or_create_security("CH0012032048", "CHF").await.unwrap();
    services.exchange_sync.set_flags(roche.id, receive_live()).await.unwrap();

    let (tx, cancel) = watch::channel(false);
    tx.send(true).unwrap();
    let report = services.exchange_sync.run(SyncMode::Incremental, &cancel).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.processed, 0);
    assert!(
        services
            .persistence
            .exchange_repository
            .last_successful_sync()
            .await
            .unwrap()
            .is_none()
    );
}

/// Adds a row for an instrument that is not in the pool to every change set
struct DanglingRowExchange {
    inner: Arc<dyn ExchangeRepository>,
}

#[async_trait]
impl ExchangeRepository for DanglingRowExchange {
    async fn upsert(
        &self,
        instrument_id: i64,
        flags: ExchangeFlags,
        changed_at: DateTime<Utc>,
    ) -> Result<ExchangeConfig> {
        self.inner.upsert(instrument_id, flags, changed_at).await
    }

    async fn find(&self, instrument_id: i64) -> Result<Option<ExchangeConfig>> {
        self.inner.find(instrument_id).await
    }

    async fn all(&self) -> Result<Vec<ExchangeConfig>> {
        self.inner.all().await
    }

    async fn changed_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ExchangeConfig>> {
        let mut rows = vec![ExchangeConfig {
            instrument_id: 9_999,
            flags: receive_live(),
            changed_at: Utc::now(),
        }];
        rows.extend(self.inner.changed_since(since).await?);
        Ok(rows)
    }

    async fn replace_all(&self, configs: &[ExchangeConfig]) -> Result<usize> {
        self.inner.replace_all(configs).await
    }

    async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>> {
        self.inner.last_successful_sync().await
    }

    async fn record_sync_run(
        &self,
        mode: SyncMode,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        success: bool,
    ) -> Result<()> {
        self.inner
            .record_sync_run(mode, started_at, finished_at, success)
            .await
    }
}

#[tokio::test]
async fn test_failed_unit_does_not_stop_the_run() {
    let services = node().await;
    let exchange: Arc<dyn ExchangeRepository> = Arc::new(DanglingRowExchange {
        inner: services.persistence.exchange_repository.clone(),
    });
    let sync = ExchangeSyncService::new(
        services.registry.clone(),
        services.messages.clone(),
        services.instruments.clone(),
        exchange.clone(),
        services.persistence.local_entity_repository.clone(),
        services.supplier_history.clone(),
        services.metrics.clone(),
        ExchangeFlags::default(),
    );

    let roche = services.instruments.find_or_create_security("CH0012032048", "CHF").await.unwrap();
    sync.set_flags(roche.id, receive_live()).await.unwrap();

    let (_tx, cancel) = watch::channel(false);
    let report = sync.run(SyncMode::Incremental, &cancel).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].instrument_id, 9_999);
    assert!(!report.is_clean());

    // Watermark stays put so the next run retries everything
    assert!(exchange.last_successful_sync().await.unwrap().is_none());
}
