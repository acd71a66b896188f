//! Repository Pattern Abstractions
//!
//! Storage traits for the GTNet core. Business logic in `application` only talks to
//! these traits; the SQLite implementations live in
//! `infrastructure::persistence::repositories`.
//!
//! # Atomicity
//!
//! Operations documented as atomic must be a single statement or a single
//! transaction in every implementation. Background tasks run concurrently against
//! the same store and rely on it.

use crate::domain::exchange::{ExchangeConfig, ExchangeFlags, SyncMode};
use crate::domain::import::{
    ImportGap, ImportHead, ImportHeadState, ImportJob, ImportPosition, JobStatus, NewPosition,
    Resolution,
};
use crate::domain::instrument::{Instrument, InstrumentKey};
use crate::domain::local::{LocalCurrencyPair, LocalSecurity};
use crate::domain::message::{Message, MessageAnswer, NewAnswer, NewMessage, RequestKey};
use crate::domain::peer::{DataKinds, EntityCapability, EntityConfig, NewPeer, Peer, PeerConfig};
use crate::domain::price::{LastPrice, MergeOutcome, PriceObservation};
use crate::domain::supplier::{SnapshotOutcome, SupplierDetail, SupplierDetailHist};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Peers, their trust configuration and capability rows
#[async_trait]
pub trait PeerRepository: Send + Sync {
    async fn insert(&self, peer: &NewPeer) -> Result<Peer>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Peer>>;

    async fn list(&self) -> Result<Vec<Peer>>;

    /// Non-local peers whose supplier capability intersects `kinds`, ordered by
    /// consumer usage priority (missing config counts as 100), then id
    async fn find_suppliers(&self, kinds: DataKinds) -> Result<Vec<Peer>>;

    async fn save_config(&self, config: &PeerConfig) -> Result<()>;

    async fn find_config(&self, peer_id: i64) -> Result<Option<PeerConfig>>;

    async fn save_entity_capability(&self, capability: &EntityCapability) -> Result<()>;

    async fn entity_capabilities(&self, peer_id: i64) -> Result<Vec<EntityCapability>>;

    async fn save_entity_config(&self, config: &EntityConfig) -> Result<()>;

    async fn find_entity_config(&self, peer_id: i64) -> Result<Option<EntityConfig>>;
}

/// Protocol messages and cached answers
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert(&self, message: &NewMessage) -> Result<Message>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Message>>;

    /// Messages of one peer in (timestamp, id) order
    async fn find_by_peer(&self, peer_id: i64) -> Result<Vec<Message>>;

    /// Undelivered SENT messages, oldest first
    async fn pending_outbound(&self, limit: usize) -> Result<Vec<Message>>;

    async fn mark_delivered(&self, id: i64) -> Result<()>;

    async fn find_answer(&self, key: &RequestKey) -> Result<Option<MessageAnswer>>;

    /// Stores a reply, upserts the cached answer when given and marks the request
    /// the reply answers as delivered. Atomic.
    async fn record_reply(
        &self,
        reply: &NewMessage,
        answer: Option<&NewAnswer>,
    ) -> Result<(Message, Option<MessageAnswer>)>;
}

/// Peer-agnostic instrument identity
#[async_trait]
pub trait InstrumentRepository: Send + Sync {
    /// Idempotent get-or-insert on the unique natural key. Concurrent callers with
    /// the same key receive the same row.
    async fn find_or_create(&self, key: &InstrumentKey) -> Result<Instrument>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Instrument>>;

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Instrument>>;

    /// One batched tuple-equality lookup on (isin, currency)
    async fn find_by_isin_currency_tuples(
        &self,
        tuples: &[(String, String)],
    ) -> Result<Vec<Instrument>>;

    /// One batched tuple-equality lookup on (from_currency, to_currency)
    async fn find_by_currency_tuples(&self, tuples: &[(String, String)])
    -> Result<Vec<Instrument>>;
}

/// Price pool
#[async_trait]
pub trait LastPriceRepository: Send + Sync {
    /// Atomic compare-and-swap by timestamp: insert when absent, update when the
    /// observation is strictly newer, otherwise leave the row untouched.
    async fn merge(
        &self,
        instrument_id: i64,
        observation: &PriceObservation,
        source_peer_id: Option<i64>,
    ) -> Result<MergeOutcome>;

    async fn find(&self, instrument_id: i64) -> Result<Option<LastPrice>>;

    async fn find_many(&self, instrument_ids: &[i64]) -> Result<Vec<LastPrice>>;
}

/// Exchange configuration and sync bookkeeping
#[async_trait]
pub trait ExchangeRepository: Send + Sync {
    async fn upsert(
        &self,
        instrument_id: i64,
        flags: ExchangeFlags,
        changed_at: DateTime<Utc>,
    ) -> Result<ExchangeConfig>;

    async fn find(&self, instrument_id: i64) -> Result<Option<ExchangeConfig>>;

    async fn all(&self) -> Result<Vec<ExchangeConfig>>;

    /// Rows changed strictly after `since`; every row when `since` is None
    async fn changed_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ExchangeConfig>>;

    /// Replaces the whole set. Atomic.
    async fn replace_all(&self, configs: &[ExchangeConfig]) -> Result<usize>;

    /// Start time of the last run that completed without failures
    async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>>;

    async fn record_sync_run(
        &self,
        mode: SyncMode,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        success: bool,
    ) -> Result<()>;
}

/// Import reconciliation headers, positions, gaps and jobs
#[async_trait]
pub trait ImportRepository: Send + Sync {
    async fn create_head(&self, tenant_id: i64, name: &str, at: DateTime<Utc>)
    -> Result<ImportHead>;

    async fn find_head(&self, head_id: i64) -> Result<Option<ImportHead>>;

    async fn update_head_state(&self, head_id: i64, state: ImportHeadState) -> Result<()>;

    /// Cascades to positions, gaps and jobs
    async fn delete_head(&self, head_id: i64) -> Result<bool>;

    async fn insert_positions(
        &self,
        head_id: i64,
        positions: &[NewPosition],
    ) -> Result<Vec<ImportPosition>>;

    async fn positions(&self, head_id: i64) -> Result<Vec<ImportPosition>>;

    async fn find_position(&self, position_id: i64) -> Result<Option<ImportPosition>>;

    async fn gaps_for_position(&self, position_id: i64) -> Result<Vec<ImportGap>>;

    async fn gaps_for_head(&self, head_id: i64) -> Result<Vec<ImportGap>>;

    /// Clears the position's previous gaps, then records the new outcome. Atomic.
    /// Returns the number of gaps written.
    async fn apply_resolution(
        &self,
        position_id: i64,
        resolution: &Resolution,
        at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Inserts a PENDING job unless an active one exists for the header and, in the
    /// same transaction, moves the header to LOOKUP_PENDING. Atomic.
    async fn enqueue_job(
        &self,
        head_id: i64,
        tenant_id: i64,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Moves the oldest PENDING job to RUNNING and returns it. Atomic.
    async fn claim_next_job(&self) -> Result<Option<ImportJob>>;

    async fn find_job(&self, job_id: i64) -> Result<Option<ImportJob>>;

    async fn finish_job(&self, job_id: i64, status: JobStatus, at: DateTime<Utc>) -> Result<()>;

    /// Puts a RUNNING job back to PENDING
    async fn release_job(&self, job_id: i64) -> Result<()>;
}

/// Supplier capability snapshots
#[async_trait]
pub trait SupplierDetailRepository: Send + Sync {
    /// Upserts the current snapshot; appends history when the kinds changed. Atomic.
    async fn record(&self, detail: &SupplierDetail) -> Result<SnapshotOutcome>;

    async fn current_for_instrument(&self, instrument_id: i64) -> Result<Vec<SupplierDetail>>;

    async fn history(
        &self,
        instrument_id: i64,
        peer_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SupplierDetailHist>>;
}

/// Local securities and currency pairs owned by the surrounding platform
#[async_trait]
pub trait LocalEntityRepository: Send + Sync {
    async fn save_security(&self, isin: &str, currency: &str, name: &str)
    -> Result<LocalSecurity>;

    async fn delete_security(&self, id: i64) -> Result<()>;

    async fn save_currency_pair(
        &self,
        from_currency: &str,
        to_currency: &str,
    ) -> Result<LocalCurrencyPair>;

    /// Every local security carrying one of the ISINs, in any currency
    async fn securities_by_isins(&self, isins: &[String]) -> Result<Vec<LocalSecurity>>;

    async fn all_securities(&self) -> Result<Vec<LocalSecurity>>;

    async fn all_currency_pairs(&self) -> Result<Vec<LocalCurrencyPair>>;
}
