use crate::application::instrument_pool::InstrumentPool;
use crate::domain::instrument::InstrumentKey;
use crate::domain::message::{Message, MessageCode, MessageEnvelope};
use crate::domain::peer::{DataKind, DataKinds};
use crate::domain::ports::AnswerHandler;
use crate::domain::repositories::SupplierDetailRepository;
use crate::domain::supplier::{SnapshotOutcome, SupplierDetail, SupplierDetailHist};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Which peer supplies which data kinds per instrument, over time
pub struct SupplierHistoryService {
    details: Arc<dyn SupplierDetailRepository>,
}

impl SupplierHistoryService {
    pub fn new(details: Arc<dyn SupplierDetailRepository>) -> Self {
        Self { details }
    }

    pub async fn record_snapshot(
        &self,
        instrument_id: i64,
        peer_id: i64,
        kinds: DataKinds,
        at: DateTime<Utc>,
    ) -> Result<SnapshotOutcome> {
        let outcome = self
            .details
            .record(&SupplierDetail {
                instrument_id,
                peer_id,
                kinds,
                observed_at: at,
            })
            .await?;

        match outcome {
            SnapshotOutcome::Changed => info!(
                "SupplierHistory: peer {} now supplies [{}] for instrument {}",
                peer_id, kinds, instrument_id
            ),
            _ => debug!(
                "SupplierHistory: peer {} instrument {} {:?}",
                peer_id, instrument_id, outcome
            ),
        }
        Ok(outcome)
    }

    pub async fn current(&self, instrument_id: i64) -> Result<Vec<SupplierDetail>> {
        self.details.current_for_instrument(instrument_id).await
    }

    pub async fn history(
        &self,
        instrument_id: i64,
        peer_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SupplierDetailHist>> {
        self.details.history(instrument_id, peer_id, since).await
    }

    /// History entries since `since`, the first snapshot included. A high count
    /// flags a peer whose offer keeps flapping.
    pub async fn change_count(
        &self,
        instrument_id: i64,
        peer_id: i64,
        since: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self.history(instrument_id, peer_id, since).await?.len())
    }
}

/// Reads the `supplied` list of an EXCHANGE_SYNC answer; unknown names are ignored
pub fn supplied_kinds(payload: &Value) -> DataKinds {
    payload
        .get("supplied")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|name| DataKind::from_str(name).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Applies EXCHANGE_SYNC replies to the history as they arrive
pub struct ExchangeSyncAnswerHandler {
    instruments: Arc<InstrumentPool>,
    history: Arc<SupplierHistoryService>,
}

impl ExchangeSyncAnswerHandler {
    pub fn new(instruments: Arc<InstrumentPool>, history: Arc<SupplierHistoryService>) -> Self {
        Self {
            instruments,
            history,
        }
    }
}

#[async_trait]
impl AnswerHandler for ExchangeSyncAnswerHandler {
    async fn on_answer(&self, request: &Message, reply: &Message) -> Result<()> {
        if request.code != MessageCode::ExchangeSync {
            return Ok(());
        }

        // Outbound requests store their envelope as payload
        let envelope: MessageEnvelope = serde_json::from_value(request.payload.clone())
            .with_context(|| format!("Message {} does not hold an envelope", request.id))?;
        let key: InstrumentKey = envelope
            .arguments
            .get("instrument")
            .cloned()
            .map(serde_json::from_value::<InstrumentKey>)
            .transpose()?
            .with_context(|| format!("Message {} names no instrument", request.id))?;

        let instrument = self.instruments.find_or_create(&key).await?;
        self.history
            .record_snapshot(
                instrument.id,
                request.peer_id,
                supplied_kinds(&reply.payload),
                reply.timestamp,
            )
            .await?;
        Ok(())
    }
}
