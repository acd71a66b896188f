use crate::application::instrument_pool::InstrumentPool;
use crate::domain::context::ActorContext;
use crate::domain::errors::GtNetError;
use crate::domain::import::{
    AdvertisedInstrument, ImportGap, ImportHead, ImportHeadState, ImportJob, ImportJobReport,
    ImportPosition, JobStatus, NewPosition, Resolution, resolve_position,
};
use crate::domain::instrument::InstrumentKey;
use crate::domain::local::LocalSecurity;
use crate::domain::repositories::{ImportRepository, LocalEntityRepository};
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Tenant-scoped import headers and their positions.
///
/// A header owned by another tenant is reported as not found.
pub struct ImportReconciliationService {
    imports: Arc<dyn ImportRepository>,
    local: Arc<dyn LocalEntityRepository>,
    instruments: Arc<InstrumentPool>,
}

impl ImportReconciliationService {
    pub fn new(
        imports: Arc<dyn ImportRepository>,
        local: Arc<dyn LocalEntityRepository>,
        instruments: Arc<InstrumentPool>,
    ) -> Self {
        Self {
            imports,
            local,
            instruments,
        }
    }

    pub async fn create_header(&self, ctx: &ActorContext, name: &str) -> Result<ImportHead> {
        self.imports
            .create_head(ctx.tenant_id, name, Utc::now())
            .await
    }

    pub async fn header(&self, ctx: &ActorContext, head_id: i64) -> Result<ImportHead> {
        let head = self
            .imports
            .find_head(head_id)
            .await?
            .filter(|h| h.tenant_id == ctx.tenant_id);
        Ok(head.ok_or(GtNetError::HeaderNotFound { head_id })?)
    }

    async fn transition(&self, head: &ImportHead, next: ImportHeadState) -> Result<()> {
        if !head.state.can_transition_to(next) {
            return Err(GtNetError::InvalidStateTransition {
                head_id: head.id,
                from: head.state.to_string(),
                to: next.to_string(),
            }
            .into());
        }
        if head.state != next {
            self.imports.update_head_state(head.id, next).await?;
        }
        Ok(())
    }

    /// Adds advertised instruments as positions, creating pool instruments on the way.
    /// Entries whose key cannot be normalized are kept without a pool instrument.
    pub async fn add_positions(
        &self,
        ctx: &ActorContext,
        head_id: i64,
        advertised: &[AdvertisedInstrument],
    ) -> Result<Vec<ImportPosition>> {
        let head = self.header(ctx, head_id).await?;
        if !head.state.can_transition_to(ImportHeadState::PositionsGenerated) {
            return Err(GtNetError::InvalidStateTransition {
                head_id,
                from: head.state.to_string(),
                to: ImportHeadState::PositionsGenerated.to_string(),
            }
            .into());
        }

        let mut positions = Vec::with_capacity(advertised.len());
        for entry in advertised {
            let instrument_id = match InstrumentKey::security(&entry.isin, &entry.currency) {
                Ok(key) => Some(self.instruments.find_or_create(&key).await?.id),
                Err(e) => {
                    debug!("Import: {}/{} kept without pool instrument: {}", entry.isin, entry.currency, e);
                    None
                }
            };
            positions.push(NewPosition {
                instrument_id,
                advertised: entry.clone(),
            });
        }

        let stored = self.imports.insert_positions(head_id, &positions).await?;
        self.transition(&head, ImportHeadState::PositionsGenerated).await?;
        info!(
            "Import: {} positions added to header {} ({})",
            stored.len(),
            head_id,
            head.name
        );
        Ok(stored)
    }

    pub async fn positions(&self, ctx: &ActorContext, head_id: i64) -> Result<Vec<ImportPosition>> {
        self.header(ctx, head_id).await?;
        self.imports.positions(head_id).await
    }

    async fn owned_position(&self, ctx: &ActorContext, position_id: i64) -> Result<ImportPosition> {
        let position = self
            .imports
            .find_position(position_id)
            .await?
            .ok_or(GtNetError::PositionNotFound { position_id })?;
        if self.header(ctx, position.head_id).await.is_err() {
            return Err(GtNetError::PositionNotFound { position_id }.into());
        }
        Ok(position)
    }

    pub async fn gaps_for_position(
        &self,
        ctx: &ActorContext,
        position_id: i64,
    ) -> Result<Vec<ImportGap>> {
        self.owned_position(ctx, position_id).await?;
        self.imports.gaps_for_position(position_id).await
    }

    pub async fn gaps_for_header(&self, ctx: &ActorContext, head_id: i64) -> Result<Vec<ImportGap>> {
        self.header(ctx, head_id).await?;
        self.imports.gaps_for_head(head_id).await
    }

    /// Removes the header with its positions, gaps and jobs
    pub async fn delete_header(&self, ctx: &ActorContext, head_id: i64) -> Result<()> {
        self.header(ctx, head_id).await?;
        self.imports.delete_head(head_id).await?;
        info!("Import: header {} deleted", head_id);
        Ok(())
    }

    /// Queues a lookup job unless one is already pending or running for the header
    pub async fn queue_import_job_if_not_exists(
        &self,
        ctx: &ActorContext,
        head_id: i64,
    ) -> Result<bool> {
        let head = self.header(ctx, head_id).await?;
        if !head.state.can_transition_to(ImportHeadState::LookupPending) {
            return Err(GtNetError::InvalidStateTransition {
                head_id,
                from: head.state.to_string(),
                to: ImportHeadState::LookupPending.to_string(),
            }
            .into());
        }

        let queued = self
            .imports
            .enqueue_job(head_id, ctx.tenant_id, ctx.user_id, Utc::now())
            .await?;
        if queued {
            info!("Import: lookup job queued for header {} by user {}", head_id, ctx.user_id);
        } else {
            debug!("Import: header {} already has an active job", head_id);
        }
        Ok(queued)
    }

    /// Resolves a single position right away, outside the job queue
    pub async fn reprocess_position(
        &self,
        ctx: &ActorContext,
        position_id: i64,
    ) -> Result<Resolution> {
        let position = self.owned_position(ctx, position_id).await?;
        let isin = position.isin.trim().to_uppercase();
        let candidates = self.local.securities_by_isins(&[isin.clone()]).await?;
        let resolution = resolve_position(&isin, &position.currency.trim().to_uppercase(), &candidates);
        self.imports
            .apply_resolution(position_id, &resolution, Utc::now())
            .await?;
        Ok(resolution)
    }
}

/// Background worker resolving queued import jobs against local securities
pub struct ImportJobWorker {
    imports: Arc<dyn ImportRepository>,
    local: Arc<dyn LocalEntityRepository>,
    metrics: Metrics,
}

impl ImportJobWorker {
    pub fn new(
        imports: Arc<dyn ImportRepository>,
        local: Arc<dyn LocalEntityRepository>,
        metrics: Metrics,
    ) -> Self {
        Self {
            imports,
            local,
            metrics,
        }
    }

    /// Claims and processes the oldest pending job. None when the queue is empty.
    pub async fn run_next(&self, cancel: &watch::Receiver<bool>) -> Result<Option<ImportJobReport>> {
        let Some(job) = self.imports.claim_next_job().await? else {
            return Ok(None);
        };
        info!("ImportWorker: job {} claimed for header {}", job.id, job.head_id);

        match self.process(&job, cancel).await {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                error!("ImportWorker: job {} failed: {:#}", job.id, e);
                self.imports
                    .finish_job(job.id, JobStatus::Failed, Utc::now())
                    .await?;
                Err(e)
            }
        }
    }

    async fn process(&self, job: &ImportJob, cancel: &watch::Receiver<bool>) -> Result<ImportJobReport> {
        let mut report = ImportJobReport {
            job_id: job.id,
            head_id: job.head_id,
            ..Default::default()
        };

        let positions = self.imports.positions(job.head_id).await?;
        let isins: Vec<String> = positions
            .iter()
            .map(|p| p.isin.trim().to_uppercase())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        // One lookup for the whole header
        let mut by_isin: HashMap<String, Vec<LocalSecurity>> = HashMap::new();
        for security in self.local.securities_by_isins(&isins).await? {
            by_isin.entry(security.isin.clone()).or_default().push(security);
        }

        for position in &positions {
            if *cancel.borrow() {
                self.imports.release_job(job.id).await?;
                report.cancelled = true;
                warn!(
                    "ImportWorker: job {} cancelled, returned to queue after {} positions",
                    job.id,
                    report.resolved + report.unmatched
                );
                return Ok(report);
            }

            let isin = position.isin.trim().to_uppercase();
            let currency = position.currency.trim().to_uppercase();
            let candidates = by_isin.get(&isin).map(Vec::as_slice).unwrap_or(&[]);
            let resolution = resolve_position(&isin, &currency, candidates);

            match self
                .imports
                .apply_resolution(position.id, &resolution, Utc::now())
                .await
            {
                Ok(gaps) => match resolution {
                    Resolution::Resolved { .. } => {
                        report.resolved += 1;
                        self.metrics.inc_import_positions("resolved");
                    }
                    Resolution::Unmatched { .. } => {
                        report.unmatched += 1;
                        report.gaps_recorded += gaps;
                        self.metrics.inc_import_positions("unmatched");
                    }
                },
                Err(e) => {
                    warn!("ImportWorker: position {} failed: {:#}", position.id, e);
                    report.failures.push((position.id, format!("{:#}", e)));
                    self.metrics.inc_import_positions("failed");
                }
            }
        }

        let now = Utc::now();
        if report.failures.is_empty() {
            self.imports.finish_job(job.id, JobStatus::Done, now).await?;
            self.imports
                .update_head_state(job.head_id, ImportHeadState::Complete)
                .await?;
        } else {
            // Header stays LOOKUP_PENDING so the job can be queued again
            self.imports.finish_job(job.id, JobStatus::Failed, now).await?;
        }

        info!(
            "ImportWorker: job {} finished: {} resolved, {} unmatched ({} gaps), {} failed",
            job.id,
            report.resolved,
            report.unmatched,
            report.gaps_recorded,
            report.failures.len()
        );
        Ok(report)
    }

    /// Polls the queue until shutdown, draining every pending job on each tick
    pub async fn run(self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("ImportWorker: started (poll: {:?})", poll_interval);
        let cancel = shutdown.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {
                    loop {
                        match self.run_next(&cancel).await {
                            Ok(Some(report)) if !report.cancelled => continue,
                            Ok(_) => break,
                            Err(e) => {
                                error!("ImportWorker: {:#}", e);
                                break;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("ImportWorker: shutting down");
                    break;
                }
            }
        }
    }
}
