use super::{ts_from_db, ts_to_db};
use crate::domain::peer::DataKinds;
use crate::domain::repositories::SupplierDetailRepository;
use crate::domain::supplier::{SnapshotOutcome, SupplierDetail, SupplierDetailHist};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

pub struct SqliteSupplierDetailRepository {
    pool: SqlitePool,
}

impl SqliteSupplierDetailRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SupplierDetailRepository for SqliteSupplierDetailRepository {
    async fn record(&self, detail: &SupplierDetail) -> Result<SnapshotOutcome> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<i64> = sqlx::query_scalar(
            "SELECT kinds FROM gt_net_supplier_detail_last WHERE instrument_id = ? AND peer_id = ?",
        )
        .bind(detail.instrument_id)
        .bind(detail.peer_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match previous {
            None => SnapshotOutcome::Created,
            Some(kinds) if DataKinds::from_db(kinds) != detail.kinds => SnapshotOutcome::Changed,
            Some(_) => SnapshotOutcome::Unchanged,
        };

        sqlx::query(
            r#"
            INSERT INTO gt_net_supplier_detail_last (instrument_id, peer_id, kinds, observed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(instrument_id, peer_id) DO UPDATE SET
                kinds = excluded.kinds,
                observed_at = excluded.observed_at
            "#,
        )
        .bind(detail.instrument_id)
        .bind(detail.peer_id)
        .bind(detail.kinds.to_db())
        .bind(ts_to_db(detail.observed_at))
        .execute(&mut *tx)
        .await
        .context("Failed to store supplier snapshot")?;

        if outcome != SnapshotOutcome::Unchanged {
            sqlx::query(
                r#"
                INSERT INTO gt_net_supplier_detail_hist (instrument_id, peer_id, kinds, observed_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(detail.instrument_id)
            .bind(detail.peer_id)
            .bind(detail.kinds.to_db())
            .bind(ts_to_db(detail.observed_at))
            .execute(&mut *tx)
            .await
            .context("Failed to append supplier history")?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn current_for_instrument(&self, instrument_id: i64) -> Result<Vec<SupplierDetail>> {
        let rows = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT instrument_id, peer_id, kinds, observed_at
            FROM gt_net_supplier_detail_last
            WHERE instrument_id = ?
            ORDER BY peer_id
            "#,
        )
        .bind(instrument_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(instrument_id, peer_id, kinds, observed_at)| {
                Ok(SupplierDetail {
                    instrument_id,
                    peer_id,
                    kinds: DataKinds::from_db(kinds),
                    observed_at: ts_from_db(observed_at)?,
                })
            })
            .collect()
    }

    async fn history(
        &self,
        instrument_id: i64,
        peer_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SupplierDetailHist>> {
        let rows = sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
            r#"
            SELECT id, instrument_id, peer_id, kinds, observed_at
            FROM gt_net_supplier_detail_hist
            WHERE instrument_id = ? AND peer_id = ? AND observed_at >= ?
            ORDER BY observed_at ASC, id ASC
            "#,
        )
        .bind(instrument_id)
        .bind(peer_id)
        .bind(ts_to_db(since))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load supplier history")?;

        rows.into_iter()
            .map(|(id, instrument_id, peer_id, kinds, observed_at)| {
                Ok(SupplierDetailHist {
                    id,
                    instrument_id,
                    peer_id,
                    kinds: DataKinds::from_db(kinds),
                    observed_at: ts_from_db(observed_at)?,
                })
            })
            .collect()
    }
}
