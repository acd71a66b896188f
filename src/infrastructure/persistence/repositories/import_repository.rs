use super::{opt_ts_from_db, ts_from_db, ts_to_db};
use crate::domain::import::{
    GapReason, ImportGap, ImportHead, ImportHeadState, ImportJob, ImportPosition, JobStatus,
    NewPosition, Resolution,
};
use crate::domain::repositories::ImportRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const HEAD_COLUMNS: &str =
    "SELECT id, tenant_id, name, state, created_at FROM gt_net_security_imp_head";

const POSITION_COLUMNS: &str = "SELECT id, head_id, instrument_id, isin, currency, \
     ticker_symbol, name, security_id, processed_at FROM gt_net_security_imp_pos";

const JOB_COLUMNS: &str = "id, head_id, tenant_id, user_id, status, created_at, finished_at";

pub struct SqliteImportRepository {
    pool: SqlitePool,
}

impl SqliteImportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_head(row: &SqliteRow) -> Result<ImportHead> {
        let state: String = row.try_get("state")?;
        Ok(ImportHead {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            state: ImportHeadState::from_str(&state)?,
            created_at: ts_from_db(row.try_get("created_at")?)?,
        })
    }

    fn map_position(row: &SqliteRow) -> Result<ImportPosition> {
        Ok(ImportPosition {
            id: row.try_get("id")?,
            head_id: row.try_get("head_id")?,
            instrument_id: row.try_get("instrument_id")?,
            isin: row.try_get("isin")?,
            currency: row.try_get("currency")?,
            ticker_symbol: row.try_get("ticker_symbol")?,
            name: row.try_get("name")?,
            security_id: row.try_get("security_id")?,
            processed_at: opt_ts_from_db(row.try_get("processed_at")?)?,
        })
    }

    fn map_gap(row: &SqliteRow) -> Result<ImportGap> {
        let reason: String = row.try_get("reason")?;
        Ok(ImportGap {
            id: row.try_get("id")?,
            position_id: row.try_get("position_id")?,
            reason: GapReason::from_str(&reason)?,
            detail: row.try_get("detail")?,
        })
    }

    fn map_job(row: &SqliteRow) -> Result<ImportJob> {
        let status: String = row.try_get("status")?;
        Ok(ImportJob {
            id: row.try_get("id")?,
            head_id: row.try_get("head_id")?,
            tenant_id: row.try_get("tenant_id")?,
            user_id: row.try_get("user_id")?,
            status: JobStatus::from_str(&status)?,
            created_at: ts_from_db(row.try_get("created_at")?)?,
            finished_at: opt_ts_from_db(row.try_get("finished_at")?)?,
        })
    }
}

#[async_trait]
impl ImportRepository for SqliteImportRepository {
    async fn create_head(
        &self,
        tenant_id: i64,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<ImportHead> {
        let row = sqlx::query(
            r#"
            INSERT INTO gt_net_security_imp_head (tenant_id, name, state, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, tenant_id, name, state, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(name)
        .bind(ImportHeadState::Created.as_str())
        .bind(ts_to_db(at))
        .fetch_one(&self.pool)
        .await
        .context("Failed to create import header")?;

        let head = Self::map_head(&row)?;
        info!("Created import header {} for tenant {}", head.id, tenant_id);
        Ok(head)
    }

    async fn find_head(&self, head_id: i64) -> Result<Option<ImportHead>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", HEAD_COLUMNS))
            .bind(head_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_head).transpose()
    }

    async fn update_head_state(&self, head_id: i64, state: ImportHeadState) -> Result<()> {
        sqlx::query("UPDATE gt_net_security_imp_head SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(head_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to move header {} to {}", head_id, state))?;
        Ok(())
    }

    async fn delete_head(&self, head_id: i64) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM gt_net_security_imp_head WHERE id = ?")
            .bind(head_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete import header {}", head_id))?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn insert_positions(
        &self,
        head_id: i64,
        positions: &[NewPosition],
    ) -> Result<Vec<ImportPosition>> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(positions.len());

        for position in positions {
            let row = sqlx::query(
                r#"
                INSERT INTO gt_net_security_imp_pos
                (head_id, instrument_id, isin, currency, ticker_symbol, name)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING id, head_id, instrument_id, isin, currency, ticker_symbol, name,
                    security_id, processed_at
                "#,
            )
            .bind(head_id)
            .bind(position.instrument_id)
            .bind(&position.advertised.isin)
            .bind(&position.advertised.currency)
            .bind(&position.advertised.ticker_symbol)
            .bind(&position.advertised.name)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("Failed to add position to header {}", head_id))?;
            stored.push(Self::map_position(&row)?);
        }

        tx.commit().await?;
        debug!("Added {} positions to header {}", stored.len(), head_id);
        Ok(stored)
    }

    async fn positions(&self, head_id: i64) -> Result<Vec<ImportPosition>> {
        let rows = sqlx::query(&format!("{} WHERE head_id = ? ORDER BY id", POSITION_COLUMNS))
            .bind(head_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_position).collect()
    }

    async fn find_position(&self, position_id: i64) -> Result<Option<ImportPosition>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", POSITION_COLUMNS))
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_position).transpose()
    }

    async fn gaps_for_position(&self, position_id: i64) -> Result<Vec<ImportGap>> {
        let rows = sqlx::query(
            "SELECT id, position_id, reason, detail FROM gt_net_security_imp_gap WHERE position_id = ? ORDER BY id",
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_gap).collect()
    }

    async fn gaps_for_head(&self, head_id: i64) -> Result<Vec<ImportGap>> {
        let rows = sqlx::query(
            r#"
            SELECT g.id, g.position_id, g.reason, g.detail
            FROM gt_net_security_imp_gap g
            JOIN gt_net_security_imp_pos p ON p.id = g.position_id
            WHERE p.head_id = ?
            ORDER BY g.position_id, g.id
            "#,
        )
        .bind(head_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_gap).collect()
    }

    async fn apply_resolution(
        &self,
        position_id: i64,
        resolution: &Resolution,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM gt_net_security_imp_gap WHERE position_id = ?")
            .bind(position_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to clear gaps of position {}", position_id))?;

        let (security_id, gaps) = match resolution {
            Resolution::Resolved { security_id } => (Some(*security_id), &[][..]),
            Resolution::Unmatched { gaps } => (None, gaps.as_slice()),
        };

        sqlx::query(
            "UPDATE gt_net_security_imp_pos SET security_id = ?, processed_at = ? WHERE id = ?",
        )
        .bind(security_id)
        .bind(ts_to_db(at))
        .bind(position_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to update position {}", position_id))?;

        for gap in gaps {
            sqlx::query(
                "INSERT INTO gt_net_security_imp_gap (position_id, reason, detail) VALUES (?, ?, ?)",
            )
            .bind(position_id)
            .bind(gap.reason.as_str())
            .bind(&gap.detail)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to record gap for position {}", position_id))?;
        }

        tx.commit().await?;
        Ok(gaps.len())
    }

    async fn enqueue_job(
        &self,
        head_id: i64,
        tenant_id: i64,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // The partial unique index on active jobs turns a duplicate into a no-op
        let inserted = sqlx::query(
            r#"
            INSERT INTO gt_net_import_job (head_id, tenant_id, user_id, status, created_at)
            VALUES (?, ?, ?, 'PENDING', ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(head_id)
        .bind(tenant_id)
        .bind(user_id)
        .bind(ts_to_db(at))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to queue import job for header {}", head_id))?
        .rows_affected();

        if inserted > 0 {
            sqlx::query("UPDATE gt_net_security_imp_head SET state = ? WHERE id = ?")
                .bind(ImportHeadState::LookupPending.as_str())
                .bind(head_id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to mark header {} lookup pending", head_id))?;
        }

        tx.commit().await?;
        Ok(inserted > 0)
    }

    async fn claim_next_job(&self) -> Result<Option<ImportJob>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE gt_net_import_job SET status = 'RUNNING'
            WHERE id = (
                SELECT MIN(id) FROM gt_net_import_job WHERE status = 'PENDING'
            ) AND status = 'PENDING'
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim import job")?;
        row.as_ref().map(Self::map_job).transpose()
    }

    async fn find_job(&self, job_id: i64) -> Result<Option<ImportJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM gt_net_import_job WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::map_job).transpose()
    }

    async fn finish_job(&self, job_id: i64, status: JobStatus, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE gt_net_import_job SET status = ?, finished_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(ts_to_db(at))
            .bind(job_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to finish import job {}", job_id))?;
        Ok(())
    }

    async fn release_job(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE gt_net_import_job SET status = 'PENDING' WHERE id = ? AND status = 'RUNNING'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to release import job {}", job_id))?;
        Ok(())
    }
}
