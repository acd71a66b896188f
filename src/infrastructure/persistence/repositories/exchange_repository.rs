use super::{ts_from_db, ts_to_db};
use crate::domain::exchange::{ExchangeConfig, ExchangeFlags, SyncMode};
use crate::domain::repositories::ExchangeRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

const EXCHANGE_COLUMNS: &str = "SELECT instrument_id, receive_live, send_live, \
     receive_historical, send_historical, changed_at FROM gt_net_exchange";

pub struct SqliteExchangeRepository {
    pool: SqlitePool,
}

impl SqliteExchangeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<ExchangeConfig> {
        Ok(ExchangeConfig {
            instrument_id: row.try_get("instrument_id")?,
            flags: ExchangeFlags {
                receive_live: row.try_get("receive_live")?,
                send_live: row.try_get("send_live")?,
                receive_historical: row.try_get("receive_historical")?,
                send_historical: row.try_get("send_historical")?,
            },
            changed_at: ts_from_db(row.try_get("changed_at")?)?,
        })
    }
}

#[async_trait]
impl ExchangeRepository for SqliteExchangeRepository {
    async fn upsert(
        &self,
        instrument_id: i64,
        flags: ExchangeFlags,
        changed_at: DateTime<Utc>,
    ) -> Result<ExchangeConfig> {
        let row = sqlx::query(
            r#"
            INSERT INTO gt_net_exchange
            (instrument_id, receive_live, send_live, receive_historical, send_historical, changed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(instrument_id) DO UPDATE SET
                receive_live = excluded.receive_live,
                send_live = excluded.send_live,
                receive_historical = excluded.receive_historical,
                send_historical = excluded.send_historical,
                changed_at = excluded.changed_at
            RETURNING instrument_id, receive_live, send_live, receive_historical,
                send_historical, changed_at
            "#,
        )
        .bind(instrument_id)
        .bind(flags.receive_live)
        .bind(flags.send_live)
        .bind(flags.receive_historical)
        .bind(flags.send_historical)
        .bind(ts_to_db(changed_at))
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to save exchange config of instrument {}", instrument_id))?;

        Self::map_row(&row)
    }

    async fn find(&self, instrument_id: i64) -> Result<Option<ExchangeConfig>> {
        let row = sqlx::query(&format!("{} WHERE instrument_id = ?", EXCHANGE_COLUMNS))
            .bind(instrument_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn all(&self) -> Result<Vec<ExchangeConfig>> {
        let rows = sqlx::query(&format!("{} ORDER BY instrument_id", EXCHANGE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn changed_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ExchangeConfig>> {
        let rows = match since {
            Some(since) => {
                sqlx::query(&format!(
                    "{} WHERE changed_at > ? ORDER BY instrument_id",
                    EXCHANGE_COLUMNS
                ))
                .bind(ts_to_db(since))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY instrument_id", EXCHANGE_COLUMNS))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::map_row).collect()
    }

    async fn replace_all(&self, configs: &[ExchangeConfig]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM gt_net_exchange")
            .execute(&mut *tx)
            .await
            .context("Failed to clear exchange configuration")?;

        for config in configs {
            sqlx::query(
                r#"
                INSERT INTO gt_net_exchange
                (instrument_id, receive_live, send_live, receive_historical, send_historical, changed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(config.instrument_id)
            .bind(config.flags.receive_live)
            .bind(config.flags.send_live)
            .bind(config.flags.receive_historical)
            .bind(config.flags.send_historical)
            .bind(ts_to_db(config.changed_at))
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!("Failed to recreate exchange config of instrument {}", config.instrument_id)
            })?;
        }

        tx.commit().await?;
        info!("Exchange configuration recreated with {} rows", configs.len());
        Ok(configs.len())
    }

    async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let started_at: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(started_at) FROM gt_net_exchange_sync_run WHERE success = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        started_at.map(ts_from_db).transpose()
    }

    async fn record_sync_run(
        &self,
        mode: SyncMode,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        success: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gt_net_exchange_sync_run (mode, started_at, finished_at, success)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(mode.to_string())
        .bind(ts_to_db(started_at))
        .bind(ts_to_db(finished_at))
        .bind(success)
        .execute(&self.pool)
        .await
        .context("Failed to record exchange sync run")?;
        Ok(())
    }
}
