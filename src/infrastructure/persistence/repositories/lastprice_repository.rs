use super::{decimal_from_db, opt_decimal_from_db, ts_from_db, ts_to_db};
use crate::domain::price::{LastPrice, MergeOutcome, PriceObservation};
use crate::domain::repositories::LastPriceRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

const LASTPRICE_COLUMNS: &str = "SELECT instrument_id, timestamp, last, open, high, low, volume, \
     source_peer_id, version FROM gt_net_lastprice";

pub struct SqliteLastPriceRepository {
    pool: SqlitePool,
}

impl SqliteLastPriceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<LastPrice> {
        let last: String = row.try_get("last")?;
        Ok(LastPrice {
            instrument_id: row.try_get("instrument_id")?,
            timestamp: ts_from_db(row.try_get("timestamp")?)?,
            last: decimal_from_db(&last)?,
            open: opt_decimal_from_db(row.try_get("open")?)?,
            high: opt_decimal_from_db(row.try_get("high")?)?,
            low: opt_decimal_from_db(row.try_get("low")?)?,
            volume: row.try_get("volume")?,
            source_peer_id: row.try_get("source_peer_id")?,
            version: row.try_get("version")?,
        })
    }
}

#[async_trait]
impl LastPriceRepository for SqliteLastPriceRepository {
    async fn merge(
        &self,
        instrument_id: i64,
        observation: &PriceObservation,
        source_peer_id: Option<i64>,
    ) -> Result<MergeOutcome> {
        // Single-statement compare-and-swap: the WHERE on the upsert branch keeps a
        // stored row whose timestamp is equal or newer, and RETURNING yields nothing.
        let version = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO gt_net_lastprice
            (instrument_id, timestamp, last, open, high, low, volume, source_peer_id, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(instrument_id) DO UPDATE SET
                timestamp = excluded.timestamp,
                last = excluded.last,
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                volume = excluded.volume,
                source_peer_id = excluded.source_peer_id,
                version = gt_net_lastprice.version + 1
            WHERE excluded.timestamp > gt_net_lastprice.timestamp
            RETURNING version
            "#,
        )
        .bind(instrument_id)
        .bind(ts_to_db(observation.timestamp))
        .bind(observation.last.to_string())
        .bind(observation.open.map(|d| d.to_string()))
        .bind(observation.high.map(|d| d.to_string()))
        .bind(observation.low.map(|d| d.to_string()))
        .bind(observation.volume)
        .bind(source_peer_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to merge last price for instrument {}", instrument_id))?;

        Ok(match version {
            Some(1) => MergeOutcome::Inserted,
            Some(_) => MergeOutcome::Updated,
            None => MergeOutcome::Discarded,
        })
    }

    async fn find(&self, instrument_id: i64) -> Result<Option<LastPrice>> {
        let row = sqlx::query(&format!("{} WHERE instrument_id = ?", LASTPRICE_COLUMNS))
            .bind(instrument_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_many(&self, instrument_ids: &[i64]) -> Result<Vec<LastPrice>> {
        if instrument_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(LASTPRICE_COLUMNS);
        qb.push(" WHERE instrument_id IN (");
        let mut separated = qb.separated(", ");
        for id in instrument_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY instrument_id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }
}
