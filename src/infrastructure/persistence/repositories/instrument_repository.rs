use super::ts_to_db;
use crate::domain::instrument::{Instrument, InstrumentKey, InstrumentKind};
use crate::domain::repositories::InstrumentRepository;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

/// Locality is joined in on every read, never stored on the instrument row.
const INSTRUMENT_SELECT: &str = r#"
    SELECT i.id, i.instrument_kind, i.isin, i.currency, i.from_currency, i.to_currency,
           COALESCE(MIN(s.id), MIN(c.id)) AS local_id
    FROM gt_net_instrument i
    LEFT JOIN security s
        ON i.instrument_kind = 'SECURITY' AND s.isin = i.isin AND s.currency = i.currency
    LEFT JOIN currencypair c
        ON i.instrument_kind = 'CURRENCYPAIR'
        AND c.from_currency = i.from_currency AND c.to_currency = i.to_currency
"#;

// Two binds per tuple, well below SQLite's variable limit
const TUPLE_CHUNK: usize = 5000;

pub struct SqliteInstrumentRepository {
    pool: SqlitePool,
}

impl SqliteInstrumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_instrument(row: &SqliteRow) -> Result<Instrument> {
        let kind: String = row.try_get("instrument_kind")?;
        let key = if kind == InstrumentKind::Security.as_str() {
            InstrumentKey::Security {
                isin: row.try_get("isin")?,
                currency: row.try_get("currency")?,
            }
        } else if kind == InstrumentKind::CurrencyPair.as_str() {
            InstrumentKey::CurrencyPair {
                from_currency: row.try_get("from_currency")?,
                to_currency: row.try_get("to_currency")?,
            }
        } else {
            bail!("Unknown instrument kind: {}", kind);
        };

        Ok(Instrument {
            id: row.try_get("id")?,
            key,
            local_id: row.try_get("local_id")?,
        })
    }

    async fn find_by_natural_key(&self, natural_key: &str) -> Result<Option<Instrument>> {
        let row = sqlx::query(&format!(
            "{} WHERE i.natural_key = ? GROUP BY i.id",
            INSTRUMENT_SELECT
        ))
        .bind(natural_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::map_instrument).transpose()
    }

    async fn find_by_tuples(
        &self,
        kind: InstrumentKind,
        first_column: &str,
        second_column: &str,
        tuples: &[(String, String)],
    ) -> Result<Vec<Instrument>> {
        let mut instruments = Vec::new();
        for chunk in tuples.chunks(TUPLE_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(INSTRUMENT_SELECT);
            qb.push(" WHERE i.instrument_kind = ")
                .push_bind(kind.as_str())
                .push(format!(
                    " AND (i.{}, i.{}) IN (",
                    first_column, second_column
                ));
            qb.push_values(chunk, |mut tuple, (first, second)| {
                tuple
                    .push_bind(first.trim().to_uppercase())
                    .push_bind(second.trim().to_uppercase());
            });
            qb.push(") GROUP BY i.id ORDER BY i.id");

            let rows = qb
                .build()
                .fetch_all(&self.pool)
                .await
                .context("Failed batched instrument lookup")?;
            for row in &rows {
                instruments.push(Self::map_instrument(row)?);
            }
        }
        debug!(
            "Batched {} lookup: {} tuples -> {} instruments",
            kind.as_str(),
            tuples.len(),
            instruments.len()
        );
        Ok(instruments)
    }
}

#[async_trait]
impl InstrumentRepository for SqliteInstrumentRepository {
    async fn find_or_create(&self, key: &InstrumentKey) -> Result<Instrument> {
        let natural_key = key.natural_key();
        let (isin, currency, from_currency, to_currency) = match key {
            InstrumentKey::Security { isin, currency } => {
                (Some(isin.as_str()), Some(currency.as_str()), None, None)
            }
            InstrumentKey::CurrencyPair {
                from_currency,
                to_currency,
            } => (
                None,
                None,
                Some(from_currency.as_str()),
                Some(to_currency.as_str()),
            ),
        };

        // The unique natural key makes the insert a no-op for the losers of a race
        let inserted = sqlx::query(
            r#"
            INSERT INTO gt_net_instrument
            (instrument_kind, natural_key, isin, currency, from_currency, to_currency, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(natural_key) DO NOTHING
            "#,
        )
        .bind(key.kind().as_str())
        .bind(&natural_key)
        .bind(isin)
        .bind(currency)
        .bind(from_currency)
        .bind(to_currency)
        .bind(ts_to_db(Utc::now()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert instrument {}", natural_key))?
        .rows_affected();

        if inserted > 0 {
            debug!("Created pool instrument {}", natural_key);
        }

        self.find_by_natural_key(&natural_key)
            .await?
            .with_context(|| format!("Instrument {} vanished after insert", natural_key))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Instrument>> {
        let row = sqlx::query(&format!("{} WHERE i.id = ? GROUP BY i.id", INSTRUMENT_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_instrument).transpose()
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Instrument>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(INSTRUMENT_SELECT);
        qb.push(" WHERE i.id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") GROUP BY i.id ORDER BY i.id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_instrument).collect()
    }

    async fn find_by_isin_currency_tuples(
        &self,
        tuples: &[(String, String)],
    ) -> Result<Vec<Instrument>> {
        self.find_by_tuples(InstrumentKind::Security, "isin", "currency", tuples)
            .await
    }

    async fn find_by_currency_tuples(
        &self,
        tuples: &[(String, String)],
    ) -> Result<Vec<Instrument>> {
        self.find_by_tuples(
            InstrumentKind::CurrencyPair,
            "from_currency",
            "to_currency",
            tuples,
        )
        .await
    }
}
