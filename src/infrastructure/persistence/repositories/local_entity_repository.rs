use crate::domain::instrument::normalize_currency;
use crate::domain::local::{LocalCurrencyPair, LocalSecurity};
use crate::domain::repositories::LocalEntityRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

// One bind per ISIN, well below SQLite's variable limit
const ISIN_CHUNK: usize = 10_000;

pub struct SqliteLocalEntityRepository {
    pool: SqlitePool,
}

impl SqliteLocalEntityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn to_security((id, isin, currency, name): (i64, String, String, String)) -> LocalSecurity {
    LocalSecurity {
        id,
        isin,
        currency,
        name,
    }
}

#[async_trait]
impl LocalEntityRepository for SqliteLocalEntityRepository {
    async fn save_security(&self, isin: &str, currency: &str, name: &str) -> Result<LocalSecurity> {
        let currency = normalize_currency(currency)?;
        let row = sqlx::query_as::<_, (i64, String, String, String)>(
            "INSERT INTO security (isin, currency, name) VALUES (?, ?, ?) RETURNING id, isin, currency, name",
        )
        .bind(isin.trim().to_uppercase())
        .bind(currency)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to save local security {}", isin))?;
        Ok(to_security(row))
    }

    async fn delete_security(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM security WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete local security {}", id))?;
        Ok(())
    }

    async fn save_currency_pair(
        &self,
        from_currency: &str,
        to_currency: &str,
    ) -> Result<LocalCurrencyPair> {
        let from_currency = normalize_currency(from_currency)?;
        let to_currency = normalize_currency(to_currency)?;
        let (id, from_currency, to_currency) = sqlx::query_as::<_, (i64, String, String)>(
            r#"
            INSERT INTO currencypair (from_currency, to_currency) VALUES (?, ?)
            ON CONFLICT(from_currency, to_currency) DO UPDATE SET from_currency = excluded.from_currency
            RETURNING id, from_currency, to_currency
            "#,
        )
        .bind(from_currency)
        .bind(to_currency)
        .fetch_one(&self.pool)
        .await
        .context("Failed to save local currency pair")?;

        Ok(LocalCurrencyPair {
            id,
            from_currency,
            to_currency,
        })
    }

    async fn securities_by_isins(&self, isins: &[String]) -> Result<Vec<LocalSecurity>> {
        let mut securities = Vec::new();
        for chunk in isins.chunks(ISIN_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT id, isin, currency, name FROM security WHERE isin IN (");
            let mut separated = qb.separated(", ");
            for isin in chunk {
                separated.push_bind(isin.trim().to_uppercase());
            }
            separated.push_unseparated(")");

            let rows = qb
                .build_query_as::<(i64, String, String, String)>()
                .fetch_all(&self.pool)
                .await
                .context("Failed batched local security lookup")?;
            securities.extend(rows.into_iter().map(to_security));
        }

        // An ISIN repeated across chunks matches the same rows twice
        securities.sort_by_key(|s| s.id);
        securities.dedup_by_key(|s| s.id);
        Ok(securities)
    }

    async fn all_securities(&self) -> Result<Vec<LocalSecurity>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT id, isin, currency, name FROM security ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(to_security).collect())
    }

    async fn all_currency_pairs(&self) -> Result<Vec<LocalCurrencyPair>> {
        let rows = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, from_currency, to_currency FROM currencypair ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, from_currency, to_currency)| LocalCurrencyPair {
                id,
                from_currency,
                to_currency,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;

    #[tokio::test]
    async fn test_isin_lookup_spans_several_chunks() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteLocalEntityRepository::new(db.pool.clone());
        let roche = repo.save_security("CH0012032048", "CHF", "Roche").await.unwrap();
        let apple = repo.save_security("US0378331005", "USD", "Apple").await.unwrap();

        let mut isins: Vec<String> = (0..2 * ISIN_CHUNK).map(|i| format!("XX{:010}", i)).collect();
        isins.insert(0, "US0378331005".to_string());
        isins.push("ch0012032048".to_string());
        isins.push("US0378331005".to_string());

        let found = repo.securities_by_isins(&isins).await.unwrap();
        let ids: Vec<i64> = found.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![roche.id, apple.id]);
    }
}
