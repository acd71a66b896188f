use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Shared store for every GTNet component
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str, max_connections: u32) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10))
            .journal_mode(SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Private in-memory store on a single pinned connection
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Peer registry
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gt_net (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_name TEXT NOT NULL UNIQUE,
                time_zone TEXT NOT NULL,
                consumer_usage INTEGER NOT NULL DEFAULT 0,
                supplier_capability INTEGER NOT NULL DEFAULT 0,
                is_local BOOLEAN NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS gt_net_config (
                peer_id INTEGER PRIMARY KEY REFERENCES gt_net(id) ON DELETE CASCADE,
                token_this TEXT NOT NULL,
                token_remote TEXT NOT NULL,
                handshake_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS gt_net_entity (
                peer_id INTEGER NOT NULL REFERENCES gt_net(id) ON DELETE CASCADE,
                entity_kind TEXT NOT NULL,
                accept_request BOOLEAN NOT NULL DEFAULT 0,
                PRIMARY KEY (peer_id, entity_kind)
            );
            CREATE TABLE IF NOT EXISTS gt_net_config_entity (
                peer_id INTEGER PRIMARY KEY REFERENCES gt_net(id) ON DELETE CASCADE,
                exchange BOOLEAN NOT NULL DEFAULT 1,
                use_detail_log BOOLEAN NOT NULL DEFAULT 0,
                consumer_usage_priority INTEGER NOT NULL DEFAULT 100
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create peer registry tables")?;

        // 2. Messages and cached answers
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gt_net_message_answer (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_key TEXT NOT NULL UNIQUE,
                request_code TEXT NOT NULL,
                response_code TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS gt_net_message (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                peer_id INTEGER NOT NULL REFERENCES gt_net(id) ON DELETE CASCADE,
                timestamp INTEGER NOT NULL,
                direction TEXT NOT NULL,
                message_code TEXT NOT NULL,
                payload TEXT NOT NULL,
                request_key TEXT,
                reply_to INTEGER REFERENCES gt_net_message(id),
                answer_id INTEGER REFERENCES gt_net_message_answer(id) ON DELETE SET NULL,
                delivered BOOLEAN NOT NULL DEFAULT 0,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_gt_net_message_peer_time
            ON gt_net_message (peer_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_gt_net_message_pending
            ON gt_net_message (direction, delivered);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create message tables")?;

        // 3. Platform-owned local entities
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS security (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                isin TEXT NOT NULL,
                currency TEXT NOT NULL,
                name TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_security_isin_currency
            ON security (isin, currency);
            CREATE TABLE IF NOT EXISTS currencypair (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_currency TEXT NOT NULL,
                to_currency TEXT NOT NULL,
                UNIQUE (from_currency, to_currency)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create local entity tables")?;

        // 4. Instrument pool. natural_key carries the uniqueness for both forms.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gt_net_instrument (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instrument_kind TEXT NOT NULL,
                natural_key TEXT NOT NULL UNIQUE,
                isin TEXT,
                currency TEXT,
                from_currency TEXT,
                to_currency TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_gt_net_instrument_isin
            ON gt_net_instrument (isin, currency);
            CREATE INDEX IF NOT EXISTS idx_gt_net_instrument_pair
            ON gt_net_instrument (from_currency, to_currency);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create instrument pool table")?;

        // 5. Price pool
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gt_net_lastprice (
                instrument_id INTEGER PRIMARY KEY REFERENCES gt_net_instrument(id),
                timestamp INTEGER NOT NULL,
                last TEXT NOT NULL,
                open TEXT,
                high TEXT,
                low TEXT,
                volume INTEGER,
                source_peer_id INTEGER,
                version INTEGER NOT NULL DEFAULT 1
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create price pool table")?;

        // 6. Exchange configuration
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gt_net_exchange (
                instrument_id INTEGER PRIMARY KEY REFERENCES gt_net_instrument(id),
                receive_live BOOLEAN NOT NULL DEFAULT 0,
                send_live BOOLEAN NOT NULL DEFAULT 0,
                receive_historical BOOLEAN NOT NULL DEFAULT 0,
                send_historical BOOLEAN NOT NULL DEFAULT 0,
                changed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_gt_net_exchange_changed
            ON gt_net_exchange (changed_at);
            CREATE TABLE IF NOT EXISTS gt_net_exchange_sync_run (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mode TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                success BOOLEAN NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create exchange tables")?;

        // 7. Supplier history
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gt_net_supplier_detail_last (
                instrument_id INTEGER NOT NULL REFERENCES gt_net_instrument(id),
                peer_id INTEGER NOT NULL REFERENCES gt_net(id) ON DELETE CASCADE,
                kinds INTEGER NOT NULL,
                observed_at INTEGER NOT NULL,
                PRIMARY KEY (instrument_id, peer_id)
            );
            CREATE TABLE IF NOT EXISTS gt_net_supplier_detail_hist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instrument_id INTEGER NOT NULL REFERENCES gt_net_instrument(id),
                peer_id INTEGER NOT NULL REFERENCES gt_net(id) ON DELETE CASCADE,
                kinds INTEGER NOT NULL,
                observed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_gt_net_supplier_hist
            ON gt_net_supplier_detail_hist (instrument_id, peer_id, observed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create supplier detail tables")?;

        // 8. Import reconciliation
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gt_net_security_imp_head (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS gt_net_security_imp_pos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                head_id INTEGER NOT NULL REFERENCES gt_net_security_imp_head(id) ON DELETE CASCADE,
                instrument_id INTEGER REFERENCES gt_net_instrument(id),
                isin TEXT NOT NULL,
                currency TEXT NOT NULL,
                ticker_symbol TEXT,
                name TEXT,
                security_id INTEGER REFERENCES security(id) ON DELETE SET NULL,
                processed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_gt_net_imp_pos_head
            ON gt_net_security_imp_pos (head_id);
            CREATE TABLE IF NOT EXISTS gt_net_security_imp_gap (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id INTEGER NOT NULL REFERENCES gt_net_security_imp_pos(id) ON DELETE CASCADE,
                reason TEXT NOT NULL,
                detail TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_gt_net_imp_gap_pos
            ON gt_net_security_imp_gap (position_id);
            CREATE TABLE IF NOT EXISTS gt_net_import_job (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                head_id INTEGER NOT NULL REFERENCES gt_net_security_imp_head(id) ON DELETE CASCADE,
                tenant_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                finished_at INTEGER
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_gt_net_import_job_active
            ON gt_net_import_job (head_id) WHERE status IN ('PENDING', 'RUNNING');
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create import reconciliation tables")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
