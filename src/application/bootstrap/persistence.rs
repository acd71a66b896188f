use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::DatabaseEnvConfig;
use crate::domain::repositories::{
    ExchangeRepository, ImportRepository, InstrumentRepository, LastPriceRepository,
    LocalEntityRepository, MessageRepository, PeerRepository, SupplierDetailRepository,
};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteExchangeRepository, SqliteImportRepository, SqliteInstrumentRepository,
    SqliteLastPriceRepository, SqliteLocalEntityRepository, SqliteMessageRepository,
    SqlitePeerRepository, SqliteSupplierDetailRepository,
};

#[derive(Clone)]
pub struct PersistenceHandle {
    pub db: Database,
    pub peer_repository: Arc<dyn PeerRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub instrument_repository: Arc<dyn InstrumentRepository>,
    pub lastprice_repository: Arc<dyn LastPriceRepository>,
    pub exchange_repository: Arc<dyn ExchangeRepository>,
    pub import_repository: Arc<dyn ImportRepository>,
    pub supplier_detail_repository: Arc<dyn SupplierDetailRepository>,
    pub local_entity_repository: Arc<dyn LocalEntityRepository>,
}

pub struct PersistenceBootstrap;

impl PersistenceBootstrap {
    pub async fn init(config: &DatabaseEnvConfig) -> Result<PersistenceHandle> {
        info!("Initializing Database at {}", config.url);

        let db = Database::new(&config.url, config.max_connections)
            .await
            .context("Failed to initialize database")?;

        Ok(Self::from_database(db))
    }

    /// Builds every repository over an already opened store
    pub fn from_database(db: Database) -> PersistenceHandle {
        let pool = db.pool.clone();
        PersistenceHandle {
            peer_repository: Arc::new(SqlitePeerRepository::new(pool.clone())),
            message_repository: Arc::new(SqliteMessageRepository::new(pool.clone())),
            instrument_repository: Arc::new(SqliteInstrumentRepository::new(pool.clone())),
            lastprice_repository: Arc::new(SqliteLastPriceRepository::new(pool.clone())),
            exchange_repository: Arc::new(SqliteExchangeRepository::new(pool.clone())),
            import_repository: Arc::new(SqliteImportRepository::new(pool.clone())),
            supplier_detail_repository: Arc::new(SqliteSupplierDetailRepository::new(pool.clone())),
            local_entity_repository: Arc::new(SqliteLocalEntityRepository::new(pool)),
            db,
        }
    }
}
