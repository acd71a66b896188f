//! SQLite implementations of the domain repository traits.
//!
//! Timestamps are stored as epoch microseconds, decimals as text.

mod exchange_repository;
mod import_repository;
mod instrument_repository;
mod lastprice_repository;
mod local_entity_repository;
mod message_repository;
mod peer_repository;
mod supplier_detail_repository;

pub use exchange_repository::SqliteExchangeRepository;
pub use import_repository::SqliteImportRepository;
pub use instrument_repository::SqliteInstrumentRepository;
pub use lastprice_repository::SqliteLastPriceRepository;
pub use local_entity_repository::SqliteLocalEntityRepository;
pub use message_repository::SqliteMessageRepository;
pub use peer_repository::SqlitePeerRepository;
pub use supplier_detail_repository::SqliteSupplierDetailRepository;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

pub(crate) fn ts_to_db(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(crate) fn ts_from_db(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .with_context(|| format!("Invalid stored timestamp: {}", micros))
}

pub(crate) fn opt_ts_from_db(micros: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    micros.map(ts_from_db).transpose()
}

pub(crate) fn decimal_from_db(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("Invalid stored decimal: {}", value))
}

pub(crate) fn opt_decimal_from_db(value: Option<String>) -> Result<Option<Decimal>> {
    value.as_deref().map(decimal_from_db).transpose()
}
