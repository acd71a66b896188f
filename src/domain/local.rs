//! Rows owned by the surrounding platform. GTNet only reads them for locality
//! joins and import lookups.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSecurity {
    pub id: i64,
    pub isin: String,
    pub currency: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCurrencyPair {
    pub id: i64,
    pub from_currency: String,
    pub to_currency: String,
}
