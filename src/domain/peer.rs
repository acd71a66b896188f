//! Peer registry model: remote GTNet nodes, their trust configuration and
//! per data kind capabilities.

use crate::domain::errors::GtNetError;
use bitflags::bitflags;
use chrono::{DateTime, Offset, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of market data exchanged between peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataKind {
    LastPrice,
    HistoricalPrices,
}

impl DataKind {
    pub const ALL: [DataKind; 2] = [DataKind::LastPrice, DataKind::HistoricalPrices];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::LastPrice => "LAST_PRICE",
            DataKind::HistoricalPrices => "HISTORICAL_PRICES",
        }
    }

    pub fn flag(&self) -> DataKinds {
        match self {
            DataKind::LastPrice => DataKinds::LAST_PRICE,
            DataKind::HistoricalPrices => DataKinds::HISTORICAL_PRICES,
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LAST_PRICE" => Ok(DataKind::LastPrice),
            "HISTORICAL_PRICES" => Ok(DataKind::HistoricalPrices),
            _ => anyhow::bail!(
                "Invalid data kind: {}. Must be 'LAST_PRICE' or 'HISTORICAL_PRICES'",
                s
            ),
        }
    }
}

bitflags! {
    /// Capability mask shared by every node in the network.
    /// Bit 0 is LAST_PRICE, bit 1 is HISTORICAL_PRICES.
    #[derive(Default)]
    pub struct DataKinds: u8 {
        const LAST_PRICE = 0b01;
        const HISTORICAL_PRICES = 0b10;
    }
}

impl DataKinds {
    pub fn kinds(&self) -> Vec<DataKind> {
        DataKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.contains(kind.flag()))
            .collect()
    }

    /// Stored form; unknown bits from newer nodes are dropped.
    pub fn from_db(bits: i64) -> Self {
        DataKinds::from_bits_truncate(bits as u8)
    }

    pub fn to_db(self) -> i64 {
        self.bits() as i64
    }
}

impl From<DataKind> for DataKinds {
    fn from(kind: DataKind) -> Self {
        kind.flag()
    }
}

impl FromIterator<DataKind> for DataKinds {
    fn from_iter<I: IntoIterator<Item = DataKind>>(iter: I) -> Self {
        iter.into_iter()
            .fold(DataKinds::empty(), |acc, kind| acc | kind.flag())
    }
}

impl fmt::Display for DataKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.kinds().iter().map(|k| k.as_str()).collect();
        write!(f, "{}", names.join(","))
    }
}

/// A GTNet node known to this instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: i64,
    pub domain_name: String,
    /// IANA zone name, e.g. "Europe/Zurich"
    pub time_zone: String,
    pub consumer_usage: DataKinds,
    pub supplier_capability: DataKinds,
    /// Marks this node's own entry
    pub is_local: bool,
    pub created_at: DateTime<Utc>,
}

impl Peer {
    pub fn can_supply(&self, requested: DataKinds) -> bool {
        self.supplier_capability.intersects(requested)
    }

    pub fn consumes(&self, offered: DataKinds) -> bool {
        self.consumer_usage.intersects(offered)
    }

    /// Offset of this peer's local clock from UTC at `at`, in seconds
    pub fn utc_offset_seconds(&self, at: DateTime<Utc>) -> Result<i32, GtNetError> {
        let tz = parse_time_zone(&self.time_zone)?;
        Ok(at.with_timezone(&tz).offset().fix().local_minus_utc())
    }
}

#[derive(Debug, Clone)]
pub struct NewPeer {
    pub domain_name: String,
    pub time_zone: String,
    pub consumer_usage: DataKinds,
    pub supplier_capability: DataKinds,
    pub is_local: bool,
}

pub fn parse_time_zone(name: &str) -> Result<Tz, GtNetError> {
    name.parse::<Tz>().map_err(|_| GtNetError::InvalidTimeZone {
        name: name.to_string(),
    })
}

/// Difference between the local clocks of `from` and `to` at `at`, reduced to [0, 60) minutes.
///
/// Whole-hour zone differences vanish; only the sub-hour part matters when two
/// peers agree on a minute within the hour for request windows.
pub fn wall_clock_offset_minutes(
    from: &Peer,
    to: &Peer,
    at: DateTime<Utc>,
) -> Result<u32, GtNetError> {
    let diff_seconds = to.utc_offset_seconds(at)? - from.utc_offset_seconds(at)?;
    Ok((diff_seconds / 60).rem_euclid(60) as u32)
}

/// Trust material created by a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub peer_id: i64,
    /// Token this node issued to the remote
    pub token_this: String,
    /// Token the remote issued to this node
    pub token_remote: String,
    pub handshake_at: DateTime<Utc>,
}

/// Whether a peer serves a data kind to others
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCapability {
    pub peer_id: i64,
    pub kind: DataKind,
    pub accept_request: bool,
}

/// Per-peer exchange and logging preferences
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityConfig {
    pub peer_id: i64,
    pub exchange: bool,
    pub use_detail_log: bool,
    /// Lower is preferred when several suppliers qualify
    pub consumer_usage_priority: i32,
}

impl EntityConfig {
    pub fn for_peer(peer_id: i64) -> Self {
        Self {
            peer_id,
            exchange: true,
            use_detail_log: false,
            consumer_usage_priority: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn peer(time_zone: &str) -> Peer {
        Peer {
            id: 1,
            domain_name: "https://node.example".to_string(),
            time_zone: time_zone.to_string(),
            consumer_usage: DataKinds::empty(),
            supplier_capability: DataKinds::LAST_PRICE,
            is_local: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_data_kinds_intersection() {
        let supplier = peer("UTC");
        assert!(supplier.can_supply(DataKinds::LAST_PRICE));
        assert!(supplier.can_supply(DataKinds::all()));
        assert!(!supplier.can_supply(DataKinds::HISTORICAL_PRICES));
        assert!(!supplier.can_supply(DataKinds::empty()));
    }

    #[test]
    fn test_data_kinds_db_and_display() {
        let kinds: DataKinds = [DataKind::HistoricalPrices, DataKind::LastPrice]
            .into_iter()
            .collect();
        assert_eq!(kinds.to_db(), 3);
        assert_eq!(DataKinds::from_db(0b110), DataKinds::HISTORICAL_PRICES);
        assert_eq!(kinds.to_string(), "LAST_PRICE,HISTORICAL_PRICES");
    }

    #[test]
    fn test_data_kind_parsing() {
        assert_eq!("last_price".parse::<DataKind>().unwrap(), DataKind::LastPrice);
        assert!("QUOTES".parse::<DataKind>().is_err());
    }

    #[test]
    fn test_offset_whole_hours_vanish() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let offset =
            wall_clock_offset_minutes(&peer("Europe/Zurich"), &peer("America/New_York"), at)
                .unwrap();
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_offset_half_hour_zone() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let utc = peer("UTC");
        let india = peer("Asia/Kolkata");
        assert_eq!(wall_clock_offset_minutes(&utc, &india, at).unwrap(), 30);
        assert_eq!(wall_clock_offset_minutes(&india, &utc, at).unwrap(), 30);

        let nepal = peer("Asia/Kathmandu");
        assert_eq!(wall_clock_offset_minutes(&utc, &nepal, at).unwrap(), 45);
        assert_eq!(wall_clock_offset_minutes(&nepal, &utc, at).unwrap(), 15);
    }

    #[test]
    fn test_invalid_time_zone() {
        let err = peer("Mars/Olympus").utc_offset_seconds(Utc::now()).unwrap_err();
        assert!(matches!(err, GtNetError::InvalidTimeZone { .. }));
    }
}
