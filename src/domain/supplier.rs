use crate::domain::peer::DataKinds;
use chrono::{DateTime, Utc};

/// Current supply capability a peer advertised for one instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierDetail {
    pub instrument_id: i64,
    pub peer_id: i64,
    pub kinds: DataKinds,
    pub observed_at: DateTime<Utc>,
}

/// Append-only history entry, written whenever the advertised kinds change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierDetailHist {
    pub id: i64,
    pub instrument_id: i64,
    pub peer_id: i64,
    pub kinds: DataKinds,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// First snapshot for the (instrument, peer) pair
    Created,
    Changed,
    /// Same kinds as before; only `observed_at` moved
    Unchanged,
}
