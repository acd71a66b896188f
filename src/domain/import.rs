//! Import reconciliation model: batches of peer-advertised instruments matched
//! against local securities.

use crate::domain::instrument::is_valid_isin;
use crate::domain::local::LocalSecurity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportHeadState {
    Created,
    PositionsGenerated,
    LookupPending,
    Complete,
}

impl ImportHeadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportHeadState::Created => "CREATED",
            ImportHeadState::PositionsGenerated => "POSITIONS_GENERATED",
            ImportHeadState::LookupPending => "LOOKUP_PENDING",
            ImportHeadState::Complete => "COMPLETE",
        }
    }

    pub fn can_transition_to(&self, next: ImportHeadState) -> bool {
        use ImportHeadState::*;
        matches!(
            (self, next),
            (Created, PositionsGenerated)
                | (PositionsGenerated, PositionsGenerated)
                | (PositionsGenerated, LookupPending)
                | (LookupPending, LookupPending)
                | (LookupPending, Complete)
                | (Complete, PositionsGenerated)
                | (Complete, LookupPending)
        )
    }
}

impl fmt::Display for ImportHeadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ImportHeadState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(ImportHeadState::Created),
            "POSITIONS_GENERATED" => Ok(ImportHeadState::PositionsGenerated),
            "LOOKUP_PENDING" => Ok(ImportHeadState::LookupPending),
            "COMPLETE" => Ok(ImportHeadState::Complete),
            _ => anyhow::bail!("Unknown import header state: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportHead {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub state: ImportHeadState,
    pub created_at: DateTime<Utc>,
}

/// One instrument entry of a peer's catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisedInstrument {
    pub isin: String,
    pub currency: String,
    pub ticker_symbol: Option<String>,
    pub name: Option<String>,
}

impl AdvertisedInstrument {
    pub fn new(isin: &str, currency: &str) -> Self {
        Self {
            isin: isin.to_string(),
            currency: currency.to_string(),
            ticker_symbol: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPosition {
    pub instrument_id: Option<i64>,
    pub advertised: AdvertisedInstrument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPosition {
    pub id: i64,
    pub head_id: i64,
    /// Pool instrument, absent when the advertised key could not be normalized
    pub instrument_id: Option<i64>,
    pub isin: String,
    pub currency: String,
    pub ticker_symbol: Option<String>,
    pub name: Option<String>,
    pub security_id: Option<i64>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Closed set of reasons a position could not be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GapReason {
    NoLocalMatch,
    AmbiguousMatch,
    CurrencyMismatch,
    InvalidIsin,
}

impl GapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapReason::NoLocalMatch => "NO_LOCAL_MATCH",
            GapReason::AmbiguousMatch => "AMBIGUOUS_MATCH",
            GapReason::CurrencyMismatch => "CURRENCY_MISMATCH",
            GapReason::InvalidIsin => "INVALID_ISIN",
        }
    }
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GapReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NO_LOCAL_MATCH" => Ok(GapReason::NoLocalMatch),
            "AMBIGUOUS_MATCH" => Ok(GapReason::AmbiguousMatch),
            "CURRENCY_MISMATCH" => Ok(GapReason::CurrencyMismatch),
            "INVALID_ISIN" => Ok(GapReason::InvalidIsin),
            _ => anyhow::bail!("Unknown gap reason: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportGap {
    pub id: i64,
    pub position_id: i64,
    pub reason: GapReason,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGap {
    pub reason: GapReason,
    pub detail: String,
}

impl NewGap {
    pub fn new(reason: GapReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Outcome of looking one position up against local securities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { security_id: i64 },
    Unmatched { gaps: Vec<NewGap> },
}

/// Decide a position's match from the local securities sharing its ISIN.
///
/// Exactly one ISIN+currency match resolves. Several exact matches are rejected,
/// never guessed. Without an exact match the ISIN alone tells currency mismatch
/// apart from a missing security. A malformed ISIN never resolves; its gap comes
/// first, followed by the lookup's own gap when the lookup fails too.
pub fn resolve_position(isin: &str, currency: &str, same_isin: &[LocalSecurity]) -> Resolution {
    let lookup = match_local(isin, currency, same_isin);
    if is_valid_isin(isin) {
        return lookup;
    }

    let mut gaps = vec![NewGap::new(
        GapReason::InvalidIsin,
        format!("'{}' is not a well-formed ISIN", isin),
    )];
    if let Resolution::Unmatched { gaps: lookup_gaps } = lookup {
        gaps.extend(lookup_gaps);
    }
    Resolution::Unmatched { gaps }
}

fn match_local(isin: &str, currency: &str, same_isin: &[LocalSecurity]) -> Resolution {
    let exact: Vec<&LocalSecurity> = same_isin
        .iter()
        .filter(|s| s.isin == isin && s.currency == currency)
        .collect();

    match exact.as_slice() {
        [single] => Resolution::Resolved {
            security_id: single.id,
        },
        [] => {
            let other_currencies: Vec<&str> = same_isin
                .iter()
                .filter(|s| s.isin == isin)
                .map(|s| s.currency.as_str())
                .collect();
            let gap = if other_currencies.is_empty() {
                NewGap::new(
                    GapReason::NoLocalMatch,
                    format!("No local security with ISIN {}", isin),
                )
            } else {
                NewGap::new(
                    GapReason::CurrencyMismatch,
                    format!(
                        "ISIN {} exists locally in {} but not in {}",
                        isin,
                        other_currencies.join(","),
                        currency
                    ),
                )
            };
            Resolution::Unmatched { gaps: vec![gap] }
        }
        several => {
            let ids: Vec<String> = several.iter().map(|s| s.id.to_string()).collect();
            Resolution::Unmatched {
                gaps: vec![NewGap::new(
                    GapReason::AmbiguousMatch,
                    format!(
                        "{} local securities match {}/{}: {}",
                        several.len(),
                        isin,
                        currency,
                        ids.join(",")
                    ),
                )],
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "DONE" => Ok(JobStatus::Done),
            "FAILED" => Ok(JobStatus::Failed),
            _ => anyhow::bail!("Unknown job status: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJob {
    pub id: i64,
    pub head_id: i64,
    pub tenant_id: i64,
    pub user_id: i64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportJobReport {
    pub job_id: i64,
    pub head_id: i64,
    pub resolved: usize,
    pub unmatched: usize,
    pub gaps_recorded: usize,
    /// Positions whose processing failed, with the error text
    pub failures: Vec<(i64, String)>,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISIN: &str = "CH0012032048";

    fn local(id: i64, isin: &str, currency: &str) -> LocalSecurity {
        LocalSecurity {
            id,
            isin: isin.to_string(),
            currency: currency.to_string(),
            name: format!("Security {}", id),
        }
    }

    #[test]
    fn test_single_exact_match_resolves() {
        let candidates = vec![local(1, ISIN, "CHF"), local(2, ISIN, "EUR")];
        assert_eq!(
            resolve_position(ISIN, "CHF", &candidates),
            Resolution::Resolved { security_id: 1 }
        );
    }

    #[test]
    fn test_multiple_exact_matches_are_ambiguous() {
        let candidates = vec![local(4, ISIN, "CHF"), local(9, ISIN, "CHF")];
        match resolve_position(ISIN, "CHF", &candidates) {
            Resolution::Unmatched { gaps } => {
                assert_eq!(gaps.len(), 1);
                assert_eq!(gaps[0].reason, GapReason::AmbiguousMatch);
                assert!(gaps[0].detail.contains("4,9"));
            }
            other => panic!("Expected gap, got {:?}", other),
        }
    }

    #[test]
    fn test_currency_mismatch_and_no_match() {
        let candidates = vec![local(1, ISIN, "EUR")];
        let Resolution::Unmatched { gaps } = resolve_position(ISIN, "CHF", &candidates) else {
            panic!("Expected gap");
        };
        assert_eq!(gaps[0].reason, GapReason::CurrencyMismatch);

        let Resolution::Unmatched { gaps } = resolve_position(ISIN, "CHF", &[]) else {
            panic!("Expected gap");
        };
        assert_eq!(gaps[0].reason, GapReason::NoLocalMatch);
    }

    #[test]
    fn test_invalid_isin_also_reports_lookup_gap() {
        let Resolution::Unmatched { gaps } = resolve_position("XX123", "CHF", &[]) else {
            panic!("Expected gap");
        };
        let reasons: Vec<GapReason> = gaps.iter().map(|g| g.reason).collect();
        assert_eq!(reasons, vec![GapReason::InvalidIsin, GapReason::NoLocalMatch]);
    }

    #[test]
    fn test_invalid_isin_never_resolves() {
        let candidates = vec![local(3, "CH0012032049", "CHF")];
        assert_eq!(
            resolve_position("CH0012032049", "CHF", &candidates),
            Resolution::Unmatched {
                gaps: vec![NewGap::new(
                    GapReason::InvalidIsin,
                    "'CH0012032049' is not a well-formed ISIN"
                )]
            }
        );
    }

    #[test]
    fn test_state_transitions() {
        use ImportHeadState::*;
        assert!(Created.can_transition_to(PositionsGenerated));
        assert!(!Created.can_transition_to(LookupPending));
        assert!(PositionsGenerated.can_transition_to(LookupPending));
        assert!(LookupPending.can_transition_to(Complete));
        assert!(Complete.can_transition_to(LookupPending));
        assert!(!Complete.can_transition_to(Created));
    }
}
