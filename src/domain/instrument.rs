//! Pooled instrument identity shared across peers.
//!
//! Peers share no surrogate keys, so an instrument is identified only by its natural
//! key: ISIN plus trading currency for securities, the currency tuple for pairs.

use crate::domain::errors::GtNetError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Security,
    CurrencyPair,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Security => "SECURITY",
            InstrumentKind::CurrencyPair => "CURRENCYPAIR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKey {
    Security {
        isin: String,
        currency: String,
    },
    CurrencyPair {
        from_currency: String,
        to_currency: String,
    },
}

impl InstrumentKey {
    /// Normalized security key. The ISIN is only trimmed and upper-cased here;
    /// strict format checks belong to import reconciliation.
    pub fn security(isin: &str, currency: &str) -> Result<Self, GtNetError> {
        let isin = isin.trim().to_uppercase();
        if isin.is_empty() {
            return Err(GtNetError::InvalidIsin { isin });
        }
        Ok(InstrumentKey::Security {
            isin,
            currency: normalize_currency(currency)?,
        })
    }

    pub fn currency_pair(from_currency: &str, to_currency: &str) -> Result<Self, GtNetError> {
        Ok(InstrumentKey::CurrencyPair {
            from_currency: normalize_currency(from_currency)?,
            to_currency: normalize_currency(to_currency)?,
        })
    }

    pub fn kind(&self) -> InstrumentKind {
        match self {
            InstrumentKey::Security { .. } => InstrumentKind::Security,
            InstrumentKey::CurrencyPair { .. } => InstrumentKind::CurrencyPair,
        }
    }

    /// Value of the unique `natural_key` column
    pub fn natural_key(&self) -> String {
        match self {
            InstrumentKey::Security { isin, currency } => format!("S:{}:{}", isin, currency),
            InstrumentKey::CurrencyPair {
                from_currency,
                to_currency,
            } => format!("C:{}:{}", from_currency, to_currency),
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKey::Security { isin, currency } => write!(f, "{}/{}", isin, currency),
            InstrumentKey::CurrencyPair {
                from_currency,
                to_currency,
            } => write!(f, "{}{}", from_currency, to_currency),
        }
    }
}

/// A pooled instrument. `local_id` is resolved by join on every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub id: i64,
    pub key: InstrumentKey,
    pub local_id: Option<i64>,
}

impl Instrument {
    pub fn is_local(&self) -> bool {
        self.local_id.is_some()
    }
}

pub fn normalize_currency(code: &str) -> Result<String, GtNetError> {
    let code = code.trim().to_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(GtNetError::InvalidCurrency { code });
    }
    Ok(code)
}

/// ISO 6166 shape plus Luhn check digit over the letter-expanded code
pub fn is_valid_isin(isin: &str) -> bool {
    let bytes = isin.as_bytes();
    if bytes.len() != 12
        || !bytes[..2].iter().all(|b| b.is_ascii_uppercase())
        || !bytes[2..11].iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        || !bytes[11].is_ascii_digit()
    {
        return false;
    }

    let mut digits = Vec::with_capacity(24);
    for b in bytes {
        if b.is_ascii_digit() {
            digits.push(b - b'0');
        } else {
            let value = b - b'A' + 10;
            digits.push(value / 10);
            digits.push(value % 10);
        }
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            let d = d as u32;
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_key_normalization() {
        let key = InstrumentKey::security(" us0378331005 ", "usd").unwrap();
        assert_eq!(key.natural_key(), "S:US0378331005:USD");
        assert_eq!(key.kind(), InstrumentKind::Security);
    }

    #[test]
    fn test_currency_pair_key() {
        let key = InstrumentKey::currency_pair("eur", "CHF").unwrap();
        assert_eq!(key.natural_key(), "C:EUR:CHF");
        assert_eq!(key.to_string(), "EURCHF");
    }

    #[test]
    fn test_rejects_bad_currency() {
        assert!(matches!(
            InstrumentKey::security("US0378331005", "US"),
            Err(GtNetError::InvalidCurrency { .. })
        ));
        assert!(InstrumentKey::currency_pair("EUR", "C1F").is_err());
    }

    #[test]
    fn test_isin_validation() {
        assert!(is_valid_isin("US0378331005"));
        assert!(is_valid_isin("CH0012032048"));
        assert!(is_valid_isin("DE000BAY0017"));
        assert!(!is_valid_isin("US0378331006"));
        assert!(!is_valid_isin("US0000001"));
        assert!(!is_valid_isin("us0378331005"));
    }
}
