//! Message protocol model: envelopes, stored messages and cached answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCode {
    Handshake,
    HandshakeAccept,
    HandshakeReject,
    LastPriceRequest,
    LastPriceResponse,
    HistoricalPriceRequest,
    HistoricalPriceResponse,
    ExchangeSync,
    ExchangeSyncResponse,
}

impl MessageCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCode::Handshake => "HANDSHAKE",
            MessageCode::HandshakeAccept => "HANDSHAKE_ACCEPT",
            MessageCode::HandshakeReject => "HANDSHAKE_REJECT",
            MessageCode::LastPriceRequest => "LAST_PRICE_REQUEST",
            MessageCode::LastPriceResponse => "LAST_PRICE_RESPONSE",
            MessageCode::HistoricalPriceRequest => "HISTORICAL_PRICE_REQUEST",
            MessageCode::HistoricalPriceResponse => "HISTORICAL_PRICE_RESPONSE",
            MessageCode::ExchangeSync => "EXCHANGE_SYNC",
            MessageCode::ExchangeSyncResponse => "EXCHANGE_SYNC_RESPONSE",
        }
    }

    /// Code of the reply a remote sends back for this request
    pub fn response_code(&self) -> MessageCode {
        match self {
            MessageCode::Handshake => MessageCode::HandshakeAccept,
            MessageCode::LastPriceRequest => MessageCode::LastPriceResponse,
            MessageCode::HistoricalPriceRequest => MessageCode::HistoricalPriceResponse,
            MessageCode::ExchangeSync => MessageCode::ExchangeSyncResponse,
            other => *other,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MessageCode::Handshake
                | MessageCode::LastPriceRequest
                | MessageCode::HistoricalPriceRequest
                | MessageCode::ExchangeSync
        )
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageCode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HANDSHAKE" => Ok(MessageCode::Handshake),
            "HANDSHAKE_ACCEPT" => Ok(MessageCode::HandshakeAccept),
            "HANDSHAKE_REJECT" => Ok(MessageCode::HandshakeReject),
            "LAST_PRICE_REQUEST" => Ok(MessageCode::LastPriceRequest),
            "LAST_PRICE_RESPONSE" => Ok(MessageCode::LastPriceResponse),
            "HISTORICAL_PRICE_REQUEST" => Ok(MessageCode::HistoricalPriceRequest),
            "HISTORICAL_PRICE_RESPONSE" => Ok(MessageCode::HistoricalPriceResponse),
            "EXCHANGE_SYNC" => Ok(MessageCode::ExchangeSync),
            "EXCHANGE_SYNC_RESPONSE" => Ok(MessageCode::ExchangeSyncResponse),
            _ => anyhow::bail!("Unknown message code: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDirection {
    Sent,
    Received,
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageDirection::Sent => write!(f, "SENT"),
            MessageDirection::Received => write!(f, "RECEIVED"),
        }
    }
}

impl FromStr for MessageDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SENT" => Ok(MessageDirection::Sent),
            "RECEIVED" => Ok(MessageDirection::Received),
            _ => anyhow::bail!("Unknown message direction: {}", s),
        }
    }
}

/// Semantic identity of a request: SHA-256 over the code and the canonical arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request as handed to the protocol layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub code: MessageCode,
    pub sender_peer_id: i64,
    pub receiver_peer_id: i64,
    pub arguments: BTreeMap<String, Value>,
}

impl MessageEnvelope {
    pub fn new(code: MessageCode, sender_peer_id: i64, receiver_peer_id: i64) -> Self {
        Self {
            code,
            sender_peer_id,
            receiver_peer_id,
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Sender and receiver are deliberately left out: two nodes asking the same
    /// question share one answer.
    pub fn request_key(&self) -> RequestKey {
        // BTreeMap and serde_json's default Map both serialize keys sorted
        let canonical = serde_json::to_string(&self.arguments).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.code.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical.as_bytes());
        RequestKey(hex::encode(hasher.finalize()))
    }

    pub fn is_semantically_equal(&self, other: &MessageEnvelope) -> bool {
        self.code == other.code && self.arguments == other.arguments
    }

    pub fn payload(&self) -> Value {
        Value::Object(self.arguments.clone().into_iter().collect())
    }
}

/// Stored protocol message, always attributed to one peer
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub peer_id: i64,
    pub timestamp: DateTime<Utc>,
    pub direction: MessageDirection,
    pub code: MessageCode,
    pub payload: Value,
    pub request_key: Option<RequestKey>,
    pub reply_to: Option<i64>,
    pub answer_id: Option<i64>,
    pub delivered: bool,
    pub error: Option<String>,
}

impl Message {
    /// Synthesized from a stored answer instead of a live reply. Live replies also
    /// link their answer but always carry `reply_to`.
    pub fn from_cache(&self) -> bool {
        self.reply_to.is_none() && self.answer_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub peer_id: i64,
    pub timestamp: DateTime<Utc>,
    pub direction: MessageDirection,
    pub code: MessageCode,
    pub payload: Value,
    pub request_key: Option<RequestKey>,
    pub reply_to: Option<i64>,
    pub answer_id: Option<i64>,
    pub delivered: bool,
    pub error: Option<String>,
}

/// Settled reply, reusable for any semantically identical request
#[derive(Debug, Clone, PartialEq)]
pub struct MessageAnswer {
    pub id: i64,
    pub request_key: RequestKey,
    pub request_code: MessageCode,
    pub response_code: MessageCode,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MessageAnswer {
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expiry| at < expiry)
    }
}

#[derive(Debug, Clone)]
pub struct NewAnswer {
    pub request_key: RequestKey,
    pub request_code: MessageCode,
    pub response_code: MessageCode,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    Payload(Value),
    Error(String),
}

/// Reply delivered by the transport for one stored outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub correlation_id: i64,
    pub body: ResponseBody,
}

impl MessageResponse {
    pub fn payload(correlation_id: i64, payload: Value) -> Self {
        Self {
            correlation_id,
            body: ResponseBody::Payload(payload),
        }
    }

    pub fn error(correlation_id: i64, reason: impl Into<String>) -> Self {
        Self {
            correlation_id,
            body: ResponseBody::Error(reason.into()),
        }
    }
}
