use thiserror::Error;

/// Typed failures raised by the GTNet core.
///
/// Services return `anyhow::Result`; these values travel inside the `anyhow::Error`
/// so callers can tell a configuration problem apart from a storage failure with
/// `err.downcast_ref::<GtNetError>()`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GtNetError {
    #[error("Peer {peer_id} has no configuration: handshake not completed")]
    ConfigurationMissing { peer_id: i64 },

    #[error("Peer not found: {peer_id}")]
    PeerNotFound { peer_id: i64 },

    #[error("Local peer entry {peer_id} is not registered")]
    LocalPeerMissing { peer_id: i64 },

    #[error("Import header not found: {head_id}")]
    HeaderNotFound { head_id: i64 },

    #[error("Import position not found: {position_id}")]
    PositionNotFound { position_id: i64 },

    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: i64 },

    #[error("Message {message_id} is not an outbound request")]
    NotARequest { message_id: i64 },

    #[error("Invalid time zone: {name}")]
    InvalidTimeZone { name: String },

    #[error("Invalid ISIN: {isin}")]
    InvalidIsin { isin: String },

    #[error("Invalid currency code: {code}")]
    InvalidCurrency { code: String },

    #[error("Import header {head_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        head_id: i64,
        from: String,
        to: String,
    },

    #[error("Unknown sync mode: {value}. Must be 'INCREMENTAL' or 'FULL_RECREATION'")]
    UnknownSyncMode { value: String },
}
