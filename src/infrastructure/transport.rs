use crate::domain::message::{Message, MessageResponse};
use crate::domain::peer::{Peer, PeerConfig};
use crate::domain::ports::PeerTransport;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Transport that only logs outbound messages.
///
/// Used by the server until a network transport is configured; replies arrive
/// later through `MessageService::record_response`.
pub struct LoggingTransport;

#[async_trait]
impl PeerTransport for LoggingTransport {
    async fn deliver(
        &self,
        peer: &Peer,
        _config: &PeerConfig,
        message: &Message,
    ) -> Result<Option<MessageResponse>> {
        info!(
            "LoggingTransport: {} message {} -> {} ({})",
            message.code, message.id, peer.domain_name, message.payload
        );
        Ok(None)
    }
}
