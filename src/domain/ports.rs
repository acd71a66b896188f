use crate::domain::local::LocalSecurity;
use crate::domain::message::{Message, MessageResponse};
use crate::domain::peer::{Peer, PeerConfig};
use crate::domain::price::PriceObservation;
use anyhow::Result;
use async_trait::async_trait;

/// Physical delivery of protocol messages to a remote node
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Delivers one outbound message. A transport that answers synchronously
    /// returns the reply; asynchronous transports return None and feed replies
    /// through `MessageService::record_response` later.
    async fn deliver(
        &self,
        peer: &Peer,
        config: &PeerConfig,
        message: &Message,
    ) -> Result<Option<MessageResponse>>;
}

/// Consumer of settled replies, called after a payload reply is stored
#[async_trait]
pub trait AnswerHandler: Send + Sync {
    async fn on_answer(&self, request: &Message, reply: &Message) -> Result<()>;
}

/// Local price connector layer
#[async_trait]
pub trait PriceConnector: Send + Sync {
    async fn fetch_last_prices(&self, securities: &[LocalSecurity])
    -> Result<Vec<PriceObservation>>;
}
