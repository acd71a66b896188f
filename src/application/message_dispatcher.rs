use crate::application::message_service::MessageService;
use crate::application::peer_registry::PeerRegistry;
use crate::domain::message::Message;
use crate::domain::ports::PeerTransport;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub responses: usize,
}

/// Drains undelivered outbound messages through a `PeerTransport`.
///
/// Runs on its own schedule, so a slow or unreachable peer never blocks price
/// updates or request handling.
pub struct MessageDispatcher {
    registry: Arc<PeerRegistry>,
    messages: Arc<MessageService>,
    transport: Arc<dyn PeerTransport>,
    metrics: Metrics,
    batch_size: usize,
}

impl MessageDispatcher {
    pub fn new(
        registry: Arc<PeerRegistry>,
        messages: Arc<MessageService>,
        transport: Arc<dyn PeerTransport>,
        metrics: Metrics,
        batch_size: usize,
    ) -> Self {
        Self {
            registry,
            messages,
            transport,
            metrics,
            batch_size,
        }
    }

    /// One pass over the pending queue. A failed delivery stays pending.
    pub async fn dispatch_pending(&self) -> Result<DispatchReport> {
        let pending = self.messages.pending_outbound(self.batch_size).await?;
        let mut report = DispatchReport::default();

        for message in &pending {
            match self.deliver(message).await {
                Ok(answered) => {
                    report.delivered += 1;
                    if answered {
                        report.responses += 1;
                    }
                    self.metrics.inc_messages("SENT", "delivered");
                }
                Err(e) => {
                    warn!(
                        "MessageDispatcher: message {} to peer {} not delivered: {:#}",
                        message.id, message.peer_id, e
                    );
                    report.failed += 1;
                    self.metrics.inc_messages("SENT", "failed");
                }
            }
        }

        if !pending.is_empty() {
            info!(
                "MessageDispatcher: {} delivered, {} failed, {} answered",
                report.delivered, report.failed, report.responses
            );
        }
        Ok(report)
    }

    async fn deliver(&self, message: &Message) -> Result<bool> {
        let peer = self.registry.get_peer(message.peer_id).await?;
        let config = self.registry.require_config(peer.id).await?;
        // A recorded reply marks the request delivered in the same transaction
        match self.transport.deliver(&peer, &config, message).await? {
            Some(response) => {
                self.messages.record_response(&response).await?;
                Ok(true)
            }
            None => {
                self.messages.mark_delivered(message.id).await?;
                Ok(false)
            }
        }
    }

    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("MessageDispatcher: started (interval: {:?})", interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.dispatch_pending().await {
                        error!("MessageDispatcher: pass failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("MessageDispatcher: shutting down");
                    break;
                }
            }
        }
    }
}
