use crate::application::peer_registry::PeerRegistry;
use crate::domain::errors::GtNetError;
use crate::domain::message::{
    Message, MessageAnswer, MessageDirection, MessageEnvelope, MessageResponse, NewAnswer,
    NewMessage, ResponseBody,
};
use crate::domain::peer::Peer;
use crate::domain::ports::AnswerHandler;
use crate::domain::repositories::MessageRepository;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Request/response layer between peers.
///
/// Requests are never sent inline: a request either reuses a cached answer for a
/// semantically identical envelope or is stored as an undelivered SENT message for
/// the dispatcher.
pub struct MessageService {
    registry: Arc<PeerRegistry>,
    messages: Arc<dyn MessageRepository>,
    metrics: Metrics,
    answer_ttl: Option<Duration>,
    answer_handlers: Vec<Arc<dyn AnswerHandler>>,
}

impl MessageService {
    pub fn new(
        registry: Arc<PeerRegistry>,
        messages: Arc<dyn MessageRepository>,
        metrics: Metrics,
        answer_ttl_seconds: Option<u64>,
    ) -> Self {
        Self {
            registry,
            messages,
            metrics,
            answer_ttl: answer_ttl_seconds.map(|s| Duration::seconds(s as i64)),
            answer_handlers: Vec::new(),
        }
    }

    pub fn with_answer_handler(mut self, handler: Arc<dyn AnswerHandler>) -> Self {
        self.answer_handlers.push(handler);
        self
    }

    pub async fn get_message_answer_by(
        &self,
        local: &Peer,
        remote: &Peer,
        envelope: &MessageEnvelope,
    ) -> Result<Message> {
        if let Err(e) = self.registry.require_config(remote.id).await {
            warn!(
                "MessageService: {} request to {} refused: {}",
                envelope.code, remote.domain_name, e
            );
            self.metrics.inc_messages("SENT", "refused");
            return Err(e);
        }

        let key = envelope.request_key();
        let now = Utc::now();

        if let Some(answer) = self.messages.find_answer(&key).await?
            && answer.is_valid_at(now)
        {
            self.metrics.inc_answer_cache(true);
            let message = self
                .messages
                .insert(&NewMessage {
                    peer_id: remote.id,
                    timestamp: now,
                    direction: MessageDirection::Received,
                    code: answer.response_code,
                    payload: answer.payload.clone(),
                    request_key: Some(key),
                    reply_to: None,
                    answer_id: Some(answer.id),
                    delivered: true,
                    error: None,
                })
                .await?;
            debug!(
                "MessageService: {} for {} answered from cache (answer {})",
                envelope.code, remote.domain_name, answer.id
            );
            return Ok(message);
        }

        self.metrics.inc_answer_cache(false);
        let message = self
            .messages
            .insert(&NewMessage {
                peer_id: remote.id,
                timestamp: now,
                direction: MessageDirection::Sent,
                code: envelope.code,
                payload: serde_json::to_value(envelope)?,
                request_key: Some(key),
                reply_to: None,
                answer_id: None,
                delivered: false,
                error: None,
            })
            .await?;
        debug!(
            "MessageService: {} from {} to {} queued as message {}",
            envelope.code, local.domain_name, remote.domain_name, message.id
        );
        Ok(message)
    }

    /// Stores the reply to one outbound request and marks the request delivered.
    /// Payload replies become the cached answer for the request's key and are
    /// handed to the answer handlers; error replies are kept on the message only.
    /// A failing handler is logged and does not undo the stored reply.
    pub async fn record_response(&self, response: &MessageResponse) -> Result<Message> {
        let message_id = response.correlation_id;
        let original = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or(GtNetError::MessageNotFound { message_id })?;
        if original.direction != MessageDirection::Sent || !original.code.is_request() {
            return Err(GtNetError::NotARequest { message_id }.into());
        }

        let now = Utc::now();
        let response_code = original.code.response_code();
        let mut reply = NewMessage {
            peer_id: original.peer_id,
            timestamp: now,
            direction: MessageDirection::Received,
            code: response_code,
            payload: Value::Null,
            request_key: original.request_key.clone(),
            reply_to: Some(original.id),
            answer_id: None,
            delivered: true,
            error: None,
        };

        let (stored, answer) = match &response.body {
            ResponseBody::Payload(payload) => {
                reply.payload = payload.clone();
                let answer = original.request_key.clone().map(|request_key| NewAnswer {
                    request_key,
                    request_code: original.code,
                    response_code,
                    payload: payload.clone(),
                    created_at: now,
                    expires_at: self.answer_ttl.map(|ttl| now + ttl),
                });
                self.metrics.inc_messages("RECEIVED", "ok");
                let recorded = self.messages.record_reply(&reply, answer.as_ref()).await?;
                for handler in &self.answer_handlers {
                    if let Err(e) = handler.on_answer(&original, &recorded.0).await {
                        error!(
                            "MessageService: applying answer to message {} failed: {:#}",
                            original.id, e
                        );
                    }
                }
                recorded
            }
            ResponseBody::Error(reason) => {
                warn!(
                    "MessageService: peer {} answered {} with error: {}",
                    original.peer_id, original.code, reason
                );
                reply.error = Some(reason.clone());
                self.metrics.inc_messages("RECEIVED", "error");
                self.messages.record_reply(&reply, None).await?
            }
        };

        if let Some(answer) = answer {
            info!(
                "MessageService: cached answer {} for {} (message {})",
                answer.id, original.code, original.id
            );
        }
        Ok(stored)
    }

    pub async fn find_cached_answer(&self, envelope: &MessageEnvelope) -> Result<Option<MessageAnswer>> {
        let now = Utc::now();
        Ok(self
            .messages
            .find_answer(&envelope.request_key())
            .await?
            .filter(|answer| answer.is_valid_at(now)))
    }

    /// Log of one peer in (timestamp, id) order
    pub async fn messages_for_peer(&self, peer_id: i64) -> Result<Vec<Message>> {
        self.messages.find_by_peer(peer_id).await
    }

    pub async fn pending_outbound(&self, limit: usize) -> Result<Vec<Message>> {
        self.messages.pending_outbound(limit).await
    }

    pub async fn mark_delivered(&self, message_id: i64) -> Result<()> {
        self.messages.mark_delivered(message_id).await
    }
}
