mod common;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use gtnet::application::message_dispatcher::MessageDispatcher;
use gtnet::application::message_service::MessageService;
use gtnet::domain::errors::GtNetError;
use gtnet::domain::message::{
    Message, MessageAnswer, MessageCode, MessageDirection, MessageEnvelope, MessageResponse,
    NewAnswer, NewMessage, RequestKey,
};
use gtnet::domain::peer::{DataKinds, Peer, PeerConfig};
use gtnet::domain::ports::PeerTransport;
use gtnet::domain::repositories::MessageRepository;
use gtnet::infrastructure::observability::Metrics;
use serde_json::json;
use std::sync::Arc;

fn price_request(sender: i64, receiver: i64) -> MessageEnvelope {
    MessageEnvelope::new(MessageCode::LastPriceRequest, sender, receiver)
        .with_argument("isin", "CH0012032048")
        .with_argument("currency", "CHF")
}

#[tokio::test]
async fn test_semantically_equal_request_reuses_answer() {
    let services = common::services().await;
    let local = common::local_peer(&services).await;
    let a = common::trusted_peer(&services, "https://a.example", DataKinds::empty(), DataKinds::all()).await;
    let b = common::trusted_peer(&services, "https://b.example", DataKinds::empty(), DataKinds::all()).await;

    let sent = services
        .messages
        .get_message_answer_by(&local, &a, &price_request(local.id, a.id))
        .await
        .unwrap();
    assert_eq!(sent.direction, MessageDirection::Sent);
    assert!(!sent.delivered);
    assert!(!sent.from_cache());

    let reply = services
        .messages
        .record_response(&MessageResponse::payload(sent.id, json!({"last": "101.5"})))
        .await
        .unwrap();
    assert_eq!(reply.code, MessageCode::LastPriceResponse);
    assert_eq!(reply.reply_to, Some(sent.id));
    assert!(reply.answer_id.is_some());
    assert!(!reply.from_cache());
    let original = services.persistence.message_repository.find_by_id(sent.id).await.unwrap().unwrap();
    assert!(original.delivered);

    // Same question, other argument order, other receiver
    let reordered = MessageEnvelope::new(MessageCode::LastPriceRequest, local.id, b.id)
        .with_argument("currency", "CHF")
        .with_argument("isin", "CH0012032048");
    let cached = services
        .messages
        .get_message_answer_by(&local, &b, &reordered)
        .await
        .unwrap();
    assert!(cached.from_cache());
    assert_eq!(cached.direction, MessageDirection::Received);
    assert_eq!(cached.peer_id, b.id);
    assert_eq!(cached.payload, json!({"last": "101.5"}));

    assert_eq!(
        Metrics::counter_value(&services.metrics.answer_cache_total, &["hit"]),
        1.0
    );
    assert!(services.messages.pending_outbound(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_error_replies_are_not_cached() {
    let services = common::services().await;
    let local = common::local_peer(&services).await;
    let a = common::trusted_peer(&services, "https://a.example", DataKinds::empty(), DataKinds::all()).await;
    let envelope = price_request(local.id, a.id);

    let sent = services.messages.get_message_answer_by(&local, &a, &envelope).await.unwrap();
    let reply = services
        .messages
        .record_response(&MessageResponse::error(sent.id, "instrument unknown"))
        .await
        .unwrap();
    assert_eq!(reply.error.as_deref(), Some("instrument unknown"));
    assert!(reply.answer_id.is_none());
    assert!(services.messages.find_cached_answer(&envelope).await.unwrap().is_none());

    let again = services.messages.get_message_answer_by(&local, &a, &envelope).await.unwrap();
    assert_eq!(again.direction, MessageDirection::Sent);
    assert!(!again.from_cache());
}

#[tokio::test]
async fn test_request_without_handshake_is_refused() {
    let services = common::services().await;
    let local = common::local_peer(&services).await;
    let stranger = services
        .registry
        .register_peer(common::new_peer("https://stranger.example", DataKinds::empty(), DataKinds::all()))
        .await
        .unwrap();

    let err = services
        .messages
        .get_message_answer_by(&local, &stranger, &price_request(local.id, stranger.id))
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<GtNetError>(),
        Some(&GtNetError::ConfigurationMissing { peer_id: stranger.id })
    );
    assert!(services.messages.messages_for_peer(stranger.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_responses_must_match_an_outbound_request() {
    let services = common::services().await;
    let local = common::local_peer(&services).await;
    let a = common::trusted_peer(&services, "https://a.example", DataKinds::empty(), DataKinds::all()).await;

    let err = services
        .messages
        .record_response(&MessageResponse::payload(404, json!({})))
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<GtNetError>(),
        Some(&GtNetError::MessageNotFound { message_id: 404 })
    );

    let sent = services
        .messages
        .get_message_answer_by(&local, &a, &price_request(local.id, a.id))
        .await
        .unwrap();
    let reply = services
        .messages
        .record_response(&MessageResponse::payload(sent.id, json!({"last": "1"})))
        .await
        .unwrap();
    let err = services
        .messages
        .record_response(&MessageResponse::payload(reply.id, json!({})))
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<GtNetError>(),
        Some(&GtNetError::NotARequest { message_id: reply.id })
    );
}

#[tokio::test]
async fn test_peer_log_is_ordered() {
    let services = common::services().await;
    let local = common::local_peer(&services).await;
    let a = common::trusted_peer(&services, "https://a.example", DataKinds::empty(), DataKinds::all()).await;

    for isin in ["CH0012032048", "US0378331005", "DE0007164600"] {
        let envelope = MessageEnvelope::new(MessageCode::LastPriceRequest, local.id, a.id)
            .with_argument("isin", isin);
        services.messages.get_message_answer_by(&local, &a, &envelope).await.unwrap();
    }

    let log = services.messages.messages_for_peer(a.id).await.unwrap();
    assert_eq!(log.len(), 3);
    assert!(
        log.windows(2)
            .all(|w| (w[0].timestamp, w[0].id) < (w[1].timestamp, w[1].id))
    );
}

/// Answers every request, except for peers whose domain contains "down"
struct ScriptedTransport;

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn deliver(
        &self,
        peer: &Peer,
        _config: &PeerConfig,
        message: &Message,
    ) -> Result<Option<MessageResponse>> {
        if peer.domain_name.contains("down") {
            bail!("connection refused");
        }
        Ok(Some(MessageResponse::payload(
            message.id,
            json!({"last": "55.10"}),
        )))
    }
}

#[tokio::test]
async fn test_dispatcher_delivers_and_keeps_failures_pending() {
    let services = common::services().await;
    let local = common::local_peer(&services).await;
    let up = common::trusted_peer(&services, "https://up.example", DataKinds::empty(), DataKinds::all()).await;
    let down = common::trusted_peer(&services, "https://down.example", DataKinds::empty(), DataKinds::all()).await;

    let to_up = price_request(local.id, up.id);
    services.messages.get_message_answer_by(&local, &up, &to_up).await.unwrap();
    let to_down = MessageEnvelope::new(MessageCode::HistoricalPriceRequest, local.id, down.id)
        .with_argument("isin", "US0378331005");
    let stuck = services.messages.get_message_answer_by(&local, &down, &to_down).await.unwrap();

    let dispatcher = services.dispatcher(Arc::new(ScriptedTransport), 10);
    let report = dispatcher.dispatch_pending().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.responses, 1);
    assert_eq!(report.failed, 1);

    let pending = services.messages.pending_outbound(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, stuck.id);
    assert!(services.messages.find_cached_answer(&to_up).await.unwrap().is_some());
}

/// Store whose reply recording always fails
struct ReplyRejectingStore {
    inner: Arc<dyn MessageRepository>,
}

#[async_trait]
impl MessageRepository for ReplyRejectingStore {
    async fn insert(&self, message: &NewMessage) -> Result<Message> {
        self.inner.insert(message).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Message>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_peer(&self, peer_id: i64) -> Result<Vec<Message>> {
        self.inner.find_by_peer(peer_id).await
    }

    async fn pending_outbound(&self, limit: usize) -> Result<Vec<Message>> {
        self.inner.pending_outbound(limit).await
    }

    async fn mark_delivered(&self, id: i64) -> Result<()> {
        self.inner.mark_delivered(id).await
    }

    async fn find_answer(&self, key: &RequestKey) -> Result<Option<MessageAnswer>> {
        self.inner.find_answer(key).await
    }

    async fn record_reply(
        &self,
        _reply: &NewMessage,
        _answer: Option<&NewAnswer>,
    ) -> Result<(Message, Option<MessageAnswer>)> {
        Err(anyhow!("disk I/O error"))
    }
}

#[tokio::test]
async fn test_reply_that_cannot_be_stored_keeps_request_pending() {
    let services = common::services().await;
    let local = common::local_peer(&services).await;
    let up = common::trusted_peer(&services, "https://up.example", DataKinds::empty(), DataKinds::all()).await;
    let request = price_request(local.id, up.id);
    let sent = services.messages.get_message_answer_by(&local, &up, &request).await.unwrap();

    let failing = Arc::new(MessageService::new(
        services.registry.clone(),
        Arc::new(ReplyRejectingStore {
            inner: services.persistence.message_repository.clone(),
        }),
        services.metrics.clone(),
        Some(3600),
    ));
    let dispatcher = MessageDispatcher::new(
        services.registry.clone(),
        failing,
        Arc::new(ScriptedTransport),
        services.metrics.clone(),
        10,
    );
    let report = dispatcher.dispatch_pending().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 0);

    let pending = services.messages.pending_outbound(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, sent.id);

    // The next pass with a working store picks it up again
    let report = services
        .dispatcher(Arc::new(ScriptedTransport), 10)
        .dispatch_pending()
        .await
        .unwrap();
    assert_eq!(report.responses, 1);
    assert!(services.messages.pending_outbound(10).await.unwrap().is_empty());
    assert!(services.messages.find_cached_answer(&request).await.unwrap().is_some());
}
