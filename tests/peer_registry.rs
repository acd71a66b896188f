mod common;

use gtnet::domain::errors::GtNetError;
use gtnet::domain::peer::{DataKind, DataKinds, EntityConfig};

#[tokio::test]
async fn test_ready_suppliers_need_handshake_and_accepted_capability() {
    let services = common::services().await;
    let registry = &services.registry;

    let a = common::trusted_peer(&services, "https://a.example", DataKinds::empty(), DataKinds::LAST_PRICE).await;
    registry.set_entity_capability(a.id, DataKind::LastPrice, true).await.unwrap();

    // Supplies the kind but never completed a handshake
    let b = registry
        .register_peer(common::new_peer("https://b.example", DataKinds::empty(), DataKinds::LAST_PRICE))
        .await
        .unwrap();
    registry.set_entity_capability(b.id, DataKind::LastPrice, true).await.unwrap();

    // Trusted, but does not accept requests
    let c = common::trusted_peer(&services, "https://c.example", DataKinds::empty(), DataKinds::LAST_PRICE).await;
    registry.set_entity_capability(c.id, DataKind::LastPrice, false).await.unwrap();

    let candidates = registry.find_supplier_candidates(DataKinds::LAST_PRICE).await.unwrap();
    assert_eq!(candidates.len(), 3);

    let ready = registry.find_ready_suppliers(DataKinds::LAST_PRICE).await.unwrap();
    let ids: Vec<i64> = ready.iter().map(|(peer, _)| peer.id).collect();
    assert_eq!(ids, vec![a.id]);
    assert!(!ready[0].1.token_this.is_empty());

    assert!(registry.find_ready_suppliers(DataKinds::HISTORICAL_PRICES).await.unwrap().is_empty());
    assert!(registry.find_supplier_candidates(DataKinds::empty()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_candidates_follow_usage_priority() {
    let services = common::services().await;
    let registry = &services.registry;

    let first = common::trusted_peer(&services, "https://first.example", DataKinds::empty(), DataKinds::all()).await;
    let second = common::trusted_peer(&services, "https://second.example", DataKinds::empty(), DataKinds::HISTORICAL_PRICES).await;
    registry
        .set_entity_config(EntityConfig {
            consumer_usage_priority: 10,
            ..EntityConfig::for_peer(second.id)
        })
        .await
        .unwrap();

    let ids: Vec<i64> = registry
        .find_supplier_candidates(DataKinds::HISTORICAL_PRICES)
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[tokio::test]
async fn test_local_peer_is_never_a_supplier() {
    let services = common::services().await;
    let mut own = common::new_peer("https://self.example", DataKinds::empty(), DataKinds::all());
    own.is_local = true;
    let own = services.registry.register_peer(own).await.unwrap();

    assert!(
        services
            .registry
            .find_supplier_candidates(DataKinds::all())
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(services.registry.local_peer().await.unwrap().id, own.id);
}

#[tokio::test]
async fn test_configured_local_entry_must_exist() {
    let services = common::services_with(gtnet::config::GtNetEnvConfig {
        my_entry_id: Some(42),
        ..common::gtnet_config()
    })
    .await;
    let err = services.registry.local_peer().await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<GtNetError>(),
        Some(&GtNetError::LocalPeerMissing { peer_id: 42 })
    );
}

#[tokio::test]
async fn test_missing_configuration_is_reported() {
    let services = common::services().await;
    let peer = services
        .registry
        .register_peer(common::new_peer("https://new.example", DataKinds::empty(), DataKinds::empty()))
        .await
        .unwrap();

    let err = services.registry.require_config(peer.id).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<GtNetError>(),
        Some(&GtNetError::ConfigurationMissing { peer_id: peer.id })
    );

    let err = services.registry.get_peer(999).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<GtNetError>(),
        Some(&GtNetError::PeerNotFound { peer_id: 999 })
    );
}

#[tokio::test]
async fn test_exchange_partners_respect_entity_config() {
    let services = common::services().await;
    let registry = &services.registry;
    common::local_peer(&services).await;

    let on = common::trusted_peer(&services, "https://on.example", DataKinds::all(), DataKinds::all()).await;
    let off = common::trusted_peer(&services, "https://off.example", DataKinds::all(), DataKinds::all()).await;
    registry
        .register_peer(common::new_peer("https://untrusted.example", DataKinds::all(), DataKinds::all()))
        .await
        .unwrap();
    registry
        .set_entity_config(EntityConfig {
            exchange: false,
            ..EntityConfig::for_peer(off.id)
        })
        .await
        .unwrap();

    let partners: Vec<i64> = registry.exchange_partners().await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(partners, vec![on.id]);
    assert!(!registry.entity_config(off.id).await.unwrap().exchange);
    assert!(registry.entity_config(on.id).await.unwrap().exchange);
}
