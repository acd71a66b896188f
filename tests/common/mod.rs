#![allow(dead_code)]

use gtnet::application::bootstrap::{GtNetServices, PersistenceBootstrap, ServicesBootstrap};
use gtnet::config::GtNetEnvConfig;
use gtnet::domain::exchange::ExchangeFlags;
use gtnet::domain::peer::{DataKinds, NewPeer, Peer};
use gtnet::infrastructure::observability::Metrics;
use gtnet::infrastructure::persistence::Database;
use std::path::Path;

pub fn gtnet_config() -> GtNetEnvConfig {
    GtNetEnvConfig {
        my_entry_id: None,
        default_exchange_flags: ExchangeFlags::default(),
        answer_ttl_seconds: Some(3600),
    }
}

pub async fn services_with(config: GtNetEnvConfig) -> GtNetServices {
    let db = Database::in_memory().await.expect("Failed to open database");
    let metrics = Metrics::new().expect("Failed to create metrics");
    ServicesBootstrap::init(&config, PersistenceBootstrap::from_database(db), metrics)
}

pub async fn services() -> GtNetServices {
    services_with(gtnet_config()).await
}

/// Services over a SQLite file in `dir`, with a pool of several connections
pub async fn file_services(dir: &Path) -> GtNetServices {
    let url = format!("sqlite://{}/gtnet.db", dir.display());
    let db = Database::new(&url, 5).await.expect("Failed to open database");
    let metrics = Metrics::new().expect("Failed to create metrics");
    ServicesBootstrap::init(&gtnet_config(), PersistenceBootstrap::from_database(db), metrics)
}

pub fn new_peer(domain: &str, consumes: DataKinds, supplies: DataKinds) -> NewPeer {
    NewPeer {
        domain_name: domain.to_string(),
        time_zone: "Europe/Zurich".to_string(),
        consumer_usage: consumes,
        supplier_capability: supplies,
        is_local: false,
    }
}

pub async fn local_peer(services: &GtNetServices) -> Peer {
    let mut peer = new_peer("https://local.example", DataKinds::empty(), DataKinds::empty());
    peer.is_local = true;
    services
        .registry
        .register_peer(peer)
        .await
        .expect("Failed to register local peer")
}

/// Registers a remote peer and completes the handshake with it
pub async fn trusted_peer(
    services: &GtNetServices,
    domain: &str,
    consumes: DataKinds,
    supplies: DataKinds,
) -> Peer {
    let peer = services
        .registry
        .register_peer(new_peer(domain, consumes, supplies))
        .await
        .expect("Failed to register peer");
    services
        .registry
        .complete_handshake(peer.id, "remote-token")
        .await
        .expect("Failed to complete handshake");
    peer
}
