use crate::domain::errors::GtNetError;
use crate::domain::peer::{
    DataKind, DataKinds, EntityCapability, EntityConfig, NewPeer, Peer, PeerConfig,
    parse_time_zone, wall_clock_offset_minutes,
};
use crate::domain::repositories::PeerRepository;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Registry of known GTNet nodes and the trust established with them.
pub struct PeerRegistry {
    peers: Arc<dyn PeerRepository>,
    my_entry_id: Option<i64>,
}

impl PeerRegistry {
    pub fn new(peers: Arc<dyn PeerRepository>, my_entry_id: Option<i64>) -> Self {
        Self { peers, my_entry_id }
    }

    pub async fn register_peer(&self, new_peer: NewPeer) -> Result<Peer> {
        parse_time_zone(&new_peer.time_zone)?;
        let peer = self.peers.insert(&new_peer).await?;
        info!(
            "PeerRegistry: {} registered (supplies: [{}], consumes: [{}])",
            peer.domain_name, peer.supplier_capability, peer.consumer_usage
        );
        Ok(peer)
    }

    pub async fn get_peer(&self, peer_id: i64) -> Result<Peer> {
        let peer = self.peers.find_by_id(peer_id).await?;
        Ok(peer.ok_or(GtNetError::PeerNotFound { peer_id })?)
    }

    pub async fn list_peers(&self) -> Result<Vec<Peer>> {
        self.peers.list().await
    }

    /// This node's own entry: the configured id, or the single row flagged local
    pub async fn local_peer(&self) -> Result<Peer> {
        match self.my_entry_id {
            Some(peer_id) => {
                let peer = self.peers.find_by_id(peer_id).await?;
                Ok(peer.ok_or(GtNetError::LocalPeerMissing { peer_id })?)
            }
            None => self
                .peers
                .list()
                .await?
                .into_iter()
                .find(|p| p.is_local)
                .ok_or_else(|| anyhow!("No local peer entry registered and GTNET_MY_ENTRY_ID unset")),
        }
    }

    /// Stores the tokens of a completed handshake. Repeating it rotates both tokens.
    pub async fn complete_handshake(&self, peer_id: i64, token_remote: &str) -> Result<PeerConfig> {
        let peer = self.get_peer(peer_id).await?;
        let config = PeerConfig {
            peer_id,
            token_this: Uuid::new_v4().to_string(),
            token_remote: token_remote.to_string(),
            handshake_at: Utc::now(),
        };
        self.peers
            .save_config(&config)
            .await
            .with_context(|| format!("Failed to complete handshake with {}", peer.domain_name))?;
        info!("PeerRegistry: handshake with {} completed", peer.domain_name);
        Ok(config)
    }

    /// Fails with `ConfigurationMissing` until a handshake has been completed
    pub async fn require_config(&self, peer_id: i64) -> Result<PeerConfig> {
        let config = self.peers.find_config(peer_id).await?;
        Ok(config.ok_or(GtNetError::ConfigurationMissing { peer_id })?)
    }

    pub async fn set_entity_capability(
        &self,
        peer_id: i64,
        kind: DataKind,
        accept_request: bool,
    ) -> Result<()> {
        self.get_peer(peer_id).await?;
        self.peers
            .save_entity_capability(&EntityCapability {
                peer_id,
                kind,
                accept_request,
            })
            .await
    }

    pub async fn entity_capabilities(&self, peer_id: i64) -> Result<Vec<EntityCapability>> {
        self.peers.entity_capabilities(peer_id).await
    }

    pub async fn set_entity_config(&self, config: EntityConfig) -> Result<()> {
        self.get_peer(config.peer_id).await?;
        self.peers.save_entity_config(&config).await
    }

    /// Stored entity config, or the defaults when none was saved
    pub async fn entity_config(&self, peer_id: i64) -> Result<EntityConfig> {
        Ok(self
            .peers
            .find_entity_config(peer_id)
            .await?
            .unwrap_or_else(|| EntityConfig::for_peer(peer_id)))
    }

    pub async fn find_supplier_candidates(&self, kinds: DataKinds) -> Result<Vec<Peer>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        self.peers.find_suppliers(kinds).await
    }

    /// Candidates with a completed handshake that accept requests for a requested kind
    pub async fn find_ready_suppliers(&self, kinds: DataKinds) -> Result<Vec<(Peer, PeerConfig)>> {
        let mut ready = Vec::new();
        for peer in self.find_supplier_candidates(kinds).await? {
            let Some(config) = self.peers.find_config(peer.id).await? else {
                debug!("PeerRegistry: {} skipped, no handshake", peer.domain_name);
                continue;
            };
            let accepted: DataKinds = self
                .peers
                .entity_capabilities(peer.id)
                .await?
                .into_iter()
                .filter(|c| c.accept_request)
                .map(|c| c.kind)
                .collect();
            if accepted.intersects(kinds) {
                ready.push((peer, config));
            }
        }
        Ok(ready)
    }

    /// Remote peers eligible for exchange sync: handshake done and exchange enabled
    pub async fn exchange_partners(&self) -> Result<Vec<Peer>> {
        let mut partners = Vec::new();
        for peer in self.peers.list().await?.into_iter().filter(|p| !p.is_local) {
            if self.peers.find_config(peer.id).await?.is_none() {
                continue;
            }
            if !self.entity_config(peer.id).await?.exchange {
                debug!("PeerRegistry: exchange disabled for {}", peer.domain_name);
                continue;
            }
            partners.push(peer);
        }
        if partners.is_empty() {
            warn!("PeerRegistry: no exchange partners available");
        }
        Ok(partners)
    }

    pub fn wall_clock_offset_minutes(&self, a: &Peer, b: &Peer, at: DateTime<Utc>) -> Result<u32> {
        Ok(wall_clock_offset_minutes(a, b, at)?)
    }

    /// Minute of the hour on `local`'s clock at which `remote`'s clock shows `base_minute`
    pub fn request_minute(
        &self,
        local: &Peer,
        remote: &Peer,
        at: DateTime<Utc>,
        base_minute: u32,
    ) -> Result<u32> {
        let offset = wall_clock_offset_minutes(local, remote, at)?;
        Ok((base_minute as i64 - offset as i64).rem_euclid(60) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;
    use crate::infrastructure::persistence::repositories::SqlitePeerRepository;
    use chrono::TimeZone;

    async fn registry() -> PeerRegistry {
        let db = Database::in_memory().await.expect("Failed to open database");
        PeerRegistry::new(Arc::new(SqlitePeerRepository::new(db.pool.clone())), None)
    }

    fn new_peer(domain: &str, time_zone: &str, supplies: DataKinds) -> NewPeer {
        NewPeer {
            domain_name: domain.to_string(),
            time_zone: time_zone.to_string(),
            consumer_usage: DataKinds::empty(),
            supplier_capability: supplies,
            is_local: false,
        }
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_time_zone() {
        let registry = registry().await;
        let err = registry
            .register_peer(new_peer("https://x.example", "Mars/Olympus", DataKinds::empty()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtNetError>(),
            Some(GtNetError::InvalidTimeZone { .. })
        ));
    }

    #[tokio::test]
    async fn test_handshake_rotates_tokens() {
        let registry = registry().await;
        let peer = registry
            .register_peer(new_peer("https://a.example", "Europe/Zurich", DataKinds::LAST_PRICE))
            .await
            .unwrap();

        let first = registry.complete_handshake(peer.id, "remote-1").await.unwrap();
        let second = registry.complete_handshake(peer.id, "remote-2").await.unwrap();
        assert_ne!(first.token_this, second.token_this);

        let stored = registry.require_config(peer.id).await.unwrap();
        assert_eq!(stored.token_remote, "remote-2");
        assert_eq!(stored.token_this, second.token_this);
    }

    #[tokio::test]
    async fn test_request_minute_half_hour_zone() {
        let registry = registry().await;
        let zurich = registry
            .register_peer(new_peer("https://zrh.example", "Europe/Zurich", DataKinds::empty()))
            .await
            .unwrap();
        let kolkata = registry
            .register_peer(new_peer("https://ccu.example", "Asia/Kolkata", DataKinds::empty()))
            .await
            .unwrap();
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();

        // Zurich +01:00, Kolkata +05:30: Kolkata's clock runs 30 minutes off the hour
        assert_eq!(registry.wall_clock_offset_minutes(&zurich, &kolkata, at).unwrap(), 30);
        assert_eq!(registry.request_minute(&zurich, &kolkata, at, 10).unwrap(), 40);
        assert_eq!(registry.request_minute(&zurich, &kolkata, at, 45).unwrap(), 15);
    }
}
