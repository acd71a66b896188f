use super::{ts_from_db, ts_to_db};
use crate::domain::peer::{
    DataKind, DataKinds, EntityCapability, EntityConfig, NewPeer, Peer, PeerConfig,
};
use crate::domain::repositories::PeerRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

const PEER_COLUMNS: &str = "p.id, p.domain_name, p.time_zone, p.consumer_usage, \
     p.supplier_capability, p.is_local, p.created_at";

pub struct SqlitePeerRepository {
    pool: SqlitePool,
}

impl SqlitePeerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_peer(row: &SqliteRow) -> Result<Peer> {
        Ok(Peer {
            id: row.try_get("id")?,
            domain_name: row.try_get("domain_name")?,
            time_zone: row.try_get("time_zone")?,
            consumer_usage: DataKinds::from_db(row.try_get("consumer_usage")?),
            supplier_capability: DataKinds::from_db(row.try_get("supplier_capability")?),
            is_local: row.try_get("is_local")?,
            created_at: ts_from_db(row.try_get("created_at")?)?,
        })
    }
}

#[async_trait]
impl PeerRepository for SqlitePeerRepository {
    async fn insert(&self, peer: &NewPeer) -> Result<Peer> {
        let created_at = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO gt_net
            (domain_name, time_zone, consumer_usage, supplier_capability, is_local, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&peer.domain_name)
        .bind(&peer.time_zone)
        .bind(peer.consumer_usage.to_db())
        .bind(peer.supplier_capability.to_db())
        .bind(peer.is_local)
        .bind(ts_to_db(created_at))
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to register peer {}", peer.domain_name))?;

        let id: i64 = row.try_get("id")?;
        info!("Registered peer {} ({})", id, peer.domain_name);

        Ok(Peer {
            id,
            domain_name: peer.domain_name.clone(),
            time_zone: peer.time_zone.clone(),
            consumer_usage: peer.consumer_usage,
            supplier_capability: peer.supplier_capability,
            is_local: peer.is_local,
            created_at: ts_from_db(ts_to_db(created_at))?,
        })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Peer>> {
        let row = sqlx::query(&format!("SELECT {} FROM gt_net p WHERE p.id = ?", PEER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_peer).transpose()
    }

    async fn list(&self) -> Result<Vec<Peer>> {
        let rows = sqlx::query(&format!("SELECT {} FROM gt_net p ORDER BY p.id", PEER_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_peer).collect()
    }

    async fn find_suppliers(&self, kinds: DataKinds) -> Result<Vec<Peer>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM gt_net p
            LEFT JOIN gt_net_config_entity ce ON ce.peer_id = p.id
            WHERE p.is_local = 0 AND (p.supplier_capability & ?) != 0
            ORDER BY COALESCE(ce.consumer_usage_priority, 100) ASC, p.id ASC
            "#,
            PEER_COLUMNS
        ))
        .bind(kinds.to_db())
        .fetch_all(&self.pool)
        .await
        .context("Failed to search supplier peers")?;
        rows.iter().map(Self::map_peer).collect()
    }

    async fn save_config(&self, config: &PeerConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gt_net_config (peer_id, token_this, token_remote, handshake_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(peer_id) DO UPDATE SET
                token_this = excluded.token_this,
                token_remote = excluded.token_remote,
                handshake_at = excluded.handshake_at
            "#,
        )
        .bind(config.peer_id)
        .bind(&config.token_this)
        .bind(&config.token_remote)
        .bind(ts_to_db(config.handshake_at))
        .execute(&self.pool)
        .await
        .context("Failed to save peer config")?;
        Ok(())
    }

    async fn find_config(&self, peer_id: i64) -> Result<Option<PeerConfig>> {
        let row = sqlx::query_as::<_, (i64, String, String, i64)>(
            "SELECT peer_id, token_this, token_remote, handshake_at FROM gt_net_config WHERE peer_id = ?",
        )
        .bind(peer_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load peer config")?;

        row.map(|(peer_id, token_this, token_remote, handshake_at)| {
            Ok(PeerConfig {
                peer_id,
                token_this,
                token_remote,
                handshake_at: ts_from_db(handshake_at)?,
            })
        })
        .transpose()
    }

    async fn save_entity_capability(&self, capability: &EntityCapability) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gt_net_entity (peer_id, entity_kind, accept_request)
            VALUES (?, ?, ?)
            ON CONFLICT(peer_id, entity_kind) DO UPDATE SET
                accept_request = excluded.accept_request
            "#,
        )
        .bind(capability.peer_id)
        .bind(capability.kind.as_str())
        .bind(capability.accept_request)
        .execute(&self.pool)
        .await
        .context("Failed to save entity capability")?;
        Ok(())
    }

    async fn entity_capabilities(&self, peer_id: i64) -> Result<Vec<EntityCapability>> {
        let rows = sqlx::query_as::<_, (i64, String, bool)>(
            "SELECT peer_id, entity_kind, accept_request FROM gt_net_entity WHERE peer_id = ? ORDER BY entity_kind",
        )
        .bind(peer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(peer_id, kind, accept_request)| {
                Ok(EntityCapability {
                    peer_id,
                    kind: DataKind::from_str(&kind)?,
                    accept_request,
                })
            })
            .collect()
    }

    async fn save_entity_config(&self, config: &EntityConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gt_net_config_entity (peer_id, exchange, use_detail_log, consumer_usage_priority)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(peer_id) DO UPDATE SET
                exchange = excluded.exchange,
                use_detail_log = excluded.use_detail_log,
                consumer_usage_priority = excluded.consumer_usage_priority
            "#,
        )
        .bind(config.peer_id)
        .bind(config.exchange)
        .bind(config.use_detail_log)
        .bind(config.consumer_usage_priority)
        .execute(&self.pool)
        .await
        .context("Failed to save entity config")?;
        Ok(())
    }

    async fn find_entity_config(&self, peer_id: i64) -> Result<Option<EntityConfig>> {
        let row = sqlx::query_as::<_, (i64, bool, bool, i32)>(
            "SELECT peer_id, exchange, use_detail_log, consumer_usage_priority FROM gt_net_config_entity WHERE peer_id = ?",
        )
        .bind(peer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(peer_id, exchange, use_detail_log, consumer_usage_priority)| EntityConfig {
                peer_id,
                exchange,
                use_detail_log,
                consumer_usage_priority,
            },
        ))
    }
}
