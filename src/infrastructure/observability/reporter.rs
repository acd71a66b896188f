//! Push-based metrics reporter for GTNet
//!
//! Periodically outputs metrics as structured JSON to stdout.
//!
//! **Security**: This system only SENDS data, never accepts requests.

use crate::domain::repositories::PeerRepository;
use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Metrics snapshot for JSON output
#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub peers: PeerSnapshot,
    pub price_pool: PricePoolSnapshot,
    pub messages: MessageSnapshot,
}

#[derive(Serialize)]
pub struct PeerSnapshot {
    pub registered: usize,
    pub suppliers: usize,
}

#[derive(Serialize)]
pub struct PricePoolSnapshot {
    pub inserted: f64,
    pub updated: f64,
    pub discarded: f64,
}

#[derive(Serialize)]
pub struct MessageSnapshot {
    pub cache_hits: f64,
    pub cache_misses: f64,
    pub delivered: f64,
    pub failed: f64,
}

/// Push-based metrics reporter
///
/// Outputs metrics as structured JSON logs on a configurable interval.
pub struct MetricsReporter {
    peers: Arc<dyn PeerRepository>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(peers: Arc<dyn PeerRepository>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            peers,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    /// Run the reporter in a loop, outputting metrics periodically
    pub async fn run(self) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;

            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{}", json);
                        info!(
                            "Peers: {} ({} suppliers) | Prices applied: {} | Uptime: {}s",
                            snapshot.peers.registered,
                            snapshot.peers.suppliers,
                            snapshot.price_pool.inserted + snapshot.price_pool.updated,
                            snapshot.uptime_seconds
                        );
                    }
                    Err(e) => warn!("Failed to serialize metrics: {}", e),
                },
                Err(e) => warn!("Failed to collect metrics: {}", e),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let peers = self.peers.list().await?;
        let suppliers = peers
            .iter()
            .filter(|p| !p.is_local && !p.supplier_capability.is_empty())
            .count();
        let uptime = self.start_time.elapsed().as_secs();

        self.metrics.peers_registered.set(peers.len() as f64);
        self.metrics.uptime_seconds.set(uptime as f64);

        let merges = &self.metrics.price_merge_total;
        let messages = &self.metrics.messages_total;
        let cache = &self.metrics.answer_cache_total;

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            peers: PeerSnapshot {
                registered: peers.len(),
                suppliers,
            },
            price_pool: PricePoolSnapshot {
                inserted: Metrics::counter_value(merges, &["inserted"]),
                updated: Metrics::counter_value(merges, &["updated"]),
                discarded: Metrics::counter_value(merges, &["discarded"]),
            },
            messages: MessageSnapshot {
                cache_hits: Metrics::counter_value(cache, &["hit"]),
                cache_misses: Metrics::counter_value(cache, &["miss"]),
                delivered: Metrics::counter_value(messages, &["SENT", "delivered"]),
                failed: Metrics::counter_value(messages, &["SENT", "failed"]),
            },
        })
    }
}
