//! Prometheus metrics definitions for GTNet
//!
//! All metrics use the `gtnet_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

/// Prometheus metrics for the federation core
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Price pool merges by outcome (inserted, updated, discarded)
    pub price_merge_total: CounterVec,
    /// Protocol messages by direction and outcome
    pub messages_total: CounterVec,
    /// Answer cache lookups (hit, miss)
    pub answer_cache_total: CounterVec,
    /// Import positions processed by result (resolved, unmatched, failed)
    pub import_positions_total: CounterVec,
    /// Exchange sync units by result (ok, failed)
    pub sync_units_total: CounterVec,
    /// Registered peers, local entry included
    pub peers_registered: GenericGauge<AtomicF64>,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let price_merge_total = CounterVec::new(
            Opts::new("gtnet_price_merge_total", "Price pool merges by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(price_merge_total.clone()))?;

        let messages_total = CounterVec::new(
            Opts::new(
                "gtnet_messages_total",
                "Protocol messages by direction and outcome",
            ),
            &["direction", "outcome"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let answer_cache_total = CounterVec::new(
            Opts::new("gtnet_answer_cache_total", "Message answer cache lookups"),
            &["result"],
        )?;
        registry.register(Box::new(answer_cache_total.clone()))?;

        let import_positions_total = CounterVec::new(
            Opts::new(
                "gtnet_import_positions_total",
                "Import positions processed by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(import_positions_total.clone()))?;

        let sync_units_total = CounterVec::new(
            Opts::new("gtnet_sync_units_total", "Exchange sync units by result"),
            &["result"],
        )?;
        registry.register(Box::new(sync_units_total.clone()))?;

        let peers_registered = Gauge::with_opts(Opts::new(
            "gtnet_peers_registered",
            "Number of registered peers",
        ))?;
        registry.register(Box::new(peers_registered.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "gtnet_uptime_seconds",
            "Server uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            price_merge_total,
            messages_total,
            answer_cache_total,
            import_positions_total,
            sync_units_total,
            peers_registered,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_price_merge(&self, outcome: &str) {
        self.price_merge_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_messages(&self, direction: &str, outcome: &str) {
        self.messages_total
            .with_label_values(&[direction, outcome])
            .inc();
    }

    pub fn inc_answer_cache(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.answer_cache_total.with_label_values(&[result]).inc();
    }

    pub fn inc_import_positions(&self, result: &str) {
        self.import_positions_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn inc_sync_units(&self, result: &str) {
        self.sync_units_total.with_label_values(&[result]).inc();
    }

    /// Current value of one labelled counter
    pub fn counter_value(counter: &CounterVec, labels: &[&str]) -> f64 {
        counter.with_label_values(labels).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_price_merge("inserted");
        assert!(metrics.render().contains("gtnet_"));
    }

    #[test]
    fn test_price_merge_counter() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_price_merge("inserted");
        metrics.inc_price_merge("discarded");
        metrics.inc_price_merge("discarded");
        assert_eq!(
            Metrics::counter_value(&metrics.price_merge_total, &["discarded"]),
            2.0
        );
        let output = metrics.render();
        assert!(output.contains("gtnet_price_merge_total"));
        assert!(output.contains("discarded"));
    }

    #[test]
    fn test_answer_cache_counter() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_answer_cache(true);
        metrics.inc_answer_cache(false);
        metrics.inc_answer_cache(true);
        assert_eq!(
            Metrics::counter_value(&metrics.answer_cache_total, &["hit"]),
            2.0
        );
    }
}
