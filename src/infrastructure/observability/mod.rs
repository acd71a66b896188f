//! Push-based observability for GTNet
//!
//! Metrics leave the process as periodic structured JSON on stdout. There is no
//! HTTP endpoint; this system only SENDS data, it never accepts requests.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
