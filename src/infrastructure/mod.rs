pub mod observability;
pub mod persistence;
pub mod transport;

pub use transport::LoggingTransport;
