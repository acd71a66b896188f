// Acting tenant/user
pub mod context;

// Domain-specific error types
pub mod errors;

// Exchange configuration and sync modes
pub mod exchange;

// Import reconciliation
pub mod import;

// Instrument pool identity
pub mod instrument;

// Platform-owned rows read for locality
pub mod local;

// Protocol messages
pub mod message;

// Peer registry
pub mod peer;

// Port interfaces
pub mod ports;

// Price pool
pub mod price;

// Repository traits
pub mod repositories;

// Supplier history
pub mod supplier;
