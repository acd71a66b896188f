pub mod bootstrap;

// Peer registry and handshake
pub mod peer_registry;

// Request/response layer and outbound delivery
pub mod message_dispatcher;
pub mod message_service;

// Shared pools
pub mod instrument_pool;
pub mod price_pool;

// Background synchronization and reconciliation
pub mod exchange_sync;
pub mod import_reconciliation;
pub mod supplier_history;
