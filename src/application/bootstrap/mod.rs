//! Startup wiring: storage first, then the services on top of it.

pub mod persistence;
pub mod services;

pub use persistence::{PersistenceBootstrap, PersistenceHandle};
pub use services::{GtNetServices, ServicesBootstrap};
