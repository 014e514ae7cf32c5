//! Per-principal tenant store connections.
//!
//! [`TenantConnectionManager`] turns an authenticated principal id into a
//! live [`StoreHandle`] on that principal's private database. Transports
//! report connection failures as [`ConnectionEvent`]s, which evict the
//! cached handle so the next request reconnects from scratch.

pub mod error;
pub mod manager;
pub mod transport;

pub use error::TenantError;
pub use manager::TenantConnectionManager;
pub use transport::{
    redact_address, ConnectionEvent, EventSink, StoreHandle, StoreTransport, TenantConnection, TransportError,
};
