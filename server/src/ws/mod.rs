pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod hub;
pub mod protocol;

pub use broadcast::DeliveryGateway;
pub use hub::{HubError, HubHandle, Registration};

/// Process-unique id the hub assigns to each registered connection.
pub type ConnectionId = u64;
