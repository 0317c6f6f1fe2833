//! Domain layer: connection identity, connection handles, the connection
//! registry and the lifecycle event system.

pub mod connection;
pub mod connection_id;
pub mod connection_registry;
pub mod event_bus;
pub mod server_event;

pub use connection::{CloseInfo, Connection, ConnectionState};
pub use connection_id::ConnectionId;
pub use connection_registry::{ConnectionRegistry, UpgradeGuard};
pub use event_bus::EventBus;
pub use server_event::ServerEvent;
