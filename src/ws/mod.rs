//! WebSocket layer: handshake acceptance, the per-connection state machine
//! and frame mapping.

pub mod connection;
pub mod handler;
pub mod message;
