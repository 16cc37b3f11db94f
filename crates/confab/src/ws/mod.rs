//! Viewer-facing WebSocket layer: wire protocol, broadcast hub, handler.

pub mod handler;
mod hub;
mod types;

pub use hub::{BroadcastHub, ViewerSender};
pub use types::{ViewerEvent, ViewerMessage};
