//! Upstream LLM gateway integration.
//!
//! The provider runs as a subprocess in RPC mode; [`client::GatewayClient`]
//! owns the transport and exposes session primitives plus the raw event
//! stream the relay consumes.

mod client;
mod types;

pub use client::{GatewayClient, GatewayClientConfig};
pub use types::{
    AuthStatusData, ContextPolicy, DeltaKind, GatewayCapabilities, GatewayCommand, GatewayEvent,
    GatewayMessage, GatewayModel, GatewayResponse,
};
