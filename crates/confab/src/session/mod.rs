//! Session registry and lifecycle management.

mod models;
mod registry;
mod service;

pub use models::{ChatSession, SessionServiceConfig, SessionStats};
pub use registry::SessionRegistry;
pub use service::{ResumeOptions, SessionService};
