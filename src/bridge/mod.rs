//! Message Bridge
//!
//! The only component that touches both the bus and the agent process.
//! It owns the per-type dispatch table and the permission enforcement point.

pub mod errors;
pub mod registry;
pub mod relay;

pub use errors::user_facing_error;
pub use registry::BridgeRegistry;
pub use relay::{AgentRole, MessageBridge};
