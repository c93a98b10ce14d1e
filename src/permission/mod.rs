//! Tool permission enforcement
//!
//! - [`gate`]: policy type and the evaluation engine
//! - [`pattern`]: `*`-only glob matcher used for command patterns
//! - [`scope`]: path canonicalization for the filesystem scope check

pub mod gate;
pub mod pattern;
pub mod scope;

pub use gate::{Decision, PermissionGate, PermissionPolicy};
pub use pattern::match_pattern;
