//! TeamClaw - per-agent sidecar for AI coding teams
//!
//! TeamClaw sits next to one AI-CLI agent in a team. It receives work from
//! the team message bus, drives the local CLI, enforces the agent's tool
//! policy before any tool runs, and publishes results and status back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── team message bus ─────────────────────────────┐
//! │ team.<t>.leader   team.<t>.<agent>   team.<t>.broadcast                   │
//! │ team.<t>.status   team.<t>.activity                                       │
//! └──────────────┬───────────────────────────────────────────▲────────────────┘
//!                │ ProtocolMessage                           │ results, status,
//!                ▼                                           │ activity
//! ┌──────────────────────────────────────────────────────────┴────────────────┐
//! │                            Message Bridge                                 │
//! │  dispatch by type ──► send_input        forwarding task ◄── event queue   │
//! │                                          │ tool_use                       │
//! │                                          ▼                                │
//! │                                   Permission Gate ── deny ──► tool_result │
//! └───────────────┬───────────────────────────────────────────▲───────────────┘
//!                 │                                           │ StreamEvent
//!                 ▼                                           │
//! ┌───────────────────────────────────────────────────────────┴───────────────┐
//! │                         Agent Process Manager                             │
//! │  bootstrap ─► session id ─► one CLI invocation per input (--resume)       │
//! │  or one persistent CLI process; NDJSON parsing; context monitor           │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`permission`]: tool allow-list, command globs, filesystem scope
//! - [`protocol`]: bus envelope, payload schemas, subject scheme
//! - [`process`]: AI-CLI lifecycle, stream parsing, context tracking
//! - [`bus`]: message bus trait with in-memory and NDJSON implementations
//! - [`bridge`]: bus/process coupling and the bridge registry
//! - [`validation`]: startup self-check
//! - [`config`]: configuration management

pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod permission;
pub mod process;
pub mod protocol;
pub mod validation;

pub use config::SidecarConfig;
pub use error::{Error, Result};
