//! Core traits and types for the Parley live-session runtime.
//!
//! This crate defines the seams the rest of the workspace is built around:
//! the [`Tool`] and [`LiveModel`] traits, the [`Content`]/[`Part`] data
//! model, inbound/outbound session events, the error taxonomy, and
//! [`SessionConfig`].

mod config;
mod error;
mod event;
mod model;
mod tool;
mod types;

pub use config::SessionConfig;
pub use error::{ErrorKind, ErrorRecord, ParleyError, Result};
pub use event::{
    CloseReason, InboundItem, SessionEvent, SessionEventKind, ToolOutcomePayload,
};
pub use model::{LiveModel, ModelChunk, ModelStream};
pub use tool::{ExecutionMode, Tool, ToolContext, ToolDescriptor};
pub use types::{Content, MAX_FRAME_SIZE, Part};
