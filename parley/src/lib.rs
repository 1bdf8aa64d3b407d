//! # Parley
//!
//! A live-session runtime for streaming agents. One [`LiveSession`] per
//! conversation carries interleaved text/audio/video turns between a user
//! and a model, supports mid-turn interruption, and executes
//! model-requested tool calls through a scheduler that maximizes safe
//! concurrency while tolerating tools that block.
//!
//! ## Quick start
//!
//! ```no_run
//! use parley::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(model: Arc<dyn LiveModel>) -> parley::Result<()> {
//! let session = LiveSession::builder()
//!     .model(model)
//!     .tool(Arc::new(FunctionTool::new(
//!         "get_weather",
//!         "Get weather for a city",
//!         |_ctx, _args| async move { Ok(serde_json::json!({ "condition": "sunny" })) },
//!     )))
//!     .build()?;
//!
//! session.submit(InboundItem::Content {
//!     content: Content::new("user").with_text("Weather in Oslo?"),
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - [`parley_core`]: the `Tool`/`LiveModel` seams, data model, events,
//!   errors, configuration.
//! - [`parley_tool`]: tool registry and the concurrent invocation scheduler.
//! - [`parley_live`]: the session event loop, interruption, resumption.

pub use parley_core::{
    CloseReason, Content, ErrorKind, ErrorRecord, ExecutionMode, InboundItem, LiveModel,
    ModelChunk, ModelStream, ParleyError, Part, Result, SessionConfig, SessionEvent,
    SessionEventKind, Tool, ToolContext, ToolDescriptor, ToolOutcomePayload,
};
pub use parley_live::{
    EventStream, InterruptionController, LiveSession, LiveSessionBuilder, ResumptionToken,
    SessionState,
};
pub use parley_tool::{
    ConcurrentDispatcher, DispatchStream, DispatchUpdate, ExecutionPool, FunctionTool,
    InvocationExecutor, InvocationOutcome, InvocationState, PartialResult, ToolInvocation,
    ToolRegistry, TurnBatch,
};

/// Commonly used items, glob-importable.
pub mod prelude {
    pub use parley_core::{
        Content, ExecutionMode, InboundItem, LiveModel, ModelChunk, ParleyError, Part, Result,
        SessionConfig, SessionEvent, SessionEventKind, Tool, ToolContext, ToolOutcomePayload,
    };
    pub use parley_live::{LiveSession, ResumptionToken, SessionState};
    pub use parley_tool::{ExecutionPool, FunctionTool, ToolRegistry};
}
