use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the Parley workspace.
pub type Result<T> = std::result::Result<T, ParleyError>;

/// Errors produced by the session runtime and tool scheduler.
///
/// Per-invocation errors (`Validation`, `ToolExecution`, `Timeout`,
/// `Cancelled`) are recovered at the dispatcher boundary and folded into
/// structured tool outcomes; only `SchedulerFault` is fatal to a session.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Arguments did not match the tool's contract, or the tool is unknown.
    #[error("Invalid invocation of tool '{tool}': {message}")]
    Validation {
        /// Tool name as requested by the model.
        tool: String,
        /// What was wrong with the request.
        message: String,
    },

    /// The tool handler returned or threw a failure.
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution {
        /// Tool name.
        tool: String,
        /// Handler-reported failure.
        message: String,
    },

    /// An invocation exceeded its deadline.
    #[error("Invocation '{invocation_id}' exceeded its {deadline_ms}ms deadline")]
    Timeout {
        /// Id of the invocation that timed out.
        invocation_id: String,
        /// The configured deadline in milliseconds.
        deadline_ms: u64,
    },

    /// An invocation was aborted by interruption or batch cancellation.
    /// A distinct terminal state, not conflated with failure.
    #[error("Invocation '{invocation_id}' was cancelled")]
    Cancelled {
        /// Id of the cancelled invocation.
        invocation_id: String,
    },

    /// Internal invariant violation (e.g. a double terminal transition).
    /// Fatal to the session that observes it.
    #[error("Scheduler fault: {0}")]
    SchedulerFault(String),

    /// The model stream failed or produced malformed chunks.
    #[error("Model error: {0}")]
    Model(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session is closed and no longer accepts input.
    #[error("Session closed")]
    SessionClosed,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ParleyError {
    /// Create a new validation error.
    pub fn validation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { tool: tool.into(), message: message.into() }
    }

    /// Create a new tool execution error.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution { tool: tool.into(), message: message.into() }
    }

    /// Create a new timeout error.
    pub fn timeout(invocation_id: impl Into<String>, deadline_ms: u64) -> Self {
        Self::Timeout { invocation_id: invocation_id.into(), deadline_ms }
    }

    /// Create a new cancellation error.
    pub fn cancelled(invocation_id: impl Into<String>) -> Self {
        Self::Cancelled { invocation_id: invocation_id.into() }
    }

    /// Create a new scheduler fault.
    pub fn fault(msg: impl Into<String>) -> Self {
        Self::SchedulerFault(msg.into())
    }

    /// Create a new model error.
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The serialized error kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ToolExecution { .. } => ErrorKind::ToolExecution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancellation,
            Self::SchedulerFault(_) => ErrorKind::SchedulerFault,
            Self::Model(_) => ErrorKind::Model,
            Self::Config(_) => ErrorKind::Config,
            Self::SessionClosed => ErrorKind::Session,
            Self::Serde(_) => ErrorKind::Serialization,
        }
    }

    /// Convert into the wire-visible structured error record.
    pub fn record(&self) -> ErrorRecord {
        ErrorRecord { kind: self.kind(), message: self.to_string(), cause: None }
    }
}

/// Coarse error classification surfaced on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ToolExecution,
    Timeout,
    Cancellation,
    SchedulerFault,
    Model,
    Config,
    Session,
    Serialization,
}

/// Structured error payload attached to tool outcomes and close events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Optional underlying cause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorRecord {
    /// Create a new error record.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), cause: None }
    }

    /// Attach an underlying cause.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}
