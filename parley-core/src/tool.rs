use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// How an invocation of a tool is scheduled.
///
/// The scheduler cannot infer blocking behavior from handler code; a tool
/// that performs unyielding work must declare `Blocking` to be routed to the
/// execution pool. A `Cooperative` tool promises to suspend at
/// `ToolContext::checkpoint` calls (or other await points) so sibling
/// invocations can make progress on the shared scheduling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs on the session's cooperative scheduling context, interleaved
    /// with sibling invocations at its suspension points.
    #[default]
    Cooperative,
    /// Occupies one isolated worker slot from the execution pool to
    /// completion; runs truly in parallel up to pool capacity.
    Blocking,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Declared scheduling mode. Defaults to cooperative; authors of tools
    /// that block without yielding must override this.
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Cooperative
    }

    /// JSON Schema for the tool's arguments, if declared.
    /// Argument validation against it happens upstream of the scheduler.
    fn parameters_schema(&self) -> Option<Value> {
        None
    }

    /// Execute one invocation. `ctx` carries the invocation id, the partial
    /// result channel, and the cooperative checkpoint primitive.
    async fn execute(&self, ctx: Arc<dyn ToolContext>, args: Value) -> Result<Value>;
}

/// Per-invocation handle passed to tool handlers.
///
/// The concrete implementation lives with the scheduler; handlers only see
/// this seam.
#[async_trait]
pub trait ToolContext: Send + Sync {
    /// Unique id of this invocation.
    fn invocation_id(&self) -> &str;

    /// Name of the tool being invoked.
    fn tool_name(&self) -> &str;

    /// Emit an intermediate result chunk. Sequence numbers are assigned per
    /// invocation, strictly increasing. Safe to call from blocking workers.
    fn emit_partial(&self, value: Value) -> Result<()>;

    /// Explicit cooperative suspension point: yields so sibling invocations
    /// can run, and returns `Err(Cancelled)` once cancellation has been
    /// requested. Cooperative cancellation lands exactly here, never
    /// mid-step.
    async fn checkpoint(&self) -> Result<()>;

    /// Advisory cancellation flag for blocking handlers, which have no
    /// checkpoints to be cancelled at.
    fn is_cancelled(&self) -> bool;
}

/// Resolved registry view of a tool, handed to models and transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Declared scheduling mode.
    pub mode: ExecutionMode,
}

impl ToolDescriptor {
    /// Build the descriptor for a registered tool.
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
            mode: tool.execution_mode(),
        }
    }
}
