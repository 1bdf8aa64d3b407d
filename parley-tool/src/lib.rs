//! Tool registry and concurrent invocation scheduler for Parley.
//!
//! One model turn's tool calls form a [`TurnBatch`]; the
//! [`ConcurrentDispatcher`] runs the batch with maximal safe concurrency and
//! streams back partial results and terminal outcomes. Cooperative
//! invocations share one scheduling context and interleave at their
//! [`checkpoint`](parley_core::ToolContext::checkpoint) suspension points;
//! blocking invocations run on the bounded [`ExecutionPool`].

mod context;
mod dispatcher;
mod executor;
mod function_tool;
mod invocation;
mod pool;
mod registry;

pub use context::InvocationContext;
pub use dispatcher::{ConcurrentDispatcher, DispatchStream};
pub use executor::InvocationExecutor;
pub use function_tool::FunctionTool;
pub use invocation::{
    DispatchUpdate, InvocationOutcome, InvocationState, PartialResult, ToolInvocation, TurnBatch,
};
pub use pool::{ExecutionPool, WorkerSlot};
pub use registry::ToolRegistry;
