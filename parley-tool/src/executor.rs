//! Executes one invocation, routing by its declared execution mode.

use crate::context::InvocationContext;
use crate::invocation::{InvocationOutcome, ToolInvocation};
use crate::pool::ExecutionPool;
use crate::registry::ToolRegistry;
use parley_core::{ExecutionMode, ParleyError, SessionConfig, Tool, ToolContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::warn;

/// Runs single invocations to a terminal outcome.
///
/// Cooperative invocations run inline on the caller's scheduling context and
/// interleave at their checkpoints; blocking invocations claim a pool slot
/// and run on an isolated worker. All error paths fold into an outcome —
/// one invocation's failure never aborts its siblings.
pub struct InvocationExecutor {
    registry: Arc<ToolRegistry>,
    pool: Arc<ExecutionPool>,
    invocation_timeout: Duration,
    yield_budget: Duration,
}

impl InvocationExecutor {
    pub fn new(registry: Arc<ToolRegistry>, pool: Arc<ExecutionPool>, config: &SessionConfig) -> Self {
        Self {
            registry,
            pool,
            invocation_timeout: config.invocation_timeout,
            yield_budget: config.yield_budget,
        }
    }

    /// Execute one pending invocation to a terminal outcome.
    pub async fn execute(
        &self,
        invocation: &ToolInvocation,
        ctx: Arc<InvocationContext>,
    ) -> InvocationOutcome {
        if ctx.is_cancelled() {
            return InvocationOutcome::Cancelled;
        }
        let Some(tool) = self.registry.resolve(&invocation.tool_name) else {
            let err = ParleyError::validation(&invocation.tool_name, "tool is not registered");
            return InvocationOutcome::Failed { error: err.record() };
        };
        match tool.execution_mode() {
            ExecutionMode::Cooperative => self.run_cooperative(tool, invocation, ctx).await,
            ExecutionMode::Blocking => self.run_blocking(tool, invocation, ctx).await,
        }
    }

    async fn run_cooperative(
        &self,
        tool: Arc<dyn Tool>,
        invocation: &ToolInvocation,
        ctx: Arc<InvocationContext>,
    ) -> InvocationOutcome {
        self.spawn_yield_watchdog(ctx.clone());

        let handler_ctx: Arc<dyn ToolContext> = ctx.clone();
        let result = tokio::time::timeout(
            self.invocation_timeout,
            tool.execute(handler_ctx, invocation.arguments.clone()),
        )
        .await;
        ctx.mark_finished();

        match result {
            Ok(Ok(value)) => InvocationOutcome::Completed { result: value },
            Ok(Err(err)) => outcome_from_error(&invocation.tool_name, err),
            Err(_) => {
                ctx.cancel();
                let err = ParleyError::timeout(
                    &invocation.id,
                    self.invocation_timeout.as_millis() as u64,
                );
                InvocationOutcome::Failed { error: err.record() }
            }
        }
    }

    async fn run_blocking(
        &self,
        tool: Arc<dyn Tool>,
        invocation: &ToolInvocation,
        ctx: Arc<InvocationContext>,
    ) -> InvocationOutcome {
        // A queued invocation shows as running but must still honor
        // cancellation before it ever claims a slot.
        let slot = tokio::select! {
            slot = self.pool.acquire() => match slot {
                Ok(slot) => slot,
                Err(err) => return InvocationOutcome::Failed { error: err.record() },
            },
            () = ctx.cancelled() => return InvocationOutcome::Cancelled,
        };

        let runtime = Handle::current();
        let handler_ctx: Arc<dyn ToolContext> = ctx.clone();
        let args = invocation.arguments.clone();
        let worker = tool.clone();
        let mut handle =
            tokio::task::spawn_blocking(move || runtime.block_on(worker.execute(handler_ctx, args)));

        // The deadline starts when execution starts: queue wait is
        // backpressure, not budget.
        let deadline = tokio::time::sleep(self.invocation_timeout);
        tokio::pin!(deadline);

        let outcome = tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(value)) => InvocationOutcome::Completed { result: value },
                Ok(Err(err)) => outcome_from_error(&invocation.tool_name, err),
                Err(join_err) => {
                    let err = ParleyError::tool(
                        &invocation.tool_name,
                        format!("worker panicked: {join_err}"),
                    );
                    InvocationOutcome::Failed { error: err.record() }
                }
            },
            () = ctx.cancelled() => {
                // Best-effort: the worker may not stop mid-native-call. It
                // is evicted from pool accounting and its eventual result
                // discarded with the dropped join handle.
                InvocationOutcome::Cancelled
            }
            () = &mut deadline => {
                ctx.cancel();
                let err = ParleyError::timeout(
                    &invocation.id,
                    self.invocation_timeout.as_millis() as u64,
                );
                InvocationOutcome::Failed { error: err.record() }
            }
        };
        drop(slot);
        outcome
    }

    fn spawn_yield_watchdog(&self, ctx: Arc<InvocationContext>) {
        // Runs outside the cooperative context, so it still fires while a
        // non-yielding handler is starving that context.
        let budget = self.yield_budget;
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            if !ctx.finished() && ctx.yield_count() == 0 {
                warn!(
                    invocation_id = %ctx.invocation_id(),
                    tool = %ctx.tool_name(),
                    budget_ms = budget.as_millis() as u64,
                    "cooperative invocation has not yielded within its budget; \
                     sibling invocations are blocked until it suspends"
                );
            }
        });
    }
}

fn outcome_from_error(tool_name: &str, err: ParleyError) -> InvocationOutcome {
    match err {
        ParleyError::Cancelled { .. } => InvocationOutcome::Cancelled,
        err @ (ParleyError::Validation { .. } | ParleyError::Timeout { .. }) => {
            InvocationOutcome::Failed { error: err.record() }
        }
        other => {
            let err = ParleyError::tool(tool_name, other.to_string());
            InvocationOutcome::Failed { error: err.record() }
        }
    }
}
