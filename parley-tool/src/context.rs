//! Concrete per-invocation context handed to tool handlers.

use crate::invocation::PartialResult;
use async_trait::async_trait;
use parley_core::{ParleyError, Result, ToolContext};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// The scheduler's implementation of [`ToolContext`].
///
/// One per invocation; created by the dispatcher. The partial channel feeds
/// back into the dispatch stream, and the cancellation token is a child of
/// the batch token so batch cancellation reaches every member.
pub struct InvocationContext {
    invocation_id: String,
    tool_name: String,
    partial_tx: UnboundedSender<PartialResult>,
    cancel: CancellationToken,
    next_seq: AtomicU64,
    yield_count: AtomicU64,
    finished: AtomicBool,
}

impl InvocationContext {
    /// Create a context for one invocation.
    pub fn new(
        invocation_id: impl Into<String>,
        tool_name: impl Into<String>,
        partial_tx: UnboundedSender<PartialResult>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            invocation_id: invocation_id.into(),
            tool_name: tool_name.into(),
            partial_tx,
            cancel,
            next_seq: AtomicU64::new(0),
            yield_count: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        })
    }

    /// Request cancellation of this invocation. Idempotent; a terminal
    /// invocation is unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Number of checkpoints taken so far.
    pub fn yield_count(&self) -> u64 {
        self.yield_count.load(Ordering::Relaxed)
    }

    /// Mark the handler as returned; quiets the yield-budget watchdog.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    /// True once the handler has returned.
    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ToolContext for InvocationContext {
    fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    fn tool_name(&self) -> &str {
        &self.tool_name
    }

    fn emit_partial(&self, value: Value) -> Result<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.partial_tx
            .send(PartialResult { invocation_id: self.invocation_id.clone(), seq, value })
            .map_err(|_| ParleyError::cancelled(&self.invocation_id))
    }

    async fn checkpoint(&self) -> Result<()> {
        self.yield_count.fetch_add(1, Ordering::Relaxed);
        if self.cancel.is_cancelled() {
            return Err(ParleyError::cancelled(&self.invocation_id));
        }
        tokio::task::yield_now().await;
        if self.cancel.is_cancelled() {
            return Err(ParleyError::cancelled(&self.invocation_id));
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
