//! Concurrent dispatch of one turn's tool invocations.

use crate::context::InvocationContext;
use crate::executor::InvocationExecutor;
use crate::invocation::{DispatchUpdate, InvocationState, TurnBatch};
use async_stream::stream;
use futures::Stream;
use futures::stream::{FuturesUnordered, StreamExt};
use parley_core::{ParleyError, Result};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lazy, finite, non-restartable stream of dispatch updates for one batch.
pub type DispatchStream = Pin<Box<dyn Stream<Item = Result<DispatchUpdate>> + Send>>;

/// Executes a turn batch with maximal safe concurrency.
///
/// All cooperative invocations are polled inside the dispatch stream's own
/// task — one shared cooperative context, interleaving at checkpoints.
/// Blocking invocations go through the execution pool and run truly in
/// parallel up to its capacity. Each invocation's outcome is yielded exactly
/// once, as soon as it is terminal, in completion order; the stream ends
/// only when every member is terminal.
pub struct ConcurrentDispatcher {
    executor: Arc<InvocationExecutor>,
}

impl ConcurrentDispatcher {
    pub fn new(executor: Arc<InvocationExecutor>) -> Self {
        Self { executor }
    }

    /// Dispatch a batch. Cancelling `cancel` asks every non-terminal member
    /// to stop: cooperative members at their next checkpoint, blocking
    /// members by advisory signal and slot eviction. Cancellation of
    /// already-terminal members is a no-op.
    ///
    /// Scheduler faults (invariant violations) surface as `Err` items; all
    /// per-invocation failures are folded into outcomes.
    pub fn dispatch(&self, batch: TurnBatch, cancel: CancellationToken) -> DispatchStream {
        let executor = self.executor.clone();
        Box::pin(stream! {
            let mut batch = batch;
            let batch_id = batch.batch_id.clone();
            let total = batch.invocations.len();
            let started = Instant::now();

            let (partial_tx, mut partial_rx) = mpsc::unbounded_channel();
            let mut tasks = FuturesUnordered::new();
            for invocation in &batch.invocations {
                let ctx = InvocationContext::new(
                    &invocation.id,
                    &invocation.tool_name,
                    partial_tx.clone(),
                    cancel.child_token(),
                );
                let executor = executor.clone();
                let invocation = invocation.clone();
                tasks.push(async move {
                    let outcome = executor.execute(&invocation, ctx).await;
                    (invocation.id, outcome)
                });
            }
            drop(partial_tx);

            for invocation in batch.invocations.iter_mut() {
                if let Err(fault) = invocation.transition(InvocationState::Running) {
                    yield Err(fault);
                    return;
                }
            }
            debug!(batch_id = %batch_id, invocations = total, "dispatching turn batch");

            let mut completed = 0usize;
            while completed < total {
                // Partials win ties so a handler's chunks always precede
                // its terminal outcome on the stream.
                let next = tokio::select! {
                    biased;
                    Some(partial) = partial_rx.recv() => Progress::Partial(partial),
                    Some(done) = tasks.next() => Progress::Terminal(done),
                };
                match next {
                    Progress::Partial(partial) => {
                        match note_streaming(&mut batch, &partial.invocation_id) {
                            Ok(true) => yield Ok(DispatchUpdate::Partial(partial)),
                            Ok(false) => {} // late chunk from an evicted worker
                            Err(fault) => {
                                yield Err(fault);
                                return;
                            }
                        }
                    }
                    Progress::Terminal((invocation_id, outcome)) => {
                        // Partials the handler emitted in its final poll are
                        // already queued; deliver them before the outcome.
                        while let Ok(partial) = partial_rx.try_recv() {
                            match note_streaming(&mut batch, &partial.invocation_id) {
                                Ok(true) => yield Ok(DispatchUpdate::Partial(partial)),
                                Ok(false) => {}
                                Err(fault) => {
                                    yield Err(fault);
                                    return;
                                }
                            }
                        }
                        let Some(invocation) = batch.invocation_mut(&invocation_id) else {
                            yield Err(ParleyError::fault(format!(
                                "outcome for unknown invocation '{invocation_id}'"
                            )));
                            return;
                        };
                        if let Err(fault) = invocation.transition(outcome.state()) {
                            yield Err(fault);
                            return;
                        }
                        completed += 1;
                        yield Ok(DispatchUpdate::Outcome { invocation_id, outcome });
                    }
                }
            }

            // Pool saturation and stragglers surface here as duration, not
            // as an error.
            debug!(
                batch_id = %batch_id,
                invocations = total,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "turn batch complete"
            );
        })
    }
}

enum Progress {
    Partial(crate::invocation::PartialResult),
    Terminal((String, crate::invocation::InvocationOutcome)),
}

/// Track the streaming transition for a partial. Returns whether the chunk
/// should be forwarded: chunks arriving after their invocation is terminal
/// (an evicted blocking worker still running) are discarded.
fn note_streaming(batch: &mut TurnBatch, invocation_id: &str) -> Result<bool> {
    let Some(invocation) = batch.invocation_mut(invocation_id) else {
        return Ok(false);
    };
    if invocation.state().is_terminal() {
        return Ok(false);
    }
    if invocation.state() == InvocationState::Running {
        invocation.transition(InvocationState::StreamingPartial)?;
    }
    Ok(true)
}
