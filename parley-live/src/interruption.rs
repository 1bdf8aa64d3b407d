//! Drives cancellation of an in-flight turn on user barge-in.

use futures::StreamExt;
use parley_core::Result;
use parley_tool::{DispatchStream, DispatchUpdate};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Owns the cancellation root for one turn.
///
/// Every dispatched batch gets a child token; firing [`interrupt`] asks all
/// non-terminal invocations to stop. Interruption is best-effort and never
/// destructive: outcomes collected before it fired stay valid.
///
/// [`interrupt`]: InterruptionController::interrupt
pub struct InterruptionController {
    token: CancellationToken,
    ack_timeout: Duration,
}

impl InterruptionController {
    pub fn new(ack_timeout: Duration) -> Self {
        Self { token: CancellationToken::new(), ack_timeout }
    }

    /// Token to hand to a dispatched batch.
    pub fn batch_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Signal cancellation to everything holding a batch token. Idempotent.
    pub fn interrupt(&self) {
        if !self.token.is_cancelled() {
            debug!("interruption requested; cancelling in-flight turn");
            self.token.cancel();
        }
    }

    /// True once an interruption has been requested.
    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// After [`interrupt`], drain the dispatch stream until every member
    /// acknowledges (reaches a terminal state) or the ack timeout elapses.
    /// Updates that arrive during the drain are handed to `on_update` so
    /// completed-but-late outcomes are preserved rather than dropped.
    ///
    /// [`interrupt`]: InterruptionController::interrupt
    pub async fn await_quiescence<F>(
        &self,
        updates: &mut DispatchStream,
        mut on_update: F,
    ) -> Result<()>
    where
        F: FnMut(DispatchUpdate),
    {
        let drain = async {
            while let Some(update) = updates.next().await {
                on_update(update?);
            }
            Ok(())
        };
        match tokio::time::timeout(self.ack_timeout, drain).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    ack_timeout_ms = self.ack_timeout.as_millis() as u64,
                    "interruption acknowledgments timed out; abandoning stragglers"
                );
                Ok(())
            }
        }
    }
}
