//! Invocation and batch data model.

use chrono::{DateTime, Utc};
use parley_core::{ErrorRecord, ExecutionMode, ParleyError, Result, ToolOutcomePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle states of a tool invocation. `Completed`, `Failed`, and
/// `Cancelled` are terminal and final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Pending,
    Running,
    StreamingPartial,
    Completed,
    Failed,
    Cancelled,
}

impl InvocationState {
    /// True for states no invocation ever leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A single request to execute a named tool with arguments.
///
/// Owned by the dispatcher that created it until terminal; the caller takes
/// ownership of the outcome afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Opaque unique id, carried by every event about this invocation.
    pub id: String,
    /// Name of the tool to invoke.
    pub tool_name: String,
    /// Arguments, pre-validated against the tool's declared schema.
    pub arguments: Value,
    /// Declared scheduling mode of the tool.
    pub mode: ExecutionMode,
    /// Shared batch submission timestamp, stamped by [`TurnBatch::new`].
    pub submitted_at: DateTime<Utc>,
    state: InvocationState,
}

impl ToolInvocation {
    /// Create a pending invocation. Pass an empty `id` to have one minted.
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        mode: ExecutionMode,
    ) -> Self {
        let id = id.into();
        let id = if id.is_empty() { Uuid::new_v4().to_string() } else { id };
        Self {
            id,
            tool_name: tool_name.into(),
            arguments,
            mode,
            submitted_at: Utc::now(),
            state: InvocationState::Pending,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Advance the lifecycle state, enforcing legality.
    ///
    /// Any transition out of a terminal state is an internal invariant
    /// violation and returns a `SchedulerFault`.
    pub fn transition(&mut self, next: InvocationState) -> Result<()> {
        use InvocationState::*;
        let legal = match (self.state, next) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, StreamingPartial) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            (StreamingPartial, Completed)
            | (StreamingPartial, Failed)
            | (StreamingPartial, Cancelled) => true,
            _ => false,
        };
        if !legal {
            return Err(ParleyError::fault(format!(
                "illegal state transition {:?} -> {:?} for invocation '{}'",
                self.state, next, self.id
            )));
        }
        self.state = next;
        Ok(())
    }
}

/// The set of tool invocations produced by one model turn.
///
/// All members share the batch id and submission timestamp; the batch is
/// terminal only when every member is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnBatch {
    /// Shared batch identifier.
    pub batch_id: String,
    /// Shared submission timestamp.
    pub submitted_at: DateTime<Utc>,
    /// The member invocations.
    pub invocations: Vec<ToolInvocation>,
}

impl TurnBatch {
    /// Build a batch from a non-empty set of pending invocations, stamping
    /// the shared batch id and submission timestamp onto every member.
    pub fn new(mut invocations: Vec<ToolInvocation>) -> Result<Self> {
        if invocations.is_empty() {
            return Err(ParleyError::config("a turn batch must contain at least one invocation"));
        }
        let submitted_at = Utc::now();
        for invocation in &mut invocations {
            invocation.submitted_at = submitted_at;
        }
        Ok(Self { batch_id: Uuid::new_v4().to_string(), submitted_at, invocations })
    }

    /// Number of member invocations.
    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    /// True when the batch has no members (never, for batches built via `new`).
    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    /// True once every member has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.invocations.iter().all(|i| i.state().is_terminal())
    }

    /// Mutable lookup of a member by invocation id.
    pub fn invocation_mut(&mut self, id: &str) -> Option<&mut ToolInvocation> {
        self.invocations.iter_mut().find(|i| i.id == id)
    }
}

/// Terminal outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// The handler returned a value.
    Completed {
        /// The final result.
        result: Value,
    },
    /// The handler failed, timed out, or the tool was unknown.
    Failed {
        /// Structured failure description.
        error: ErrorRecord,
    },
    /// The invocation was cancelled before producing a result.
    Cancelled,
}

impl InvocationOutcome {
    /// The terminal lifecycle state this outcome corresponds to.
    pub fn state(&self) -> InvocationState {
        match self {
            Self::Completed { .. } => InvocationState::Completed,
            Self::Failed { .. } => InvocationState::Failed,
            Self::Cancelled => InvocationState::Cancelled,
        }
    }

    /// The outbound event payload for this outcome.
    pub fn to_payload(&self) -> ToolOutcomePayload {
        match self {
            Self::Completed { result } => ToolOutcomePayload::Completed { result: result.clone() },
            Self::Failed { error } => ToolOutcomePayload::Failed { error: error.clone() },
            Self::Cancelled => ToolOutcomePayload::Cancelled,
        }
    }

    /// The value to fold back into model context as a function response.
    pub fn response_value(&self, tool_name: &str) -> Value {
        match self {
            Self::Completed { result } => result.clone(),
            Self::Failed { error } => serde_json::json!({
                "error": { "kind": error.kind, "message": error.message }
            }),
            Self::Cancelled => serde_json::json!({
                "error": { "kind": "cancellation", "message": format!("call to '{tool_name}' was cancelled") }
            }),
        }
    }
}

/// An intermediate result chunk emitted by a running invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    /// Invocation this chunk belongs to.
    pub invocation_id: String,
    /// Strictly increasing per-invocation sequence number, starting at 1.
    pub seq: u64,
    /// The chunk value.
    pub value: Value,
}

/// Item of the dispatch stream: streamed partials plus exactly one terminal
/// outcome per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchUpdate {
    /// An intermediate chunk from a running invocation.
    Partial(PartialResult),
    /// An invocation reached a terminal state.
    Outcome {
        /// The invocation that finished.
        invocation_id: String,
        /// Its terminal outcome.
        outcome: InvocationOutcome,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> ToolInvocation {
        ToolInvocation::new("inv-1", "echo", Value::Null, ExecutionMode::Cooperative)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut inv = pending();
        inv.transition(InvocationState::Running).unwrap();
        inv.transition(InvocationState::StreamingPartial).unwrap();
        inv.transition(InvocationState::Completed).unwrap();
        assert!(inv.state().is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut inv = pending();
        inv.transition(InvocationState::Running).unwrap();
        inv.transition(InvocationState::Cancelled).unwrap();
        let err = inv.transition(InvocationState::Completed).unwrap_err();
        assert!(matches!(err, ParleyError::SchedulerFault(_)));
        assert_eq!(inv.state(), InvocationState::Cancelled);
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut inv = pending();
        assert!(inv.transition(InvocationState::Completed).is_err());
    }

    #[test]
    fn test_empty_id_is_minted() {
        let inv = ToolInvocation::new("", "echo", Value::Null, ExecutionMode::Cooperative);
        assert!(!inv.id.is_empty());
    }

    #[test]
    fn test_batch_stamps_shared_timestamp() {
        let batch = TurnBatch::new(vec![pending(), pending()]).unwrap();
        assert_eq!(batch.len(), 2);
        for inv in &batch.invocations {
            assert_eq!(inv.submitted_at, batch.submitted_at);
        }
        assert!(!batch.is_terminal());
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(TurnBatch::new(vec![]).is_err());
    }

    #[test]
    fn test_outcome_state_mapping() {
        assert_eq!(
            InvocationOutcome::Completed { result: Value::Null }.state(),
            InvocationState::Completed
        );
        assert_eq!(InvocationOutcome::Cancelled.state(), InvocationState::Cancelled);
    }
}
