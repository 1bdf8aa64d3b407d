//! Inbound and outbound session event types.
//!
//! Outbound events carry a monotonic sequence number scoped to the session;
//! resumption reconnects the stream after a given sequence number without
//! replaying delivered events.

use crate::error::ErrorRecord;
use crate::types::{Content, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Inbound ─────────────────────────────────────────────────────────────

/// Items a transport collaborator submits into a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundItem {
    /// User content (text, audio frames, video frames).
    #[serde(rename = "input.content")]
    Content {
        /// The submitted content.
        content: Content,
    },

    /// User activity began (e.g. speech start). Arriving while a turn is in
    /// flight, this is the interruption trigger.
    #[serde(rename = "input.activity_start")]
    ActivityStart,

    /// User activity ended (e.g. speech stop).
    #[serde(rename = "input.activity_end")]
    ActivityEnd,

    /// Explicit end-of-turn hint from the transport.
    #[serde(rename = "input.end_of_turn")]
    EndOfTurn,

    /// Close the session gracefully.
    #[serde(rename = "input.close")]
    Close,
}

// ── Outbound ────────────────────────────────────────────────────────────

/// One outbound event with its session-scoped sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Monotonic sequence number, scoped to the session. Used for ordering
    /// and resumption.
    pub seq: u64,
    /// The event payload.
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

/// Outbound event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEventKind {
    /// Partial model output (text or audio) for the current turn.
    #[serde(rename = "turn.partial")]
    TurnPartial {
        /// Turn this delta belongs to.
        turn_id: String,
        /// The partial content.
        part: Part,
    },

    /// Transcription update for the current turn.
    #[serde(rename = "turn.transcription")]
    Transcription {
        /// Turn this transcript belongs to.
        turn_id: String,
        /// Transcript delta.
        text: String,
    },

    /// The model requested a tool invocation.
    #[serde(rename = "tool.announced")]
    ToolCallAnnounced {
        /// Invocation id; all later events for this invocation carry it.
        invocation_id: String,
        /// Tool name.
        tool_name: String,
        /// Arguments as requested by the model.
        args: Value,
    },

    /// Streaming or terminal output of one tool invocation.
    #[serde(rename = "tool.outcome")]
    ToolOutcome {
        /// Invocation this outcome belongs to.
        invocation_id: String,
        /// Partial chunk or terminal payload.
        payload: ToolOutcomePayload,
    },

    /// The turn finished; the model produced its final response.
    #[serde(rename = "turn.complete")]
    TurnComplete {
        /// The completed turn.
        turn_id: String,
    },

    /// The in-flight turn was interrupted by new user activity.
    #[serde(rename = "turn.interrupted")]
    Interrupted {
        /// The interrupted turn.
        turn_id: String,
    },

    /// The session closed; no further events follow.
    #[serde(rename = "session.closed")]
    SessionClosed {
        /// Why the session closed.
        reason: CloseReason,
    },
}

/// Payload of a `tool.outcome` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcomePayload {
    /// An intermediate result chunk. `seq` is strictly increasing per
    /// invocation and delivered in order.
    Partial {
        /// Per-invocation chunk sequence number, starting at 1.
        seq: u64,
        /// The chunk value.
        value: Value,
    },
    /// Terminal success.
    Completed {
        /// The tool's final result.
        result: Value,
    },
    /// Terminal failure, surfaced as data rather than ending the session.
    Failed {
        /// Structured failure description.
        error: ErrorRecord,
    },
    /// Terminal cancellation (interruption or deadline); distinct from
    /// failure.
    Cancelled,
}

impl ToolOutcomePayload {
    /// True for `Completed`, `Failed`, and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Partial { .. })
    }
}

/// Why a session closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CloseReason {
    /// The transport asked for a graceful close.
    ClientRequested,
    /// The session idled past its configured timeout.
    IdleTimeout,
    /// The model stream failed; retry policy is the caller's concern.
    ModelFailure {
        /// Provider-reported failure.
        message: String,
    },
    /// Internal invariant violation; the session cannot continue.
    SchedulerFault {
        /// The violated invariant.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_seq_flattened_on_wire() {
        let event = SessionEvent {
            seq: 7,
            kind: SessionEventKind::TurnComplete { turn_id: "turn-1".to_string() },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["type"], "turn.complete");
        assert_eq!(json["turn_id"], "turn-1");
    }

    #[test]
    fn test_tool_outcome_tags() {
        let event = SessionEventKind::ToolOutcome {
            invocation_id: "inv-1".to_string(),
            payload: ToolOutcomePayload::Partial { seq: 1, value: serde_json::json!(42) },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("tool.outcome"));
        assert!(json.contains("\"status\":\"partial\""));
    }

    #[test]
    fn test_terminal_classification() {
        assert!(!ToolOutcomePayload::Partial { seq: 1, value: Value::Null }.is_terminal());
        assert!(ToolOutcomePayload::Cancelled.is_terminal());
        assert!(ToolOutcomePayload::Completed { result: Value::Null }.is_terminal());
    }

    #[test]
    fn test_inbound_item_tags() {
        let json = serde_json::to_string(&InboundItem::ActivityStart).unwrap();
        assert!(json.contains("input.activity_start"));
        let back: InboundItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, InboundItem::ActivityStart);
    }

    #[test]
    fn test_close_reason_serde() {
        let reason = CloseReason::SchedulerFault { message: "double terminal".to_string() };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("scheduler_fault"));
    }
}
