//! Session configuration surface.

use crate::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a live session and its tool scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Worker slots for blocking invocations. Excess invocations queue.
    pub pool_capacity: usize,

    /// Per-invocation deadline, measured from execution start (pool queue
    /// wait is backpressure, not budget).
    #[serde(with = "duration_ms")]
    pub invocation_timeout: Duration,

    /// Maximum tool-call rounds within one turn before the turn is ended.
    pub max_tool_depth: u32,

    /// Wall-clock budget after which a cooperative invocation that never
    /// checkpointed is logged as a policy violation. Never force-cancelled.
    #[serde(with = "duration_ms")]
    pub yield_budget: Duration,

    /// How long interruption waits for cancellation acknowledgments from
    /// in-flight invocations before moving on.
    #[serde(with = "duration_ms")]
    pub interruption_ack_timeout: Duration,

    /// Outbound events retained for resumption replay.
    pub event_buffer: usize,

    /// Tear down the session after this long with no inbound items while
    /// idle. `None` disables the timeout.
    #[serde(default, with = "opt_duration_ms", skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 4,
            invocation_timeout: Duration::from_secs(30),
            max_tool_depth: 8,
            yield_budget: Duration::from_millis(500),
            interruption_ack_timeout: Duration::from_secs(2),
            event_buffer: 1024,
            idle_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the execution pool capacity.
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Set the per-invocation deadline.
    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Set the maximum tool-call nesting depth per turn.
    pub fn with_max_tool_depth(mut self, depth: u32) -> Self {
        self.max_tool_depth = depth;
        self
    }

    /// Set the cooperative yield-budget warning threshold.
    pub fn with_yield_budget(mut self, budget: Duration) -> Self {
        self.yield_budget = budget;
        self
    }

    /// Set the interruption acknowledgment timeout.
    pub fn with_interruption_ack_timeout(mut self, timeout: Duration) -> Self {
        self.interruption_ack_timeout = timeout;
        self
    }

    /// Set the resumption replay buffer size.
    pub fn with_event_buffer(mut self, events: usize) -> Self {
        self.event_buffer = events;
        self
    }

    /// Set the idle session timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Reject configurations the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 {
            return Err(ParleyError::config("pool_capacity must be at least 1"));
        }
        if self.max_tool_depth == 0 {
            return Err(ParleyError::config("max_tool_depth must be at least 1"));
        }
        if self.event_buffer == 0 {
            return Err(ParleyError::config("event_buffer must be at least 1"));
        }
        if self.invocation_timeout.is_zero() {
            return Err(ParleyError::config("invocation_timeout must be nonzero"));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
