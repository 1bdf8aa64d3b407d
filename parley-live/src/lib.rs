//! Bidirectional live-session event loop for the Parley runtime.
//!
//! A [`LiveSession`] owns one conversation: an inbound queue of content and
//! control signals, an outbound stream of sequenced events, and the turn
//! currently in flight. Tool calls emitted by a model turn are executed by
//! the `parley-tool` scheduler; user barge-in interrupts the turn through
//! the [`InterruptionController`] without destroying session state; the
//! outbound stream can be reconnected with a [`ResumptionToken`] without
//! replaying delivered events.

mod event_log;
mod interruption;
mod session;

pub use event_log::{EventLog, EventStream};
pub use interruption::InterruptionController;
pub use session::{LiveSession, LiveSessionBuilder, ResumptionToken, SessionState};
