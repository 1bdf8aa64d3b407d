//! The model seam: an external collaborator that turns conversation history
//! into a streamed model turn. Inference itself is out of scope; the runtime
//! only consumes the chunk stream and cancels by dropping it.

use crate::types::Content;
use crate::{Result, ToolDescriptor};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// One streamed fragment of a model turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    /// Partial output text.
    TextDelta(String),
    /// Partial output audio (raw bytes; codec handling is external).
    AudioDelta(Vec<u8>),
    /// Partial transcription of input or output audio.
    TranscriptDelta(String),
    /// The model requests a tool invocation.
    FunctionCall {
        /// Call id assigned by the model. Empty if the provider has none;
        /// the session mints one in that case.
        id: String,
        name: String,
        args: serde_json::Value,
    },
    /// The model finished this turn.
    TurnComplete,
}

/// Stream of model chunks for one turn.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelChunk>> + Send>>;

/// A bidirectional-capable model endpoint.
///
/// Implementations wrap a provider transport (WebSocket, gRPC, in-process).
/// Dropping the returned stream cancels the in-flight turn; providers should
/// treat that as the interruption signal.
#[async_trait]
pub trait LiveModel: Send + Sync {
    /// Start one model turn over the given history and declared tools,
    /// returning the chunk stream for it.
    async fn stream_turn(&self, history: &[Content], tools: &[ToolDescriptor])
    -> Result<ModelStream>;
}
