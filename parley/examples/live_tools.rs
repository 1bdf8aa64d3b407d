//! Minimal end-to-end session with a scripted model and one tool.
//!
//! Run with: `cargo run -p parley --example live_tools`

use async_stream::stream;
use async_trait::async_trait;
use parley::prelude::*;
use parley::ToolDescriptor;
use std::sync::Arc;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Plays one tool-call round, then answers with text.
struct ScriptedModel {
    round: AtomicUsize,
}

#[async_trait]
impl LiveModel for ScriptedModel {
    async fn stream_turn(
        &self,
        _history: &[Content],
        _tools: &[ToolDescriptor],
    ) -> Result<parley::ModelStream> {
        let round = self.round.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(stream! {
            if round == 0 {
                yield Ok(ModelChunk::FunctionCall {
                    id: "call-1".to_string(),
                    name: "get_weather".to_string(),
                    args: serde_json::json!({ "city": "Oslo" }),
                });
            } else {
                yield Ok(ModelChunk::TextDelta("Sunny in Oslo today.".to_string()));
            }
            yield Ok(ModelChunk::TurnComplete);
        }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let session = LiveSession::builder()
        .model(Arc::new(ScriptedModel { round: AtomicUsize::new(0) }))
        .tool(Arc::new(FunctionTool::new(
            "get_weather",
            "Get the weather for a city",
            |ctx, args| async move {
                ctx.emit_partial(serde_json::json!({ "status": "looking up" }))?;
                ctx.checkpoint().await?;
                Ok(serde_json::json!({ "city": args["city"], "condition": "sunny" }))
            },
        )))
        .build()?;

    let mut events = session.events();
    session.submit(InboundItem::Content {
        content: Content::new("user").with_text("Weather in Oslo?"),
    })?;

    while let Some(event) = events.next().await {
        println!("[{:>3}] {:?}", event.seq, event.kind);
        if matches!(event.kind, SessionEventKind::TurnComplete { .. }) {
            break;
        }
    }
    session.close()?;
    Ok(())
}
