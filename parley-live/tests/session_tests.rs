//! End-to-end session behavior: turn streaming, tool round-trips,
//! interruption, resumption, and close paths.

use async_stream::stream;
use async_trait::async_trait;
use parley_core::{
    CloseReason, Content, ExecutionMode, InboundItem, LiveModel, ModelChunk, ModelStream, Part,
    Result, SessionConfig, SessionEvent, SessionEventKind, ToolDescriptor, ToolOutcomePayload,
};
use parley_live::{EventStream, LiveSession, SessionState};
use parley_tool::FunctionTool;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::StreamExt;

enum Step {
    Chunk(ModelChunk),
    Wait(Duration),
    Stall,
}

/// A model that plays back pre-scripted turns and records the history it
/// was given for each one.
struct ScriptedModel {
    turns: Mutex<VecDeque<Vec<Step>>>,
    histories: Mutex<Vec<Vec<Content>>>,
}

impl ScriptedModel {
    fn new(turns: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self { turns: Mutex::new(turns.into()), histories: Mutex::new(Vec::new()) })
    }

    fn histories(&self) -> Vec<Vec<Content>> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait]
impl LiveModel for ScriptedModel {
    async fn stream_turn(
        &self,
        history: &[Content],
        _tools: &[ToolDescriptor],
    ) -> Result<ModelStream> {
        self.histories.lock().unwrap().push(history.to_vec());
        let steps = self.turns.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::pin(stream! {
            for step in steps {
                match step {
                    Step::Chunk(chunk) => yield Ok(chunk),
                    Step::Wait(duration) => tokio::time::sleep(duration).await,
                    Step::Stall => futures::future::pending::<()>().await,
                }
            }
        }))
    }
}

fn text_turn(text: &str) -> Vec<Step> {
    vec![
        Step::Chunk(ModelChunk::TextDelta(text.to_string())),
        Step::Chunk(ModelChunk::TurnComplete),
    ]
}

fn call_turn(calls: &[(&str, &str)]) -> Vec<Step> {
    let mut steps: Vec<Step> = calls
        .iter()
        .map(|(id, name)| {
            Step::Chunk(ModelChunk::FunctionCall {
                id: id.to_string(),
                name: name.to_string(),
                args: json!({}),
            })
        })
        .collect();
    steps.push(Step::Chunk(ModelChunk::TurnComplete));
    steps
}

fn user_text(text: &str) -> InboundItem {
    InboundItem::Content { content: Content::new("user").with_text(text) }
}

/// Collect events until `stop` matches one (inclusive), with a test-level
/// timeout so a hung session fails instead of wedging the suite.
async fn collect_until(
    events: &mut EventStream,
    mut stop: impl FnMut(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut collected = Vec::new();
    tokio::time::timeout(Duration::from_secs(300), async {
        while let Some(event) = events.next().await {
            let done = stop(&event);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for session events");
    collected
}

fn is_turn_complete(event: &SessionEvent) -> bool {
    matches!(event.kind, SessionEventKind::TurnComplete { .. })
}

#[tokio::test]
async fn test_text_turn_streams_then_completes() {
    let model = ScriptedModel::new(vec![vec![
        Step::Chunk(ModelChunk::TextDelta("Hel".to_string())),
        Step::Chunk(ModelChunk::TextDelta("lo".to_string())),
        Step::Chunk(ModelChunk::TurnComplete),
    ]]);
    let session = LiveSession::builder().model(model).build().unwrap();
    let mut events = session.events();

    session.submit(user_text("hi")).unwrap();
    let events = collect_until(&mut events, is_turn_complete).await;

    let deltas: Vec<String> = events
        .iter()
        .filter_map(|e| match &e.kind {
            SessionEventKind::TurnPartial { part: Part::Text { text }, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Hel", "lo"]);

    // Sequence numbers are monotonic on the outbound stream.
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_tool_roundtrip_folds_response_into_next_round() {
    let model = ScriptedModel::new(vec![
        call_turn(&[("call-1", "lookup")]),
        text_turn("the answer is 4"),
    ]);
    let session = LiveSession::builder()
        .model(model.clone())
        .tool(Arc::new(FunctionTool::new("lookup", "returns a number", |_ctx, _args| async {
            Ok(json!(4))
        })))
        .build()
        .unwrap();
    let mut events = session.events();

    session.submit(user_text("what is 2+2?")).unwrap();
    let events = collect_until(&mut events, is_turn_complete).await;

    assert!(events.iter().any(|e| matches!(
        &e.kind,
        SessionEventKind::ToolCallAnnounced { tool_name, .. } if tool_name == "lookup"
    )));
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        SessionEventKind::ToolOutcome {
            payload: ToolOutcomePayload::Completed { result },
            ..
        } if result == &json!(4)
    )));

    // The second model round saw the function response in its history.
    let histories = model.histories();
    assert_eq!(histories.len(), 2);
    let folded = histories[1].iter().any(|c| {
        c.role == "function"
            && c.parts.iter().any(|p| {
                matches!(p, Part::FunctionResponse { name, response, .. }
                    if name == "lookup" && response == &json!(4))
            })
    });
    assert!(folded, "function response missing from second-round history");
}

#[tokio::test]
async fn test_tool_partials_stream_in_order_on_outbound() {
    let model = ScriptedModel::new(vec![call_turn(&[("call-1", "ticker")]), text_turn("done")]);
    let session = LiveSession::builder()
        .model(model)
        .tool(Arc::new(FunctionTool::new("ticker", "emits three chunks", |ctx, _args| {
            async move {
                for i in 1..=3 {
                    ctx.emit_partial(json!(i))?;
                    ctx.checkpoint().await?;
                }
                Ok(json!("finished"))
            }
        })))
        .build()
        .unwrap();
    let mut events = session.events();

    session.submit(user_text("tick")).unwrap();
    let events = collect_until(&mut events, is_turn_complete).await;

    let partial_seqs: Vec<u64> = events
        .iter()
        .filter_map(|e| match &e.kind {
            SessionEventKind::ToolOutcome {
                payload: ToolOutcomePayload::Partial { seq, .. },
                ..
            } => Some(*seq),
            _ => None,
        })
        .collect();
    assert_eq!(partial_seqs, vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interruption_mid_batch() {
    let model = ScriptedModel::new(vec![
        call_turn(&[("c-100", "sleep_100"), ("c-200", "sleep_200"), ("c-300", "sleep_300")]),
        text_turn("recovered"),
    ]);
    let mut builder = LiveSession::builder().model(model);
    for (name, ms) in [("sleep_100", 100u64), ("sleep_200", 200), ("sleep_300", 300)] {
        builder = builder.tool(Arc::new(
            FunctionTool::new(name, "blocks", move |_ctx, _args| async move {
                std::thread::sleep(Duration::from_millis(ms));
                Ok(json!(ms))
            })
            .with_mode(ExecutionMode::Blocking),
        ));
    }
    let session = builder.build().unwrap();
    let mut events = session.events();

    session.submit(user_text("run them")).unwrap();

    // Barge in at ~150ms: after the 100ms call finished, before the others.
    tokio::time::sleep(Duration::from_millis(150)).await;
    session.submit(InboundItem::ActivityStart).unwrap();

    let mut terminal_outcomes = 0;
    let events = collect_until(&mut events, |e| {
        if let SessionEventKind::ToolOutcome { payload, .. } = &e.kind {
            if payload.is_terminal() {
                terminal_outcomes += 1;
                return terminal_outcomes == 3;
            }
        }
        false
    })
    .await;

    let interrupted: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.kind, SessionEventKind::Interrupted { .. }))
        .collect();
    assert_eq!(interrupted.len(), 1, "expected exactly one interrupted event");

    let outcome_of = |id: &str| {
        events.iter().find_map(|e| match &e.kind {
            SessionEventKind::ToolOutcome { invocation_id, payload }
                if invocation_id == id && payload.is_terminal() =>
            {
                Some(payload.clone())
            }
            _ => None,
        })
    };
    assert!(matches!(outcome_of("c-100"), Some(ToolOutcomePayload::Completed { .. })));
    assert!(matches!(outcome_of("c-200"), Some(ToolOutcomePayload::Cancelled)));
    assert!(matches!(outcome_of("c-300"), Some(ToolOutcomePayload::Cancelled)));

    // The session survived: a fresh turn still runs to completion.
    let mut events = session.events();
    session.submit(user_text("still there?")).unwrap();
    let events = collect_until(&mut events, is_turn_complete).await;
    assert!(events.iter().any(is_turn_complete));
}

#[tokio::test]
async fn test_interruption_mid_model_stream() {
    let model = ScriptedModel::new(vec![
        vec![Step::Chunk(ModelChunk::TextDelta("thinking...".to_string())), Step::Stall],
        text_turn("after barge-in"),
    ]);
    let session = LiveSession::builder().model(model).build().unwrap();
    let mut events = session.events();

    session.submit(user_text("question")).unwrap();
    let _ = collect_until(&mut events, |e| {
        matches!(e.kind, SessionEventKind::TurnPartial { .. })
    })
    .await;

    session.submit(InboundItem::ActivityStart).unwrap();
    let events_after = collect_until(&mut events, |e| {
        matches!(e.kind, SessionEventKind::Interrupted { .. })
    })
    .await;
    assert_eq!(
        events_after
            .iter()
            .filter(|e| matches!(e.kind, SessionEventKind::Interrupted { .. }))
            .count(),
        1
    );

    // The stalled model call was dropped; the next turn proceeds.
    let mut events = session.events();
    session.submit(user_text("go on")).unwrap();
    let events = collect_until(&mut events, is_turn_complete).await;
    assert!(events.iter().any(is_turn_complete));
}

#[tokio::test]
async fn test_resumption_never_replays_delivered_outcomes() {
    let model = ScriptedModel::new(vec![
        call_turn(&[("call-1", "lookup")]),
        text_turn("first answer"),
        text_turn("second answer"),
    ]);
    let session = LiveSession::builder()
        .model(model)
        .tool(Arc::new(FunctionTool::new("lookup", "returns a number", |_ctx, _args| async {
            Ok(json!(4))
        })))
        .build()
        .unwrap();
    let mut events = session.events();

    session.submit(user_text("first")).unwrap();
    let delivered = collect_until(&mut events, is_turn_complete).await;
    assert!(delivered.iter().any(|e| matches!(
        &e.kind,
        SessionEventKind::ToolOutcome { payload, .. } if payload.is_terminal()
    )));
    let delivered_seqs: Vec<u64> = delivered.iter().map(|e| e.seq).collect();

    // Disconnect, checkpoint, reconnect.
    drop(events);
    let token = session.resumption_token();
    let encoded = token.encode();
    let token = parley_live::ResumptionToken::decode(&encoded).unwrap();
    let mut resumed = session.resume(&token).unwrap();

    session.submit(user_text("second")).unwrap();
    let replayed = collect_until(&mut resumed, is_turn_complete).await;

    let max_delivered = delivered_seqs.iter().max().copied().unwrap();
    assert!(replayed.iter().all(|e| e.seq > max_delivered), "delivered events were replayed");
    assert!(!replayed.iter().any(|e| matches!(
        &e.kind,
        SessionEventKind::ToolOutcome { payload, .. } if payload.is_terminal()
    )));
}

#[tokio::test]
async fn test_resume_rejects_foreign_token() {
    let session_a = LiveSession::builder().model(ScriptedModel::new(vec![])).build().unwrap();
    let session_b = LiveSession::builder().model(ScriptedModel::new(vec![])).build().unwrap();

    let token = session_a.resumption_token();
    assert!(session_b.resume(&token).is_err());
}

#[tokio::test]
async fn test_max_tool_depth_bounds_nested_calls() {
    // The model asks for another tool round every time; the session must
    // stop at the configured depth.
    let endless: Vec<Vec<Step>> =
        (0..8).map(|i| call_turn(&[(format!("call-{i}").as_str(), "again")])).collect();
    let model = ScriptedModel::new(endless);
    let session = LiveSession::builder()
        .model(model)
        .config(SessionConfig::new().with_max_tool_depth(2))
        .tool(Arc::new(FunctionTool::new("again", "asks for more", |_ctx, _args| async {
            Ok(json!("more"))
        })))
        .build()
        .unwrap();
    let mut events = session.events();

    session.submit(user_text("loop")).unwrap();
    let events = collect_until(&mut events, is_turn_complete).await;

    let announced = events
        .iter()
        .filter(|e| matches!(e.kind, SessionEventKind::ToolCallAnnounced { .. }))
        .count();
    assert_eq!(announced, 2, "dispatch rounds must stop at max_tool_depth");
}

#[tokio::test]
async fn test_close_emits_session_closed_and_ends_stream() {
    let session = LiveSession::builder().model(ScriptedModel::new(vec![])).build().unwrap();
    let mut events = session.events();

    session.close().unwrap();
    let events = collect_until(&mut events, |e| {
        matches!(e.kind, SessionEventKind::SessionClosed { .. })
    })
    .await;

    assert!(matches!(
        events.last().map(|e| &e.kind),
        Some(SessionEventKind::SessionClosed { reason: CloseReason::ClientRequested })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_closes_session() {
    let session = LiveSession::builder()
        .model(ScriptedModel::new(vec![]))
        .config(SessionConfig::new().with_idle_timeout(Duration::from_secs(30)))
        .build()
        .unwrap();
    let mut events = session.events();

    let events = collect_until(&mut events, |e| {
        matches!(e.kind, SessionEventKind::SessionClosed { .. })
    })
    .await;
    assert!(matches!(
        events.last().map(|e| &e.kind),
        Some(SessionEventKind::SessionClosed { reason: CloseReason::IdleTimeout })
    ));
}

#[tokio::test]
async fn test_unknown_tool_surfaces_failure_not_close() {
    let model = ScriptedModel::new(vec![call_turn(&[("call-1", "ghost")]), text_turn("sorry")]);
    let session = LiveSession::builder().model(model).build().unwrap();
    let mut events = session.events();

    session.submit(user_text("use the ghost tool")).unwrap();
    let events = collect_until(&mut events, is_turn_complete).await;

    assert!(events.iter().any(|e| matches!(
        &e.kind,
        SessionEventKind::ToolOutcome { payload: ToolOutcomePayload::Failed { .. }, .. }
    )));
    assert!(!events.iter().any(|e| matches!(e.kind, SessionEventKind::SessionClosed { .. })));
}
