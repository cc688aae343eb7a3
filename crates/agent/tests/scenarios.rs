//! End-to-end runs of the iteration engine.
//!
//! A scripted adapter replays canned model turns and records every request;
//! a scripted executor plays the host's tool runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use turnwright_agent::context::token::estimate_messages_tokens;
use turnwright_agent::{AgentEngine, CIRCULAR_SENTINEL, EngineSettings, RunParams, StopReason};
use turnwright_core::{
    AgentEvent, ChannelSink, EventSink, Message, MessageToolCall, PerformanceHints,
    ProtocolFamily, ProviderAdapter, ProviderError, ProviderHandle, Role, SinkError,
    ToolContext, ToolDefinition, ToolError, ToolExecutor, ToolValue, TurnOutput, TurnRequest,
    Usage,
};
use turnwright_providers::strip_orphans;

// ── Scripted adapter ────────────────────────────────────────────────────

enum Script {
    /// Replay these turns in order, then answer "done".
    Turns(Mutex<Vec<TurnOutput>>),
    /// Request the same tool call forever.
    Forever(MessageToolCall),
}

struct ScriptedAdapter {
    script: Script,
    hints: PerformanceHints,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedAdapter {
    fn turns(mut turns: Vec<TurnOutput>) -> Self {
        turns.reverse();
        Self {
            script: Script::Turns(Mutex::new(turns)),
            hints: PerformanceHints::default(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn forever(call: MessageToolCall) -> Self {
        Self {
            script: Script::Forever(call),
            hints: PerformanceHints::default(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_hints(mut self, hints: PerformanceHints) -> Self {
        self.hints = hints;
        self
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> Vec<Message> {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        "scripted"
    }

    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::StatelessStreaming
    }

    fn performance_hints(&self, _model: &str) -> PerformanceHints {
        self.hints.clone()
    }

    async fn run_turn(&self, request: TurnRequest<'_>) -> Result<TurnOutput, ProviderError> {
        // Same pre-transmission pass a pairing-validating backend gets.
        let (kept, orphans) = strip_orphans(request.messages);
        self.requests
            .lock()
            .unwrap()
            .push(kept.into_iter().cloned().collect());

        let mut output = match &self.script {
            Script::Turns(turns) => turns.lock().unwrap().pop().unwrap_or_else(|| text("done")),
            Script::Forever(call) => TurnOutput {
                tool_calls: vec![call.clone()],
                usage: Some(usage(100)),
                ..Default::default()
            },
        };
        output.orphans_dropped = orphans;
        Ok(output)
    }
}

fn usage(total: u32) -> Usage {
    Usage {
        prompt_tokens: total - 10,
        completion_tokens: 10,
        total_tokens: total,
    }
}

fn text(answer: &str) -> TurnOutput {
    TurnOutput {
        text: answer.into(),
        usage: Some(usage(50)),
        ..Default::default()
    }
}

fn tools(calls: &[(&str, &str, Value)]) -> TurnOutput {
    TurnOutput {
        tool_calls: calls
            .iter()
            .map(|(id, name, args)| MessageToolCall {
                id: (*id).into(),
                name: (*name).into(),
                arguments: args.to_string(),
            })
            .collect(),
        usage: Some(usage(80)),
        ..Default::default()
    }
}

fn handle(adapter: &Arc<ScriptedAdapter>) -> ProviderHandle {
    ProviderHandle::new("Scripted", "scripted-model", adapter.clone())
}

// ── Scripted executor ───────────────────────────────────────────────────

#[derive(Default)]
struct Workspace {
    executed: AtomicUsize,
}

#[async_trait]
impl ToolExecutor for Workspace {
    async fn execute(
        &self,
        name: &str,
        arguments: Value,
        _ctx: &ToolContext,
    ) -> Result<ToolValue, ToolError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        match name {
            "list_directory" => Ok(ToolValue::Json(json!({
                "path": arguments["path"],
                "entries": ["Cargo.toml", "src/", "README.md"],
            }))),
            "edit_file" => Ok(ToolValue::Json(json!({
                "action": "queue_edit",
                "filePath": arguments["path"],
                "instructions": "apply",
            }))),
            "screenshot" => Ok(ToolValue::Json(json!({
                "type": "image",
                "mimeType": "image/png",
                "data": "A".repeat(100_000),
                "path": arguments["path"],
            }))),
            "capture" => Ok(ToolValue::Json(json!({
                "type": "image",
                "mimeType": "image/png",
                "data": "B".repeat(arguments["chars"].as_u64().unwrap_or(0) as usize),
                "path": arguments["path"],
            }))),
            "propose_patch" => Ok(ToolValue::Json(json!({
                "action": "queue_edit",
                "filePath": "src/big.rs",
                "instructions": "regenerate",
                "patch": big_patch(),
            }))),
            "cyclic" => {
                let node = ToolValue::shared(ToolValue::Json(Value::Null));
                *node.write().unwrap() = ToolValue::Object(vec![
                    ("label".into(), ToolValue::Json(json!("loop"))),
                    ("again".into(), ToolValue::Shared(node.clone())),
                ]);
                Ok(ToolValue::Shared(node))
            }
            "huge" => Ok(ToolValue::Json(Value::Array((0..10_000).map(Value::from).collect()))),
            "fails" => Err(ToolError::ExecutionFailed {
                tool_name: name.into(),
                reason: "permission denied".into(),
            }),
            "panics" => panic!("tool crashed"),
            other => Err(ToolError::NotFound(other.into())),
        }
    }
}

/// A 100,000-char unified diff with distinct lines.
fn big_patch() -> String {
    let mut patch: String = (0..10_000).map(|i| format!("+line {i:05}\n")).collect();
    patch.truncate(100_000);
    patch
}

fn tool_defs() -> Vec<ToolDefinition> {
    ["list_directory", "edit_file", "screenshot"]
        .into_iter()
        .map(|name| ToolDefinition {
            name: name.into(),
            description: format!("{name} tool"),
            parameters: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
            category: None,
        })
        .collect()
}

fn tool_results(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| m.role == Role::Tool).collect()
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn list_files_then_answer() {
    let adapter = Arc::new(ScriptedAdapter::turns(vec![
        tools(&[("call_1", "list_directory", json!({"path": "."}))]),
        text("The workspace has Cargo.toml, src/ and README.md."),
    ]));
    let workspace = Workspace::default();
    let params = RunParams::new("You are a coding assistant.", "What files are here?")
        .with_tools(tool_defs());

    let result = AgentEngine::default()
        .run(&handle(&adapter), &workspace, params, None)
        .await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.stop_reason, StopReason::Completed);
    assert!(result.response_text.contains("README.md"));
    assert_eq!(result.tokens_used, 80 + 50);
    assert!(result.error.is_none());

    let second = adapter.request(1);
    let assistant = second.iter().rev().find(|m| m.has_tool_calls()).unwrap();
    assert_eq!(assistant.tool_calls[0].id, "call_1");
    let results = tool_results(&second);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_call_id.as_deref(), Some("call_1"));
    assert!(results[0].content.contains("Cargo.toml"));
}

#[tokio::test]
async fn seventy_five_identical_calls_hit_the_cap() {
    let adapter = Arc::new(ScriptedAdapter::forever(MessageToolCall {
        id: "same".into(),
        name: "edit_file".into(),
        arguments: r#"{"path":"src/main.rs"}"#.into(),
    }));
    let workspace = Workspace::default();
    let params = RunParams::new("sys", "keep editing").with_tools(tool_defs());

    let result = AgentEngine::default()
        .run(&handle(&adapter), &workspace, params, None)
        .await;

    assert!(!result.success);
    assert_eq!(result.iterations, 75);
    assert_eq!(adapter.request_count(), 75);
    assert_eq!(result.stop_reason, StopReason::IterationBudgetExceeded);
    assert!(result.error.as_deref().unwrap().contains("iteration"));
    assert_eq!(result.tokens_used, 75 * 100);
    assert_eq!(result.pending_edits.len(), 75);
    assert_eq!(workspace.executed.load(Ordering::SeqCst), 75);
}

#[tokio::test]
async fn custom_iteration_cap_is_exact() {
    let adapter = Arc::new(ScriptedAdapter::forever(MessageToolCall {
        id: "c".into(),
        name: "list_directory".into(),
        arguments: "{}".into(),
    }));
    let engine = AgentEngine::new(EngineSettings {
        max_iterations: 3,
        ..Default::default()
    });
    let result = engine
        .run(&handle(&adapter), &Workspace::default(), RunParams::new("sys", "go"), None)
        .await;
    assert_eq!(result.iterations, 3);
    assert_eq!(adapter.request_count(), 3);
}

#[tokio::test]
async fn oversized_images_become_a_manifest() {
    let adapter = Arc::new(ScriptedAdapter::turns(vec![
        tools(&[
            ("s1", "screenshot", json!({"path": "one.png"})),
            ("s2", "screenshot", json!({"path": "two.png"})),
            ("s3", "screenshot", json!({"path": "three.png"})),
        ]),
        text("I looked at the screenshots."),
    ]));
    let result = AgentEngine::default()
        .run(
            &handle(&adapter),
            &Workspace::default(),
            RunParams::new("sys", "take screenshots").with_tools(tool_defs()),
            None,
        )
        .await;
    assert!(result.success);

    let second = adapter.request(1);
    assert!(second.iter().all(|m| m.images.is_empty()));

    let manifest = second
        .iter()
        .find(|m| m.role == Role::User && m.ephemeral_epoch == Some(1))
        .unwrap();
    assert!(manifest.content.contains("Manifest"));
    for name in ["one.png", "two.png", "three.png"] {
        assert!(manifest.content.contains(name));
    }

    for msg in tool_results(&second) {
        let value: Value = serde_json::from_str(&msg.content).unwrap();
        assert_eq!(value["dataOmitted"], true);
        assert_eq!(value["dataLengthChars"], 100_000);
    }
}

#[tokio::test]
async fn small_images_are_inlined_for_the_next_turn_only() {
    struct SmallShots;

    #[async_trait]
    impl ToolExecutor for SmallShots {
        async fn execute(
            &self,
            _name: &str,
            arguments: Value,
            _ctx: &ToolContext,
        ) -> Result<ToolValue, ToolError> {
            Ok(ToolValue::Json(json!({
                "type": "image",
                "mimeType": "image/png",
                "data": "iVBORw0KGgo=",
                "path": arguments["path"],
            })))
        }
    }

    let adapter = Arc::new(ScriptedAdapter::turns(vec![
        tools(&[("a", "screenshot", json!({"path": "a.png"}))]),
        tools(&[("b", "list_directory", json!({}))]),
        tools(&[("c", "list_directory", json!({}))]),
        text("done"),
    ]));
    AgentEngine::default()
        .run(&handle(&adapter), &SmallShots, RunParams::new("sys", "look"), None)
        .await;

    let with_images = |n: usize| {
        adapter
            .request(n)
            .iter()
            .filter(|m| !m.images.is_empty())
            .count()
    };
    assert_eq!(with_images(1), 1);
    // Every later turn also returned an image, so exactly one batch is attached each time.
    assert_eq!(with_images(2), 1);
    assert_eq!(with_images(3), 1);
    let ephemeral = adapter
        .request(3)
        .iter()
        .filter(|m| m.ephemeral_epoch.is_some())
        .count();
    assert!(ephemeral <= 2);
}

#[tokio::test]
async fn failing_and_panicking_tools_do_not_affect_siblings() {
    let adapter = Arc::new(ScriptedAdapter::turns(vec![
        tools(&[
            ("a", "list_directory", json!({"path": "."})),
            ("b", "fails", json!({})),
            ("c", "panics", json!({})),
            ("d", "list_directory", json!({"path": "src"})),
        ]),
        text("Two of four tools worked."),
    ]));
    let result = AgentEngine::default()
        .run(&handle(&adapter), &Workspace::default(), RunParams::new("sys", "go"), None)
        .await;

    assert!(result.success);
    let second = adapter.request(1);
    let results = tool_results(&second);
    assert_eq!(results.len(), 4);
    assert!(results[0].content.contains("entries"));
    assert!(results[1].content.contains("permission denied"));
    assert!(results[2].content.contains("tool crashed"));
    assert!(results[3].content.contains("entries"));
}

#[tokio::test]
async fn calls_beyond_the_limit_are_skipped_but_answered() {
    let adapter = Arc::new(
        ScriptedAdapter::turns(vec![
            tools(&[
                ("c1", "list_directory", json!({})),
                ("c2", "list_directory", json!({})),
                ("c3", "list_directory", json!({})),
                ("c4", "list_directory", json!({})),
                ("c5", "list_directory", json!({})),
            ]),
            text("ok"),
        ])
        .with_hints(PerformanceHints {
            max_concurrent_tools: 2,
            max_tools_per_iteration: 3,
            ..PerformanceHints::default()
        }),
    );
    let workspace = Workspace::default();
    let (sink, mut rx) = ChannelSink::new();

    let result = AgentEngine::default()
        .run(
            &handle(&adapter),
            &workspace,
            RunParams::new("sys", "list everything"),
            Some(Arc::new(sink)),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.skipped_tool_calls, 2);
    assert_eq!(workspace.executed.load(Ordering::SeqCst), 3);

    let second = adapter.request(1);
    let results = tool_results(&second);
    assert_eq!(results.len(), 5);
    for skipped in &results[3..] {
        let value: Value = serde_json::from_str(&skipped.content).unwrap();
        assert_eq!(value["skipped"], true);
        assert!(value["error"].is_string());
    }

    let mut saw_batch = false;
    let mut skip_notice = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            AgentEvent::ToolsStart { count, skipped } => {
                assert_eq!((count, skipped), (3, 2));
                saw_batch = true;
            }
            AgentEvent::Info { message } => skip_notice = Some(message),
            _ => {}
        }
    }
    assert!(saw_batch);
    assert!(skip_notice.unwrap().contains("skipping 2"));
}

#[tokio::test]
async fn orphaned_history_results_are_counted() {
    let history = vec![
        Message::user("earlier question"),
        Message::assistant("earlier answer"),
        Message::tool_result("ghost_call", "stale output"),
    ];
    let adapter = Arc::new(ScriptedAdapter::turns(vec![text("fine")]));
    let (sink, mut rx) = ChannelSink::new();
    let result = AgentEngine::default()
        .run(
            &handle(&adapter),
            &Workspace::default(),
            RunParams::new("sys", "continue").with_history(history),
            Some(Arc::new(sink)),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.orphaned_results_dropped, 1);
    assert!(tool_results(&adapter.request(0)).is_empty());

    let mut notices = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::Info { message } = event {
            notices.push(message);
        }
    }
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("Dropped 1 tool result"));
}

#[tokio::test]
async fn hostile_results_are_sanitized_before_the_next_turn() {
    let adapter = Arc::new(ScriptedAdapter::turns(vec![
        tools(&[("h", "huge", json!({})), ("y", "cyclic", json!({}))]),
        text("ok"),
    ]));
    let result = AgentEngine::default()
        .run(&handle(&adapter), &Workspace::default(), RunParams::new("sys", "go"), None)
        .await;
    assert!(result.success);

    let second = adapter.request(1);
    let results = tool_results(&second);
    let huge: Value = serde_json::from_str(&results[0].content).unwrap();
    assert_eq!(huge["_truncatedArray"], true);
    assert_eq!(huge["originalLength"], 10_000);
    assert_eq!(huge["items"].as_array().unwrap().len(), 500);

    let cyclic: Value = serde_json::from_str(&results[1].content).unwrap();
    assert_eq!(cyclic["label"], "loop");
    assert_eq!(cyclic["again"], CIRCULAR_SENTINEL);
}

#[tokio::test]
async fn broken_sink_never_aborts_the_run() {
    struct BrokenSink;

    impl EventSink for BrokenSink {
        fn emit(&self, event: &AgentEvent) -> Result<(), SinkError> {
            if matches!(event, AgentEvent::ToolStart { .. }) {
                panic!("renderer crashed");
            }
            Err(SinkError::Other("socket closed".into()))
        }
    }

    let adapter = Arc::new(ScriptedAdapter::turns(vec![
        tools(&[("a", "list_directory", json!({}))]),
        text("still here"),
    ]));
    let result = AgentEngine::default()
        .run(
            &handle(&adapter),
            &Workspace::default(),
            RunParams::new("sys", "go"),
            Some(Arc::new(BrokenSink)),
        )
        .await;
    assert!(result.success);
    assert_eq!(result.response_text, "still here");
}

#[tokio::test]
async fn events_follow_the_iteration_lifecycle() {
    let adapter = Arc::new(ScriptedAdapter::turns(vec![
        tools(&[("a", "list_directory", json!({}))]),
        text("done"),
    ]));
    let (sink, mut rx) = ChannelSink::new();
    AgentEngine::default()
        .run(
            &handle(&adapter),
            &Workspace::default(),
            RunParams::new("sys", "go"),
            Some(Arc::new(sink)),
        )
        .await;

    let mut kinds = Vec::new();
    let mut statuses = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.event_type());
        if let AgentEvent::Status { message } = event {
            statuses.push(message);
        }
    }
    assert_eq!(
        kinds,
        [
            "iteration_start",
            "status",
            "tools_start",
            "status",
            "tool_start",
            "tool_complete",
            "tool_result",
            "iteration_start",
            "status",
        ]
    );
    assert!(statuses[0].contains("scripted-model"));
    assert_eq!(statuses[1], "Running 1 tool call(s)");
}

#[tokio::test]
async fn large_patch_reaches_pending_edits_intact() {
    let adapter = Arc::new(ScriptedAdapter::turns(vec![
        tools(&[("p", "propose_patch", json!({}))]),
        text("Patch queued."),
    ]));
    let result = AgentEngine::default()
        .run(&handle(&adapter), &Workspace::default(), RunParams::new("sys", "rewrite"), None)
        .await;

    assert!(result.success);
    assert_eq!(result.pending_edits.len(), 1);
    let edit = &result.pending_edits[0];
    assert_eq!(edit.file_path, "src/big.rs");
    assert_eq!(edit.patch.as_deref(), Some(big_patch().as_str()));

    // The model still only sees a capped copy.
    let second = adapter.request(1);
    let shown: Value = serde_json::from_str(&tool_results(&second)[0].content).unwrap();
    assert_eq!(shown["patch_truncated"], true);
    assert!(shown["patch"].as_str().unwrap().len() < 100_000);
}

#[tokio::test]
async fn context_stays_under_the_ceiling_within_one_user_turn() {
    let adapter = Arc::new(ScriptedAdapter::forever(MessageToolCall {
        id: "w".into(),
        name: "write_file".into(),
        arguments: json!({ "content": "a".repeat(30_000) }).to_string(),
    }));
    let mut settings = EngineSettings {
        max_iterations: 30,
        ..Default::default()
    };
    settings.trim.max_tokens = 60_000;

    let result = AgentEngine::new(settings)
        .run(
            &handle(&adapter),
            &Workspace::default(),
            RunParams::new("sys", "write thirty files"),
            None,
        )
        .await;
    assert_eq!(result.stop_reason, StopReason::IterationBudgetExceeded);

    for n in 0..adapter.request_count() {
        let request = adapter.request(n);
        assert!(estimate_messages_tokens(&request) <= 60_000, "request {n} over budget");
        assert!(request.iter().any(|m| m.content == "write thirty files"));
    }
    let last = adapter.request(29);
    assert!(last.len() < 2 + 2 * 29);
    assert_eq!(last.last().unwrap().role, Role::Tool);
}

#[tokio::test]
async fn cancelling_during_a_tool_batch_stops_before_the_next_turn() {
    struct CancelsWhileRunning {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl ToolExecutor for CancelsWhileRunning {
        async fn execute(
            &self,
            _name: &str,
            arguments: Value,
            _ctx: &ToolContext,
        ) -> Result<ToolValue, ToolError> {
            self.cancel.cancel();
            tokio::task::yield_now().await;
            Ok(ToolValue::Json(json!({
                "action": "queue_edit",
                "filePath": arguments["path"],
                "instructions": "finish anyway",
            })))
        }
    }

    let adapter = Arc::new(ScriptedAdapter::turns(vec![
        tools(&[
            ("a", "edit_file", json!({"path": "a.rs"})),
            ("b", "edit_file", json!({"path": "b.rs"})),
        ]),
        text("never reached"),
    ]));
    let cancel = CancellationToken::new();
    let executor = CancelsWhileRunning {
        cancel: cancel.clone(),
    };

    let result = AgentEngine::default()
        .run(
            &handle(&adapter),
            &executor,
            RunParams::new("sys", "edit both").with_cancel(cancel),
            None,
        )
        .await;

    assert_eq!(result.stop_reason, StopReason::Cancelled);
    assert!(!result.success);
    assert_eq!(result.iterations, 1);
    assert_eq!(adapter.request_count(), 1);
    // The batch settled before the run stopped.
    assert_eq!(result.pending_edits.len(), 2);
}

#[tokio::test]
async fn two_images_over_the_guardrail_are_listed_not_attached() {
    let adapter = Arc::new(ScriptedAdapter::turns(vec![
        tools(&[
            ("i1", "capture", json!({"path": "left.png", "chars": 110_000})),
            ("i2", "capture", json!({"path": "right.png", "chars": 95_000})),
        ]),
        text("Seen."),
    ]));
    let result = AgentEngine::default()
        .run(&handle(&adapter), &Workspace::default(), RunParams::new("sys", "look"), None)
        .await;
    assert!(result.success);

    let second = adapter.request(1);
    assert!(second.iter().all(|m| m.images.is_empty()));
    let manifest = second.iter().find(|m| m.ephemeral_epoch == Some(1)).unwrap();
    assert!(manifest.content.contains("205000 encoded chars"));
    assert!(manifest.content.contains("left.png (image/png, 110000 chars)"));
    assert!(manifest.content.contains("right.png (image/png, 95000 chars)"));
}
