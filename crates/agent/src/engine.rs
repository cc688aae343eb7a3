//! The iteration engine.
//!
//! A run is a sequence of non-overlapping iterations. Each iteration prunes
//! and trims the transcript, asks the provider for one turn, and either
//! finishes (no tool calls) or dispatches the requested tools, sanitizes
//! their results, and loops. The engine never returns an error: every
//! failure is folded into [`RunResult`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use turnwright_config::EngineConfig;
use turnwright_core::{
    AgentEvent, EventEmitter, EventSink, ImagePart, Message, MessageToolCall, PendingEdit,
    ProviderError, ProviderHandle, SessionState, ToolCall, ToolCategory, ToolDefinition,
    ToolExecutor, TurnOutput, TurnRequest,
};

use crate::context::token::{estimate_messages_tokens, estimate_tokens, estimate_tools_tokens};
use crate::context::{
    ContextInput, ContextLimits, DocumentContext, OpenFile, TrimLimits, build_initial_messages,
    trim_to_budget,
};
use crate::dispatch::execute_batch;
use crate::images::{ImageLimits, extract_image, image_context_message, retire_stale_images};
use crate::sanitize::{Sanitizer, SanitizerLimits, render_tool_content};

/// Engine-wide limits, fixed for the engine's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_iterations: usize,
    pub context: ContextLimits,
    pub trim: TrimLimits,
    pub sanitizer: SanitizerLimits,
    pub images: ImageLimits,
    /// When set, only these tools are offered to the model.
    pub allow_list: Option<Vec<String>>,
    pub disabled_categories: Vec<ToolCategory>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(c: &EngineConfig) -> Self {
        Self {
            max_iterations: c.max_iterations,
            context: ContextLimits::from(&c.context),
            trim: TrimLimits::from(&c.context),
            sanitizer: SanitizerLimits::from(&c.sanitizer),
            images: ImageLimits::from(&c.images),
            allow_list: c.tools.allow_list.clone(),
            disabled_categories: c.tools.disabled_categories.clone(),
        }
    }
}

/// Inputs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    pub system_prompt: String,
    pub user_message: String,
    pub knowledge_context: Option<String>,
    pub open_files: Vec<OpenFile>,
    pub summary: Option<String>,
    pub history: Vec<Message>,
    pub selection: Option<String>,
    pub document: Option<DocumentContext>,
    /// Every tool the host can run; filtered per run before being offered.
    pub tools: Vec<ToolDefinition>,
    pub cancel: CancellationToken,
}

impl RunParams {
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_open_files(mut self, files: Vec<OpenFile>) -> Self {
        self.open_files = files;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_knowledge(mut self, knowledge: impl Into<String>) -> Self {
        self.knowledge_context = Some(knowledge.into());
        self
    }

    pub fn with_selection(mut self, selection: impl Into<String>) -> Self {
        self.selection = Some(selection.into());
        self
    }

    pub fn with_document(mut self, document: DocumentContext) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn context_input(&self) -> ContextInput<'_> {
        ContextInput {
            system_prompt: &self.system_prompt,
            knowledge_context: self.knowledge_context.as_deref(),
            open_files: &self.open_files,
            summary: self.summary.as_deref(),
            history: &self.history,
            user_message: &self.user_message,
            selection: self.selection.as_deref(),
            document: self.document.as_ref(),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools.
    Completed,
    IterationBudgetExceeded,
    TransportError,
    Cancelled,
}

/// The outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub response_text: String,
    pub tokens_used: u64,
    pub iterations: usize,
    pub pending_edits: Vec<PendingEdit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stop_reason: StopReason,
    /// Calls beyond the per-iteration limit, summed over the run.
    pub skipped_tool_calls: usize,
    /// Tool results stripped by adapters because their call was missing.
    pub orphaned_results_dropped: usize,
}

/// Runs tool-calling conversations against any provider adapter.
#[derive(Debug, Clone, Default)]
pub struct AgentEngine {
    settings: EngineSettings,
    sanitizer: Sanitizer,
}

impl AgentEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let sanitizer = Sanitizer::new(settings.sanitizer.clone());
        Self {
            settings,
            sanitizer,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(EngineSettings::from(config))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Drive one run to completion.
    pub async fn run(
        &self,
        provider: &ProviderHandle,
        executor: &dyn ToolExecutor,
        params: RunParams,
        sink: Option<Arc<dyn EventSink>>,
    ) -> RunResult {
        let events = EventEmitter::from_option(sink);
        let tools = self.offered_tools(provider, &params.tools);
        let messages = build_initial_messages(&params.context_input(), &self.settings.context);

        info!(
            provider = %provider.id,
            model = %provider.model,
            tools = tools.len(),
            messages = messages.len(),
            "Starting run"
        );

        let mut run = Run {
            engine: self,
            provider,
            executor,
            events: &events,
            tools: &tools,
            tools_tokens: estimate_tools_tokens(&tools),
            messages,
            session: SessionState::Empty,
            tokens_used: 0,
            iterations: 0,
            pending_edits: Vec::new(),
            skipped_tool_calls: 0,
            orphans_dropped: 0,
        };
        let result = run.drive(&params.cancel).await;

        if let Some(error) = &result.error {
            events.emit(AgentEvent::Error {
                message: error.clone(),
            });
        }
        info!(
            provider = %provider.id,
            iterations = result.iterations,
            tokens = result.tokens_used,
            stop = ?result.stop_reason,
            "Run finished"
        );
        result
    }

    /// Capability filter, then allow-list, then disabled categories.
    fn offered_tools(
        &self,
        provider: &ProviderHandle,
        tools: &[ToolDefinition],
    ) -> Vec<ToolDefinition> {
        filter_tools(
            provider.filter_tools_by_capability(tools),
            self.settings.allow_list.as_deref(),
            &self.settings.disabled_categories,
        )
    }
}

/// Apply the allow-list and category filters to tool definitions.
pub fn filter_tools(
    tools: Vec<ToolDefinition>,
    allow_list: Option<&[String]>,
    disabled_categories: &[ToolCategory],
) -> Vec<ToolDefinition> {
    tools
        .into_iter()
        .filter(|t| allow_list.is_none_or(|allowed| allowed.iter().any(|a| a == &t.name)))
        .filter(|t| {
            t.category
                .is_none_or(|category| !disabled_categories.contains(&category))
        })
        .collect()
}

/// Per-run state, owned by exactly one run.
struct Run<'a> {
    engine: &'a AgentEngine,
    provider: &'a ProviderHandle,
    executor: &'a dyn ToolExecutor,
    events: &'a EventEmitter,
    tools: &'a [ToolDefinition],
    tools_tokens: usize,
    messages: Vec<Message>,
    session: SessionState,
    tokens_used: u64,
    iterations: usize,
    pending_edits: Vec<PendingEdit>,
    skipped_tool_calls: usize,
    orphans_dropped: usize,
}

enum TurnFailure {
    Transport(ProviderError),
    Cancelled,
}

impl Run<'_> {
    async fn drive(&mut self, cancel: &CancellationToken) -> RunResult {
        let max_iterations = self.engine.settings.max_iterations;
        let hints = self.provider.performance_hints();

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                return self.cancelled();
            }
            self.iterations = iteration;
            let epoch = epoch_of(iteration);

            prune_ephemeral(&mut self.messages, epoch);
            let trim = trim_to_budget(&mut self.messages, &self.engine.settings.trim);
            if trim.changed() {
                self.events.emit(AgentEvent::Info {
                    message: format!(
                        "Trimmed context from ~{} to ~{} tokens",
                        trim.tokens_before, trim.tokens_after
                    ),
                });
                self.restart_chain("context trimmed");
            }

            self.events.emit(AgentEvent::IterationStart {
                iteration,
                max_iterations,
            });
            self.events.emit(AgentEvent::Status {
                message: format!("Waiting for {} (iteration {iteration})", self.provider.model),
            });
            debug!(iteration, messages = self.messages.len(), "Requesting model turn");

            let output = match self.turn(&hints, cancel).await {
                Ok(output) => output,
                Err(TurnFailure::Cancelled) => return self.cancelled(),
                Err(TurnFailure::Transport(e)) => {
                    warn!(provider = %self.provider.id, iteration, error = %e, "Model turn failed");
                    let error = Some(e.to_string());
                    return self.finish(StopReason::TransportError, String::new(), error);
                }
            };

            self.session = output.session;
            if output.orphans_dropped > 0 {
                self.events.emit(AgentEvent::Info {
                    message: format!(
                        "Dropped {} tool result(s) whose call was missing",
                        output.orphans_dropped
                    ),
                });
            }
            self.orphans_dropped += output.orphans_dropped;
            self.tokens_used += match output.usage {
                Some(usage) => u64::from(usage.total_tokens),
                None => {
                    let prompt = estimate_messages_tokens(&self.messages) + self.tools_tokens;
                    (prompt + estimate_tokens(&output.text)) as u64
                }
            };

            if output.tool_calls.is_empty() {
                self.messages.push(Message::assistant(output.text.clone()));
                return self.finish(StopReason::Completed, output.text, None);
            }

            let calls = normalize_calls(&output.tool_calls, iteration);
            self.messages.push(Message::assistant_with_tools(
                output.text,
                calls
                    .iter()
                    .map(|c| MessageToolCall {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        arguments: c.arguments.to_string(),
                    })
                    .collect(),
            ));

            self.dispatch(calls, &hints, epoch).await;
            if cancel.is_cancelled() {
                return self.cancelled();
            }
        }

        let error = format!(
            "Reached the maximum of {max_iterations} iterations \
             before the model produced a final answer"
        );
        warn!(max_iterations, "Iteration budget exhausted");
        self.finish(StopReason::IterationBudgetExceeded, String::new(), Some(error))
    }

    async fn turn(
        &self,
        hints: &turnwright_core::PerformanceHints,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput, TurnFailure> {
        let request = TurnRequest {
            model: &self.provider.model,
            messages: &self.messages,
            tools: self.tools,
            session: self.session.clone(),
            hints,
            events: self.events,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TurnFailure::Cancelled),
            result = self.provider.adapter().run_turn(request) => {
                result.map_err(TurnFailure::Transport)
            }
        }
    }

    async fn dispatch(
        &mut self,
        calls: Vec<ToolCall>,
        hints: &turnwright_core::PerformanceHints,
        epoch: u32,
    ) {
        let limit = hints.max_tools_per_iteration.max(1);
        let run_count = calls.len().min(limit);
        let (to_run, to_skip) = calls.split_at(run_count);

        if !to_skip.is_empty() {
            warn!(
                requested = calls.len(),
                limit,
                skipped = to_skip.len(),
                "Too many tool calls in one turn, skipping the rest"
            );
            self.events.emit(AgentEvent::Info {
                message: format!(
                    "Model requested {} tool calls; running the first {limit}, skipping {}",
                    calls.len(),
                    to_skip.len()
                ),
            });
        }
        self.skipped_tool_calls += to_skip.len();
        self.events.emit(AgentEvent::ToolsStart {
            count: to_run.len(),
            skipped: to_skip.len(),
        });
        self.events.emit(AgentEvent::Status {
            message: format!("Running {} tool call(s)", to_run.len()),
        });

        let outcomes = execute_batch(
            self.executor,
            to_run,
            hints.max_concurrent_tools,
            self.events,
        )
        .await;

        let mut images: Vec<ImagePart> = Vec::new();
        for outcome in outcomes {
            if let Some(image) = extract_image(&outcome.value) {
                images.push(image);
            }
            // The host gets the edit exactly as proposed; only the model's copy is capped.
            if let Some(edit) = PendingEdit::from_tool_value(&outcome.call.id, &outcome.value) {
                debug!(file = %edit.file_path, "Queued pending edit");
                self.pending_edits.push(edit);
            }
            let sanitized = self.engine.sanitizer.sanitize(&outcome.value);
            self.push_result(&outcome.call, sanitized);
        }

        for call in to_skip {
            let skipped = json!({
                "skipped": true,
                "error": format!(
                    "Not executed: at most {limit} tool calls run per turn. \
                     Request it again if still needed."
                ),
            });
            self.push_result(call, skipped);
        }

        if !images.is_empty() {
            let retired = retire_stale_images(&mut self.messages, epoch);
            if retired > 0 {
                debug!(retired, "Retired images from earlier iterations");
                self.restart_chain("images retired");
            }
            if let Some(msg) = image_context_message(images, epoch, &self.engine.settings.images) {
                self.messages.push(msg);
            }
        }
    }

    fn push_result(&mut self, call: &ToolCall, result: serde_json::Value) {
        let content = render_tool_content(&result);
        self.events.emit(AgentEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            result,
        });
        self.messages.push(Message::tool_result(call.id.clone(), content));
    }

    /// Drop the backend's continuation chain so the next turn resends the
    /// local transcript. Trimmed messages and retired images otherwise stay
    /// alive server-side behind `previous_response_id`.
    fn restart_chain(&mut self, reason: &str) {
        if self.session.previous_turn_id().is_some() {
            debug!(reason, "Restarting continuation chain");
            self.session = SessionState::Empty;
        }
    }

    fn cancelled(&mut self) -> RunResult {
        self.finish(StopReason::Cancelled, String::new(), Some("Run cancelled".into()))
    }

    fn finish(
        &mut self,
        stop_reason: StopReason,
        response_text: String,
        error: Option<String>,
    ) -> RunResult {
        RunResult {
            success: stop_reason == StopReason::Completed,
            response_text,
            tokens_used: self.tokens_used,
            iterations: self.iterations,
            pending_edits: std::mem::take(&mut self.pending_edits),
            error,
            stop_reason,
            skipped_tool_calls: self.skipped_tool_calls,
            orphaned_results_dropped: self.orphans_dropped,
        }
    }
}

fn epoch_of(iteration: usize) -> u32 {
    u32::try_from(iteration).unwrap_or(u32::MAX)
}

/// Keep ephemeral entries from the current and the immediately prior epoch.
fn prune_ephemeral(messages: &mut Vec<Message>, epoch: u32) {
    let before = messages.len();
    messages.retain(|m| m.ephemeral_epoch.is_none_or(|e| e.saturating_add(1) >= epoch));
    let pruned = before - messages.len();
    if pruned > 0 {
        debug!(pruned, epoch, "Pruned stale ephemeral messages");
    }
}

/// Normalize model-issued calls, giving id-less calls a stable synthetic id.
fn normalize_calls(raw: &[MessageToolCall], iteration: usize) -> Vec<ToolCall> {
    raw.iter()
        .enumerate()
        .map(|(index, call)| {
            let mut normalized = ToolCall::normalize(call);
            if normalized.id.trim().is_empty() {
                normalized.id = format!("call_{iteration}_{index}");
            }
            normalized
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use turnwright_core::{
        ProtocolFamily, ProviderAdapter, Role, ToolContext, ToolError, ToolValue, Usage,
    };

    /// Replays canned turns and records the transcript of every request.
    struct Scripted {
        turns: Mutex<Vec<Result<TurnOutput, ProviderError>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(mut turns: Vec<Result<TurnOutput, ProviderError>>) -> Self {
            turns.reverse();
            Self {
                turns: Mutex::new(turns),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }
        fn family(&self) -> ProtocolFamily {
            ProtocolFamily::StatelessStreaming
        }
        async fn run_turn(&self, request: TurnRequest<'_>) -> Result<TurnOutput, ProviderError> {
            self.seen.lock().unwrap().push(request.messages.to_vec());
            self.turns
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(text_turn("done")))
        }
    }

    struct Echo;

    #[async_trait]
    impl ToolExecutor for Echo {
        async fn execute(
            &self,
            name: &str,
            arguments: Value,
            _ctx: &ToolContext,
        ) -> Result<ToolValue, ToolError> {
            match name {
                "edit_file" => Ok(ToolValue::Json(json!({
                    "action": "queue_edit",
                    "filePath": arguments["path"],
                    "instructions": "rename",
                }))),
                "shot" => Ok(ToolValue::Json(json!({
                    "type": "image",
                    "mimeType": "image/png",
                    "data": "iVBORw0KGgo=",
                }))),
                _ => Ok(ToolValue::Json(json!({"echo": arguments}))),
            }
        }
    }

    fn text_turn(text: &str) -> TurnOutput {
        TurnOutput {
            text: text.into(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            ..Default::default()
        }
    }

    fn tool_turn(calls: Vec<(&str, &str, &str)>) -> TurnOutput {
        TurnOutput {
            tool_calls: calls
                .into_iter()
                .map(|(id, name, args)| MessageToolCall {
                    id: id.into(),
                    name: name.into(),
                    arguments: args.into(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn handle(adapter: Arc<Scripted>) -> ProviderHandle {
        ProviderHandle::new("Scripted", "test-model", adapter)
    }

    #[tokio::test]
    async fn text_only_turn_completes() {
        let adapter = Arc::new(Scripted::new(vec![Ok(text_turn("Hello!"))]));
        let result = AgentEngine::default()
            .run(&handle(adapter), &Echo, RunParams::new("sys", "hi"), None)
            .await;
        assert!(result.success);
        assert_eq!(result.response_text, "Hello!");
        assert_eq!(result.iterations, 1);
        assert_eq!(result.tokens_used, 15);
        assert_eq!(result.stop_reason, StopReason::Completed);
    }

    #[tokio::test]
    async fn pending_edits_accumulate_and_are_not_applied() {
        let adapter = Arc::new(Scripted::new(vec![
            Ok(tool_turn(vec![("c1", "edit_file", r#"{"path":"src/lib.rs"}"#)])),
            Ok(text_turn("queued")),
        ]));
        let result = AgentEngine::default()
            .run(&handle(adapter), &Echo, RunParams::new("sys", "rename"), None)
            .await;
        assert!(result.success);
        assert_eq!(result.pending_edits.len(), 1);
        assert_eq!(result.pending_edits[0].file_path, "src/lib.rs");
        assert_eq!(result.pending_edits[0].tool_call_id, "c1");
    }

    #[tokio::test]
    async fn transport_error_aborts_without_retry() {
        let adapter = Arc::new(Scripted::new(vec![Err(ProviderError::Network(
            "connection reset".into(),
        ))]));
        let result = AgentEngine::default()
            .run(&handle(adapter.clone()), &Echo, RunParams::new("sys", "hi"), None)
            .await;
        assert!(!result.success);
        assert_eq!(result.stop_reason, StopReason::TransportError);
        assert!(result.error.unwrap().contains("connection reset"));
        assert_eq!(adapter.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_calls_degrade_and_get_ids() {
        let adapter = Arc::new(Scripted::new(vec![
            Ok(tool_turn(vec![("", "", "{not json"), ("", "list", r#"{"dir": "src"#)])),
            Ok(text_turn("ok")),
        ]));
        let result = AgentEngine::default()
            .run(&handle(adapter.clone()), &Echo, RunParams::new("sys", "go"), None)
            .await;
        assert!(result.success);

        let seen = adapter.seen.lock().unwrap();
        let second = &seen[1];
        let assistant = second.iter().find(|m| m.has_tool_calls()).unwrap();
        assert_eq!(assistant.tool_calls[0].name, ToolCall::UNKNOWN);
        assert_eq!(assistant.tool_calls[0].id, "call_1_0");
        assert_eq!(assistant.tool_calls[1].arguments, r#"{"dir":"src"}"#);
        let results: Vec<&Message> = second.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("error"));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let adapter = Arc::new(Scripted::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = AgentEngine::default()
            .run(
                &handle(adapter.clone()),
                &Echo,
                RunParams::new("sys", "hi").with_cancel(cancel),
                None,
            )
            .await;
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert!(!result.success);
        assert!(adapter.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retiring_images_restarts_the_continuation_chain() {
        /// Continues a backend chain and records the session of every request.
        #[derive(Default)]
        struct Chained {
            sessions: Mutex<Vec<SessionState>>,
        }

        #[async_trait]
        impl ProviderAdapter for Chained {
            fn id(&self) -> &str {
                "chained"
            }
            fn family(&self) -> ProtocolFamily {
                ProtocolFamily::Continuation
            }
            async fn run_turn(
                &self,
                request: TurnRequest<'_>,
            ) -> Result<TurnOutput, ProviderError> {
                let mut sessions = self.sessions.lock().unwrap();
                let n = sessions.len();
                sessions.push(request.session.clone());
                if n >= 2 {
                    return Ok(text_turn("seen both"));
                }
                let mut output = tool_turn(vec![("", "shot", "{}")]);
                output.session = SessionState::Continuation {
                    previous_turn_id: format!("resp_{n}"),
                    acknowledged: request.messages.iter().map(|m| m.id.clone()).collect(),
                };
                Ok(output)
            }
        }

        let adapter = Arc::new(Chained::default());
        let provider = ProviderHandle::new("Chained", "test-model", adapter.clone());
        let result = AgentEngine::default()
            .run(&provider, &Echo, RunParams::new("sys", "look twice"), None)
            .await;
        assert!(result.success);

        let sessions = adapter.sessions.lock().unwrap();
        assert_eq!(sessions[0], SessionState::Empty);
        assert_eq!(sessions[1].previous_turn_id(), Some("resp_0"));
        // The second batch retired the first image, so the chain starts over.
        assert_eq!(sessions[2], SessionState::Empty);
    }

    #[test]
    fn tool_filtering() {
        let def = |name: &str, category: Option<ToolCategory>| ToolDefinition {
            name: name.into(),
            description: String::new(),
            parameters: json!({"type": "object"}),
            category,
        };
        let tools = vec![
            def("read_file", Some(ToolCategory::File)),
            def("run_command", Some(ToolCategory::Terminal)),
            def("search", None),
        ];

        let out = filter_tools(tools.clone(), None, &[ToolCategory::Terminal]);
        let names: Vec<&str> = out.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["read_file", "search"]);

        let allow = vec!["search".to_string(), "run_command".to_string()];
        let out = filter_tools(tools, Some(&allow), &[ToolCategory::Terminal]);
        let names: Vec<&str> = out.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["search"]);
    }

    #[test]
    fn ephemeral_pruning_keeps_current_and_prior_epoch() {
        let mut messages = vec![
            Message::system("sys"),
            Message::user("[Image context] a").ephemeral(1),
            Message::user("[Image context] b").ephemeral(2),
            Message::user("[Image context] c").ephemeral(3),
        ];
        prune_ephemeral(&mut messages, 3);
        let kept: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(kept, ["sys", "[Image context] b", "[Image context] c"]);
    }
}
