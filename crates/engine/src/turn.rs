//! The turn controller: one user message through to a persisted answer.
//!
//! ```text
//! validate ─► resolve provider ─► gather ─► assemble ─► tools
//!     ─► stream ─┬─► done ───────────────► persist ─► post-processing
//!                └─► tool calls ─► execute ─► continuation ─► stream …
//! ```
//!
//! Every turn ends with exactly one terminal event on the sink: `done` or
//! `error`. Cancellation and failures persist whatever content arrived with
//! status `error` and never reach post-processing.

use std::sync::Arc;
use std::time::Duration;

use chatforge_config::{AppConfig, ModelConfig};
use chatforge_core::error::{ChatError, ErrorKind};
use chatforge_core::event::{DomainEvent, EventBus};
use chatforge_core::message::{Message, MessageStatus, Role};
use chatforge_core::request::UnifiedChatRequest;
use chatforge_core::storage::Storage;
use chatforge_core::stream::{StreamUsage, UnifiedStreamEvent};
use chatforge_core::tool::{ToolCall, ToolContext};
use chatforge_providers::{AdapterRegistry, ProviderHandle, StreamState};
use chatforge_tools::ToolExecutor;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::{AssemblyOptions, ContextAssembler, is_native_reasoning};
use crate::orchestrator::{GatherFlags, GatherRequest, TaskOrchestrator};
use crate::post_processing::{PostProcessJob, PostProcessingQueue};
use crate::request::ChatRequest;
use crate::tools_builder::build_turn_tools;

/// Events for the caller, in upstream order.
pub type TurnSink = mpsc::Sender<UnifiedStreamEvent>;

/// What a finished turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: Option<String>,
    /// The assistant message as persisted (or as it would have been, for
    /// temporary chats)
    pub message: Message,
    pub usage: StreamUsage,
    pub tool_rounds: usize,
}

/// Content accumulated across every round of one turn.
#[derive(Debug, Default)]
struct Progress {
    content: String,
    reasoning: String,
    usage: StreamUsage,
    tool_rounds: usize,
}

/// Everything resolved before the first upstream byte.
struct PreparedTurn {
    handle: ProviderHandle,
    session_id: Option<String>,
    assistant: Message,
    upstream: UnifiedChatRequest,
    search_results: String,
    tool_context: ToolContext,
}

pub struct TurnController {
    registry: AdapterRegistry,
    orchestrator: Arc<TaskOrchestrator>,
    assembler: Arc<ContextAssembler>,
    tools: Arc<ToolExecutor>,
    storage: Arc<dyn Storage>,
    config: Arc<AppConfig>,
    events: Option<Arc<EventBus>>,
    post_processing: Option<PostProcessingQueue>,
}

impl TurnController {
    pub fn new(
        registry: AdapterRegistry,
        orchestrator: Arc<TaskOrchestrator>,
        assembler: Arc<ContextAssembler>,
        tools: Arc<ToolExecutor>,
        storage: Arc<dyn Storage>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            assembler,
            tools,
            storage,
            config,
            events: None,
            post_processing: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_post_processing(mut self, queue: PostProcessingQueue) -> Self {
        self.post_processing = Some(queue);
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.config.turn.upstream_timeout_secs)
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    /// Run one turn, forwarding unified events to `sink`.
    ///
    /// A closed sink counts as cancellation.
    pub async fn run(
        &self,
        user_id: &str,
        request: ChatRequest,
        sink: TurnSink,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        let prepared = match self.prepare(user_id, &request, &cancel).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.report_failure(None, &e, &sink).await;
                return Err(e);
            }
        };

        let mut progress = Progress::default();
        let streamed = self.drive(&prepared, &sink, &cancel, &mut progress).await;

        match streamed {
            Ok(()) => {
                let outcome = self.complete(user_id, &request, prepared, progress).await;
                // The caller may already be gone; the turn is persisted either way
                let _ = sink.send(UnifiedStreamEvent::done(None)).await;
                Ok(outcome)
            }
            Err(e) => {
                self.persist_failure(&prepared, &progress).await;
                self.report_failure(prepared.session_id.clone(), &e, &sink).await;
                Err(e)
            }
        }
    }

    // ── Preparation ──────────────────────────────────────────────────────

    async fn prepare(
        &self,
        user_id: &str,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<PreparedTurn, ChatError> {
        request.validate()?;

        let provider = request
            .provider
            .clone()
            .unwrap_or_else(|| self.config.default_provider.clone());
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let handle = self.registry.resolve(&provider)?;

        self.publish(DomainEvent::TurnStarted {
            session_id: request.session_id.clone(),
            provider: provider.clone(),
            model: model.clone(),
            timestamp: Utc::now(),
        });
        info!(provider = %provider, model = %model, messages = request.messages.len(), "Turn started");

        let gather = self.orchestrator.gather(GatherRequest {
            user_id,
            session_id: request.session_id.as_deref(),
            project_id: request.project_id.as_deref(),
            messages: request.messages.clone(),
            flags: GatherFlags {
                temp_chat: request.temp_chat,
                external_search: request.uses_external_search(),
                vector_search: request.vector_search,
            },
        });
        let gathered = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::cancelled()),
            gathered = gather => gathered?,
        };
        let session_id = gathered.session_id.clone();

        let model_config: Option<&ModelConfig> =
            handle.settings().models.iter().find(|m| m.id == model);
        let reasoning = request.effective_reasoning();
        let assembled = self
            .assembler
            .assemble(
                gathered,
                AssemblyOptions {
                    reasoning: reasoning.enabled,
                    native_reasoning: is_native_reasoning(
                        &model,
                        handle.settings().reasoning_for(&model),
                    ),
                    skills: &self.config.skills,
                },
            )
            .await;

        let turn_tools = build_turn_tools(
            &self.tools,
            request,
            handle.settings(),
            handle.adapter().kind(),
            model_config,
        )
        .await;
        debug!(tools = turn_tools.tools.len(), extra = turn_tools.extra.len(), "Turn tools built");

        let mut assistant = Message::assistant("");
        assistant.status = MessageStatus::Streaming;
        assistant.model = Some(model.clone());
        assistant.provider = Some(provider.clone());
        if let Some(sid) = &session_id {
            assistant = self.persist_opening(sid, request, assistant).await?;
        }

        let settings = handle.settings();
        let tool_context = ToolContext {
            provider: provider.clone(),
            base_url: settings.base_url.clone(),
            api_key: settings.api_key().to_string(),
            settings: request.tool_options.clone(),
        };

        let upstream = UnifiedChatRequest {
            messages: assembled.messages,
            model,
            provider,
            tools: turn_tools.tools,
            reasoning,
            sampling: request.sampling(),
            extra: turn_tools.extra,
        };

        Ok(PreparedTurn {
            handle,
            session_id,
            assistant,
            upstream,
            search_results: assembled.search_results,
            tool_context,
        })
    }

    /// Store the new user message and the streaming placeholder after it.
    ///
    /// The request carries the client's branch. A trailing user message the
    /// session already holds (a resend) is reused rather than stored again,
    /// and a new one hangs from the message before it when that one is stored.
    async fn persist_opening(
        &self,
        session_id: &str,
        request: &ChatRequest,
        mut assistant: Message,
    ) -> Result<Message, ChatError> {
        let Some((user, history)) = request
            .messages
            .split_last()
            .filter(|(last, _)| last.role == Role::User)
        else {
            return Ok(self.storage.append_message(session_id, assistant).await?);
        };

        let tree = self.storage.load_tree(session_id).await?;
        let parent = if tree.get(&user.id).is_some() {
            debug!(session_id, message_id = %user.id, "User message already stored, reusing it");
            user.id.clone()
        } else {
            let mut user = user.clone();
            let stored_parent = user.parent_id.take().filter(|p| tree.get(p).is_some());
            user.parent_id = history
                .last()
                .filter(|prev| tree.get(&prev.id).is_some())
                .map(|prev| prev.id.clone())
                .or(stored_parent);
            self.storage.append_message(session_id, user).await?.id
        };

        assistant.parent_id = Some(parent);
        Ok(self.storage.append_message(session_id, assistant).await?)
    }

    // ── Streaming ────────────────────────────────────────────────────────

    /// Stream rounds until the model stops calling tools.
    async fn drive(
        &self,
        prepared: &PreparedTurn,
        sink: &TurnSink,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<(), ChatError> {
        let mut upstream = prepared.upstream.clone();
        let max_rounds = self.config.turn.max_tool_rounds;

        loop {
            let round_start = progress.content.len();
            let calls = self
                .stream_round(&prepared.handle, &upstream, sink, cancel, progress)
                .await?;
            if calls.is_empty() {
                return Ok(());
            }

            progress.tool_rounds += 1;
            if progress.tool_rounds > max_rounds {
                warn!(rounds = progress.tool_rounds, max_rounds, "Tool round limit exceeded");
                return Err(ChatError::internal("tool round limit exceeded"));
            }
            info!(round = progress.tool_rounds, calls = calls.len(), "Executing tool calls");

            let outputs = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::cancelled()),
                outputs = self.tools.execute_all(&calls, &prepared.tool_context) => outputs,
            };

            let mut request_turn = Message::assistant(&progress.content[round_start..]);
            request_turn.tool_calls = calls.clone();
            upstream.messages.push(request_turn);
            for (call, output) in calls.iter().zip(outputs) {
                upstream.messages.push(Message::tool_result(call, output.content));
            }
        }
    }

    /// One upstream request. Returns the tool calls it ended with.
    async fn stream_round(
        &self,
        handle: &ProviderHandle,
        request: &UnifiedChatRequest,
        sink: &TurnSink,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<Vec<ToolCall>, ChatError> {
        let timeout = self.upstream_timeout();
        let provider = handle.id();

        let mut frames = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::cancelled()),
            opened = tokio::time::timeout(timeout, handle.open(request)) => match opened {
                Ok(frames) => frames?,
                Err(_) => return Err(upstream_timeout(provider, timeout)),
            },
        };

        let adapter = handle.adapter();
        let mut state = StreamState::new();
        let mut calls = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::cancelled()),
                next = tokio::time::timeout(timeout, frames.recv()) => next,
            };
            let events = match next {
                Ok(Some(Ok(frame))) => adapter.parse_event(provider, &frame, &mut state),
                Ok(Some(Err(e))) => state.fail(e),
                Ok(None) => adapter.end_of_stream(&mut state),
                Err(_) => state.fail(upstream_timeout(provider, timeout)),
            };

            for event in events {
                match event {
                    UnifiedStreamEvent::ContentDelta { delta } => {
                        progress.content.push_str(&delta);
                        forward(sink, UnifiedStreamEvent::ContentDelta { delta }).await?;
                    }
                    UnifiedStreamEvent::ReasoningDelta { delta } => {
                        progress.reasoning.push_str(&delta);
                        forward(sink, UnifiedStreamEvent::ReasoningDelta { delta }).await?;
                    }
                    UnifiedStreamEvent::ToolCall { call } => {
                        debug!(tool = %call.name, id = %call.id, "Tool call received");
                        calls.push(call);
                    }
                    UnifiedStreamEvent::Usage { usage } => progress.usage += usage,
                    UnifiedStreamEvent::Error { error } => return Err(error),
                    UnifiedStreamEvent::Done { finish_reason } => {
                        debug!(provider, finish_reason = ?finish_reason, "Upstream round done");
                        return Ok(calls);
                    }
                }
            }
        }
    }

    // ── Completion ───────────────────────────────────────────────────────

    async fn complete(
        &self,
        user_id: &str,
        request: &ChatRequest,
        prepared: PreparedTurn,
        progress: Progress,
    ) -> TurnOutcome {
        let PreparedTurn {
            session_id,
            mut assistant,
            search_results,
            upstream,
            ..
        } = prepared;

        apply_progress(&mut assistant, &progress, MessageStatus::Completed);
        if !search_results.is_empty() {
            assistant.search_results = Some(
                serde_json::from_str(&search_results).unwrap_or(Value::String(search_results)),
            );
        }

        if let Some(sid) = &session_id {
            if let Err(e) = self.storage.update_message(sid, &assistant).await {
                error!(session_id = %sid, error = %e, "Failed to persist completed message");
            }

            if let Some(queue) = &self.post_processing {
                queue.enqueue(PostProcessJob {
                    session_id: sid.clone(),
                    user_id: user_id.to_string(),
                    project_id: request.project_id.clone(),
                    provider: upstream.provider.clone(),
                    model: upstream.model.clone(),
                    messages: request.messages.clone(),
                    final_text: progress.content.clone(),
                });
            }
        }

        info!(
            session_id = session_id.as_deref().unwrap_or("temporary"),
            total_tokens = progress.usage.total_tokens,
            tool_rounds = progress.tool_rounds,
            "Turn completed"
        );
        self.publish(DomainEvent::TurnCompleted {
            session_id: session_id.clone(),
            message_id: assistant.id.clone(),
            usage: progress.usage,
            tool_rounds: progress.tool_rounds,
            timestamp: Utc::now(),
        });

        TurnOutcome {
            session_id,
            message: assistant,
            usage: progress.usage,
            tool_rounds: progress.tool_rounds,
        }
    }

    async fn persist_failure(&self, prepared: &PreparedTurn, progress: &Progress) {
        let Some(sid) = &prepared.session_id else {
            return;
        };
        let mut assistant = prepared.assistant.clone();
        apply_progress(&mut assistant, progress, MessageStatus::Error);
        if let Err(e) = self.storage.update_message(sid, &assistant).await {
            error!(session_id = %sid, error = %e, "Failed to persist errored message");
        }
    }

    async fn report_failure(&self, session_id: Option<String>, error: &ChatError, sink: &TurnSink) {
        if error.kind == ErrorKind::Cancelled {
            info!(session_id = session_id.as_deref().unwrap_or("temporary"), "Turn cancelled");
        } else {
            error!(kind = %error.kind, error = %error.message, "Turn failed");
        }
        self.publish(DomainEvent::TurnFailed {
            session_id,
            kind: error.kind,
            error_message: error.message.clone(),
            timestamp: Utc::now(),
        });
        let _ = sink
            .send(UnifiedStreamEvent::Error {
                error: error.clone(),
            })
            .await;
    }
}

fn upstream_timeout(provider: &str, timeout: Duration) -> ChatError {
    ChatError::timeout(format!("no response from upstream within {}s", timeout.as_secs()))
        .with_provider(provider)
}

async fn forward(sink: &TurnSink, event: UnifiedStreamEvent) -> Result<(), ChatError> {
    sink.send(event).await.map_err(|_| ChatError::cancelled())
}

fn apply_progress(message: &mut Message, progress: &Progress, status: MessageStatus) {
    message.content = progress.content.clone();
    message.reasoning_content = (!progress.reasoning.is_empty()).then(|| progress.reasoning.clone());
    if !progress.usage.is_empty() {
        message.prompt_tokens = Some(progress.usage.prompt_tokens);
        message.completion_tokens = Some(progress.usage.completion_tokens);
        message.total_tokens = Some(progress.usage.total_tokens);
    }
    message.status = status;
}
