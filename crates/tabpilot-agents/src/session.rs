use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::StreamExt;
use serde_json::{Value, json};
use tabpilot_common::{
    Error, Message, Result, SessionChunkPayload, SessionDonePayload, SessionErrorPayload,
    SessionToolResultPayload, SessionToolUsePayload,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::logging::SessionLogger;
use crate::outbound::Outbound;
use crate::providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart,
    StreamEvent,
};
use crate::pruning::{MAX_CONVERSATION_CHARS, prune_conversation};
use crate::tools::{ToolContext, ToolRegistry, ToolResult};

pub const DEFAULT_MODEL: &str = "claude-opus-4-6";
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub max_tokens: u32,
    pub max_conversation_chars: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_conversation_chars: MAX_CONVERSATION_CHARS,
        }
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct AgentContext {
    pub provider: Arc<dyn LlmProvider>,
    pub tools: Arc<ToolRegistry>,
    pub outbound: Arc<dyn Outbound>,
    pub settings: AgentSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    Done,
    Cancelled,
}

/// An accepted user turn. Registered with its session before it runs so a cancel that
/// arrives while it is still queued is honoured.
pub struct Turn {
    run_id: u64,
    token: CancellationToken,
}

/// One conversation with the assistant, scoped to a site.
pub struct Session {
    id: String,
    domain: String,
    url: String,
    system_prompt: String,
    context: AgentContext,
    logger: SessionLogger,
    conversation: tokio::sync::Mutex<Vec<ChatMessage>>,
    turns: Mutex<Vec<Turn>>,
    next_run: AtomicU64,
    last_active: Mutex<Instant>,
}

impl Session {
    pub fn new(
        id: String,
        domain: String,
        url: String,
        system_prompt: String,
        context: AgentContext,
        logger: SessionLogger,
    ) -> Self {
        Self {
            id,
            domain,
            url,
            system_prompt,
            context,
            logger,
            conversation: tokio::sync::Mutex::new(Vec::new()),
            turns: Mutex::new(Vec::new()),
            next_run: AtomicU64::new(0),
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn is_busy(&self) -> bool {
        !self.turns().is_empty()
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the conversation. Waits for a running turn to finish.
    pub async fn conversation(&self) -> Vec<ChatMessage> {
        self.conversation.lock().await.clone()
    }

    fn turns(&self) -> MutexGuard<'_, Vec<Turn>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn send(&self, message: Message) {
        self.context.outbound.send(message);
    }

    /// Abort the running turn and any queued behind it. Emits neither `done` nor `error`.
    pub fn cancel(&self) {
        self.logger.session_cancelled();
        for turn in self.turns().drain(..) {
            info!(session = %self.id, "cancelling turn {}", turn.run_id);
            turn.token.cancel();
        }
    }

    /// Accept a user turn. Must be called before the turn is handed to a task.
    pub fn begin_turn(&self) -> Turn {
        let token = CancellationToken::new();
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        self.turns().push(Turn {
            run_id,
            token: token.clone(),
        });
        Turn { run_id, token }
    }

    /// Run one accepted turn to completion. Turns run one at a time in acceptance order.
    /// A turn cancelled while queued still records the user text.
    pub async fn handle_user_message(&self, turn: Turn, content: &str) {
        self.touch();
        let mut conversation = self.conversation.lock().await;

        push_user_text(&mut conversation, content);
        self.logger.user_message(content);

        let outcome = self.run_agent_loop(&mut conversation, &turn.token).await;

        self.turns().retain(|t| t.run_id != turn.run_id);
        self.touch();

        match outcome {
            Ok(TurnOutcome::Done) => {}
            Ok(TurnOutcome::Cancelled) => {
                debug!(session = %self.id, "agent loop aborted");
                self.logger.debug("agent_loop_aborted", None);
            }
            Err(e) => {
                let message = e.to_string();
                error!(session = %self.id, "agent loop failed: {message}");
                self.logger.session_error(&message, Some(&format!("{e:?}")));
                self.send(Message::new(
                    &self.id,
                    &SessionErrorPayload {
                        error: message,
                        code: None,
                    },
                ));
            }
        }
    }

    async fn run_agent_loop(
        &self,
        conversation: &mut Vec<ChatMessage>,
        token: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let settings = &self.context.settings;
        let tools = self.context.tools.definitions();
        let tool_context = ToolContext {
            session_id: self.id.clone(),
        };
        let mut turn = 0usize;

        loop {
            if token.is_cancelled() {
                return Ok(TurnOutcome::Cancelled);
            }

            let report = prune_conversation(conversation, settings.max_conversation_chars);
            if report.changed() {
                info!(
                    session = %self.id,
                    removed = report.removed_messages,
                    images = report.images_demoted,
                    "pruned conversation from {} to {} chars",
                    report.chars_before,
                    report.chars_after
                );
                self.logger.conversation_pruned(&report);
            }

            info!(
                session = %self.id,
                "sending {} messages (~{}tok est)",
                conversation.len(),
                report.chars_after / 4
            );
            self.logger.api_request(
                &settings.model,
                settings.max_tokens,
                conversation.len(),
                report.chars_after,
                tools.len(),
            );

            let request = LlmRequest {
                model: settings.model.clone(),
                messages: conversation.clone(),
                system: Some(self.system_prompt.clone()),
                max_tokens: Some(settings.max_tokens),
                tools: tools.clone(),
            };

            let started = Instant::now();
            let (response, full_text) = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(TurnOutcome::Cancelled),
                streamed = self.stream_completion(&request) => streamed?,
            };

            let usage = response.usage.unwrap_or_default();
            self.logger.api_response(
                &response.model,
                response.stop_reason.as_deref(),
                usage.input_tokens,
                usage.output_tokens,
                started.elapsed().as_millis() as u64,
            );

            let tool_uses: Vec<(String, String, Value)> = response
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            let block_count = response.content.len();
            if !response.content.is_empty() {
                conversation.push(ChatMessage::assistant(response.content));
            }
            self.logger.agent_response(&full_text, block_count);

            if tool_uses.is_empty() {
                self.send(Message::new(&self.id, &SessionDonePayload { full_text }));
                self.logger.debug(
                    "turn_complete",
                    Some(json!({ "turn": turn, "reason": "no_tool_use" })),
                );
                return Ok(TurnOutcome::Done);
            }

            let mut results = Vec::with_capacity(tool_uses.len());
            for (tool_id, tool_name, input) in tool_uses {
                if token.is_cancelled() {
                    results.push(ToolResult::error(&tool_id, "Cancelled").into_block());
                    continue;
                }

                self.logger.tool_call(&tool_id, &tool_name, &input);
                self.send(Message::new(
                    &self.id,
                    &SessionToolUsePayload {
                        tool_name: tool_name.clone(),
                        tool_id: tool_id.clone(),
                        input: input.clone(),
                    },
                ));

                let started = Instant::now();
                let executed = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    result = self.context.tools.execute(&tool_context, &tool_id, &tool_name, input) => Some(result),
                };
                let Some(result) = executed else {
                    results.push(ToolResult::error(&tool_id, "Cancelled").into_block());
                    continue;
                };

                self.logger.tool_result(
                    &tool_id,
                    &tool_name,
                    &result.output,
                    result.is_error,
                    started.elapsed().as_millis() as u64,
                    result.offloaded,
                );
                self.send(Message::new(
                    &self.id,
                    &SessionToolResultPayload {
                        tool_id: tool_id.clone(),
                        output: result.output.clone(),
                        is_error: result.is_error,
                    },
                ));
                results.push(result.into_block());
            }

            conversation.push(ChatMessage::tool_results(results));
            turn += 1;
        }
    }

    /// Forward text deltas as chunks and return the final response with the streamed text.
    async fn stream_completion(&self, request: &LlmRequest) -> Result<(LlmResponse, String)> {
        let mut stream = self.context.provider.stream(request).await?;
        let mut full_text = String::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta(delta) => {
                    full_text.push_str(&delta);
                    self.send(Message::new(&self.id, &SessionChunkPayload { delta }));
                }
                StreamEvent::Completed(response) => return Ok((response, full_text)),
            }
        }

        Err(Error::Agent(
            "completion stream ended without a final message".to_string(),
        ))
    }
}

/// Append a user turn, merging into a trailing user turn left by an aborted loop.
fn push_user_text(conversation: &mut Vec<ChatMessage>, content: &str) {
    if let Some(last) = conversation.last_mut() {
        if last.role == ChatRole::User {
            match &mut last.content {
                MessagePart::Text(text) => {
                    text.push_str("\n\n");
                    text.push_str(content);
                }
                MessagePart::Parts(blocks) => blocks.push(ContentBlock::Text {
                    text: content.to_string(),
                }),
            }
            return;
        }
    }
    conversation.push(ChatMessage::user(content));
}
