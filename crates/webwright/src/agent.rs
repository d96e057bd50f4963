//! The turn-taking orchestrator. One call to [`Agent::run`] drives a full
//! turn: model call, tool dispatch, validation tracking, and the final
//! wrap-up message.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{AgentError, AgentResult};
use crate::events::{ClientEvent, EventSender};
use crate::models::message::{Message, Role};
use crate::models::tool::Tool;
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Provider;
use crate::tools::{WorkspaceTools, VALIDATION_FAILED_MARKER};

/// Stop burning model spend on an edit that keeps failing validation.
pub const MAX_VALIDATION_FAILURES: u32 = 3;

/// A separate budget for a different failure mode: the model returning
/// nothing productive at all.
pub const MAX_EMPTY_REPLIES: u32 = 4;

const PROVIDER_RETRIES: u32 = 3;
const PROVIDER_BACKOFF: Duration = Duration::from_millis(500);

/// Shown verbatim when the validation cap is reached. Never exposes the
/// sentinel marker or raw errors to the user.
pub const FAILURE_APOLOGY: &str = "I apologize, but I ran into repeated errors while \
    working on your request and was unable to complete it. Please try again, ideally \
    with a simpler or more specific request.";

const WRAPUP_INSTRUCTION: &str = "Summarize in plain language what you just \
    accomplished for the user. Do not call any tools.";

const WRAPUP_INSTRUCTION_FOLLOW_UP: &str = "The user is following up on earlier work \
    (see the context summary in your instructions). Summarize in plain language what \
    you just accomplished in this latest round. Do not call any tools.";

const WRAPUP_FALLBACK: &str = "I've completed the requested changes.";

/// Mutable per-(user, project) record the loop operates on.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    /// Insertion order is causal order; never reordered.
    pub messages: Vec<Message>,
    /// Incremented once per model invocation, persists across turns.
    pub llm_calls: u32,
    /// Incremented per tool result carrying the validation sentinel. Callers
    /// that want a fresh budget reset it before invoking the loop.
    pub validation_failures: u32,
    /// Present once compaction has occurred; injected into every subsequent
    /// system prompt.
    pub summary: Option<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user_prompt(&mut self, prompt: &str) {
        self.messages.push(Message::user().with_text(prompt));
    }

    pub fn reset_failure_budget(&mut self) {
        self.validation_failures = 0;
    }

    /// Whether a tool message among the last two messages reported a
    /// validation failure. The window is the message tail, not the tool
    /// history: one model reply after the failure ages it out, so the
    /// forced retry fires at most once per failing tool result.
    fn recent_validation_failure(&self) -> bool {
        let tail = self.messages.len().saturating_sub(2);
        self.messages[tail..]
            .iter()
            .any(|m| m.role == Role::Tool && m.tool_response_text().contains(VALIDATION_FAILED_MARKER))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    End,
    Finalize,
    RetryModel,
    ExecuteTools,
}

/// Transition decision, evaluated after every model call. Rules are ordered;
/// the first that applies wins.
fn decide(state: &ConversationState) -> Decision {
    let last = match state.messages.last() {
        Some(message) if message.role == Role::Assistant => message,
        _ => return Decision::End,
    };
    if state.validation_failures >= MAX_VALIDATION_FAILURES {
        return Decision::Finalize;
    }
    // The model saw a compile error but produced no actionable follow-up.
    if state.recent_validation_failure() && !last.has_tool_requests() {
        return Decision::RetryModel;
    }
    if last.has_tool_requests() {
        return Decision::ExecuteTools;
    }
    if last.text().trim().is_empty() && state.llm_calls < MAX_EMPTY_REPLIES {
        return Decision::RetryModel;
    }
    Decision::Finalize
}

#[derive(Serialize)]
struct SystemPromptContext<'a> {
    summary: Option<&'a str>,
}

pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: WorkspaceTools,
    events: EventSender,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, tools: WorkspaceTools, events: EventSender) -> Self {
        Self {
            provider,
            tools,
            events,
        }
    }

    /// Run one turn to completion. The caller has already appended the
    /// user's prompt to `state.messages`.
    pub async fn run(&self, state: &mut ConversationState) -> AgentResult<()> {
        let system = self.system_prompt(state)?;
        let tool_schemas = self.tools.schemas();

        loop {
            let reply = self
                .call_model(&system, &state.messages, &tool_schemas, None)
                .await?;
            state.llm_calls += 1;
            state.messages.push(reply);

            match decide(state) {
                Decision::End => return Ok(()),
                Decision::RetryModel => {
                    debug!("model reply was not actionable, calling again");
                }
                Decision::ExecuteTools => self.execute_tools(state).await?,
                Decision::Finalize => {
                    self.finalize(state, &system).await?;
                    return Ok(());
                }
            }
        }
    }

    fn system_prompt(&self, state: &ConversationState) -> AgentResult<String> {
        let context = SystemPromptContext {
            summary: state.summary.as_deref(),
        };
        load_prompt_file("system.md", &context)
            .map_err(|e| AgentError::Internal(format!("failed to render system prompt: {}", e)))
    }

    /// Dispatch every tool call in the latest model message, in emission
    /// order. Tool calls mutate shared filesystem state, so they run
    /// sequentially, never concurrently.
    async fn execute_tools(&self, state: &mut ConversationState) -> AgentResult<()> {
        let requests: Vec<_> = state
            .messages
            .last()
            .map(|m| m.tool_requests().into_iter().cloned().collect())
            .unwrap_or_default();

        for request in requests {
            let (name, content) = match &request.tool_call {
                Ok(call) => {
                    self.events.send(ClientEvent::ToolCall {
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                    });
                    let content = match self.tools.dispatch(call).await {
                        Ok(text) => text,
                        Err(err) => Self::tool_failure_text(err)?,
                    };
                    (call.name.clone(), content)
                }
                // The provider handed us a call we could not even parse.
                Err(err) => (
                    "unknown".to_string(),
                    format!("{}\n{}", err, VALIDATION_FAILED_MARKER),
                ),
            };

            if content.contains(VALIDATION_FAILED_MARKER) {
                state.validation_failures += 1;
            }
            self.events.send(ClientEvent::ToolResult {
                content: content.clone(),
            });
            state
                .messages
                .push(Message::tool_response(&request.id, name, content));
        }
        Ok(())
    }

    /// Recoverable tool failures become tool-message text that keeps the
    /// conversation alive; infrastructure failures cross the loop boundary.
    fn tool_failure_text(err: AgentError) -> AgentResult<String> {
        match err {
            AgentError::InvalidParameters(_) => {
                Ok(format!("{}\n{}", err, VALIDATION_FAILED_MARKER))
            }
            AgentError::PathRejected(_)
            | AgentError::CommandRejected(_)
            | AgentError::UnsafeContent(_) => Ok(err.to_string()),
            other => Err(other),
        }
    }

    async fn finalize(&self, state: &mut ConversationState, system: &str) -> AgentResult<()> {
        let final_message = if state.validation_failures >= MAX_VALIDATION_FAILURES {
            warn!(
                failures = state.validation_failures,
                "validation cap reached, ending turn without a model call"
            );
            Message::assistant().with_text(FAILURE_APOLOGY)
        } else {
            let instruction = if state.summary.is_some() {
                WRAPUP_INSTRUCTION_FOLLOW_UP
            } else {
                WRAPUP_INSTRUCTION
            };
            // The instruction rides on a scratch copy so it never lands in
            // the durable history.
            let mut exchange = state.messages.clone();
            exchange.push(Message::user().with_text(instruction));

            let reply = self.call_model(system, &exchange, &[], None).await?;
            state.llm_calls += 1;

            let text = reply.text();
            let text = if text.trim().is_empty() {
                WRAPUP_FALLBACK.to_string()
            } else {
                text
            };
            Message::assistant().with_text(text)
        };

        self.events.send(ClientEvent::Ai {
            content: final_message.text(),
        });
        state.messages.push(final_message);
        Ok(())
    }

    /// One provider call with backoff on transient transport failures.
    async fn call_model(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        temperature: Option<f32>,
    ) -> AgentResult<Message> {
        let mut attempt = 0;
        loop {
            match self
                .provider
                .complete(system, messages, tools, temperature)
                .await
            {
                Ok((message, usage)) => {
                    debug!(
                        input_tokens = ?usage.input_tokens,
                        output_tokens = ?usage.output_tokens,
                        "model call completed"
                    );
                    return Ok(message);
                }
                Err(err) if err.is_retryable() && attempt + 1 < PROVIDER_RETRIES => {
                    attempt += 1;
                    warn!(error = %err, attempt, "transient provider failure, backing off");
                    tokio::time::sleep(PROVIDER_BACKOFF * attempt).await;
                }
                Err(err) => return Err(AgentError::Internal(err.to_string())),
            }
        }
    }
}
