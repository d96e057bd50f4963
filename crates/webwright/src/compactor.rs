//! Collapses a long message history into a dense hand-off summary plus the
//! latest user request, bounding prompt size across turns.

use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::ConversationState;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, Role};
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Provider;

/// Histories shorter than this are left alone.
pub const COMPACTION_THRESHOLD: usize = 4;

pub struct Compactor {
    provider: Arc<dyn Provider>,
}

impl Compactor {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Compact the state in place if it has grown past the threshold.
    /// Returns whether compaction happened. Everything before the compaction
    /// point is afterwards only visible through `state.summary`.
    pub async fn compact(&self, state: &mut ConversationState) -> AgentResult<bool> {
        if state.messages.len() < COMPACTION_THRESHOLD {
            return Ok(false);
        }

        let last_request = match latest_user_text(&state.messages) {
            Some(text) => text,
            None => {
                warn!("no human message found, skipping compaction");
                return Ok(false);
            }
        };

        let system = load_prompt_file("summarizer.md", &serde_json::json!({}))
            .map_err(|e| AgentError::Internal(format!("failed to render summarizer prompt: {}", e)))?;
        let transcript = render_transcript(&state.messages);
        let exchange = vec![Message::user().with_text(transcript)];

        // Temperature 0: the summary must be deterministic and literal.
        let summary = match self
            .provider
            .complete(&system, &exchange, &[], Some(0.0))
            .await
        {
            Ok((reply, _usage)) => reply.text(),
            Err(err) => {
                // Leave the history intact; the next turn gets another shot.
                warn!(error = %err, "compaction call failed, keeping full history");
                return Ok(false);
            }
        };
        if summary.trim().is_empty() {
            warn!("compaction produced an empty summary, keeping full history");
            return Ok(false);
        }

        info!(
            dropped = state.messages.len(),
            "history compacted to summary plus latest request"
        );
        state.summary = Some(summary);
        state.messages = vec![Message::user().with_text(last_request)];
        Ok(true)
    }
}

fn latest_user_text(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User && !m.text().trim().is_empty())
        .map(|m| m.text())
}

/// Flatten the full history, including tool-call names and arguments, into
/// one transcript the summarizer can read top to bottom.
fn render_transcript(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for message in messages {
        match message.role {
            Role::User => lines.push(format!("Human: {}", message.text())),
            Role::Assistant => {
                let text = message.text();
                if !text.trim().is_empty() {
                    lines.push(format!("AI: {}", text));
                }
                for request in message.tool_requests() {
                    match &request.tool_call {
                        Ok(call) => {
                            lines.push(format!("AI tool call: {}({})", call.name, call.arguments))
                        }
                        Err(err) => lines.push(format!("AI tool call (malformed): {}", err)),
                    }
                }
            }
            Role::Tool => {
                for part in &message.content {
                    if let Some(response) = part.as_tool_response() {
                        lines.push(format!("Tool ({}): {}", response.name, response.content));
                    }
                }
            }
        }
    }
    lines.join("\n")
}
