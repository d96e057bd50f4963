//! One inbound prompt, end to end: resolve a sandbox, run the agent loop,
//! relay the outcome, compact the history, persist the workspace.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, ConversationState};
use crate::compactor::Compactor;
use crate::config::Settings;
use crate::errors::{AgentError, AgentResult};
use crate::events::EventSender;
use crate::pool::SandboxPool;
use crate::providers::base::Provider;
use crate::tools::WorkspaceTools;

/// Append-only conversation log, written once per human turn and once per
/// final model message. The core never reads it back.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn append_user(&self, project_id: &str, content: &str) -> anyhow::Result<()>;
    async fn append_ai(&self, project_id: &str, content: &str) -> anyhow::Result<()>;
}

/// Log sink for deployments without a persistence backend.
pub struct NullConversationLog;

#[async_trait]
impl ConversationLog for NullConversationLog {
    async fn append_user(&self, _project_id: &str, _content: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn append_ai(&self, _project_id: &str, _content: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What one completed turn hands back to the caller.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Text of the terminal model message
    pub reply: String,
    /// Where the client can view the project's dev server
    pub preview_url: String,
}

type StateSlot = Arc<Mutex<ConversationState>>;

/// In-memory conversation states keyed by (user, project). Injected rather
/// than process-global so instances and tests stay isolated.
#[derive(Default)]
pub struct ConversationStore {
    states: StdMutex<HashMap<String, StateSlot>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: &str, project_id: &str) -> StateSlot {
        let key = format!("{}/{}", user_id, project_id);
        let mut states = self.states.lock().unwrap();
        states
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new())))
            .clone()
    }
}

pub struct SessionManager {
    provider: Arc<dyn Provider>,
    pool: Arc<SandboxPool>,
    log: Arc<dyn ConversationLog>,
    settings: Settings,
    conversations: ConversationStore,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn Provider>,
        pool: Arc<SandboxPool>,
        log: Arc<dyn ConversationLog>,
        settings: Settings,
    ) -> Self {
        Self {
            provider,
            pool,
            log,
            settings,
            conversations: ConversationStore::new(),
        }
    }

    /// Drive one full turn for a user prompt and return the final message
    /// text plus the preview URL. Events stream to `events` as the turn
    /// progresses.
    pub async fn handle_prompt(
        &self,
        user_id: &str,
        project_id: &str,
        prompt: &str,
        events: EventSender,
    ) -> AgentResult<TurnOutcome> {
        let turn_id = Uuid::new_v4();
        info!(user_id, project_id, %turn_id, "turn started");

        let sandbox = self
            .pool
            .acquire(user_id, project_id)
            .await
            .map_err(internal)?;

        let slot = self.conversations.slot(user_id, project_id);
        // Held for the whole turn so two prompts for the same project
        // cannot interleave their histories.
        let mut state = slot.lock().await;

        // Each external invocation gets a fresh failure budget.
        state.reset_failure_budget();
        state.push_user_prompt(prompt);
        if let Err(err) = self.log.append_user(project_id, prompt).await {
            warn!(project_id, %err, "failed to log user message");
        }

        let tools = WorkspaceTools::new(sandbox.clone(), events.clone(), &self.settings);
        let agent = Agent::new(self.provider.clone(), tools, events);
        agent.run(&mut state).await?;

        match sandbox.list_files(&self.settings.workspace_root).await {
            Ok(files) => debug!(project_id, count = files.len(), ?files, "workspace after turn"),
            Err(err) => warn!(project_id, %err, "failed to list workspace"),
        }

        let final_text = state
            .messages
            .last()
            .map(|m| m.text())
            .unwrap_or_default();
        if let Err(err) = self.log.append_ai(project_id, &final_text).await {
            warn!(project_id, %err, "failed to log final message");
        }

        Compactor::new(self.provider.clone()).compact(&mut state).await?;

        self.pool
            .persist(user_id, project_id)
            .await
            .map_err(propagate_pool_error)?;

        info!(user_id, project_id, %turn_id, llm_calls = state.llm_calls, "turn finished");
        Ok(TurnOutcome {
            reply: final_text,
            preview_url: sandbox.preview_url(self.settings.preview_port),
        })
    }
}

fn internal(err: anyhow::Error) -> AgentError {
    AgentError::Internal(err.to_string())
}

/// Keep `NoActiveSandbox` intact across the anyhow boundary so callers can
/// match on it.
fn propagate_pool_error(err: anyhow::Error) -> AgentError {
    match err.downcast::<AgentError>() {
        Ok(agent_err) => agent_err,
        Err(other) => AgentError::Internal(other.to_string()),
    }
}
