//! Outbound events for the live client channel.
//!
//! Sends are best-effort and non-blocking: a missing or closed subscriber
//! never fails a turn. Nothing here is ordered relative to persistence, a
//! client may observe a tool result before the matching database write.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    ToolCall { name: String, args: Value },
    ToolResult { content: String },
    RefreshPreview,
    Ai { content: String },
}

#[derive(Clone)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<ClientEvent>>,
}

impl EventSender {
    /// Create a sender/receiver pair for a connected client.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender with no subscriber. Every send is a no-op.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: ClientEvent) {
        if let Some(tx) = &self.tx {
            // The receiver may have gone away mid-turn, which is fine.
            let _ = tx.send(event);
        }
    }
}
