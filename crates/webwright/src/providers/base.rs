use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Infrastructure failures talking to the model host. These are distinct
/// from validation failures: retrying them is a transport concern, not a
/// content-correctness one.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Malformed response: {0}")]
    Response(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Server(_))
    }
}

/// Base trait for model providers (OpenAI-compatible hosts, mocks)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message for the given exchange. `temperature` of
    /// `None` uses the host default; compaction calls pass `Some(0.0)`.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        temperature: Option<f32>,
    ) -> Result<(Message, Usage), ProviderError>;
}
