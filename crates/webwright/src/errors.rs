use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("File path rejected: {0}")]
    PathRejected(String),

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Unsafe content: {0}")]
    UnsafeContent(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("No active sandbox for user: {0}")]
    NoActiveSandbox(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
