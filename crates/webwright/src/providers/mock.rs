use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Provider, ProviderError, Usage};

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Message>>>,
    calls: Arc<Mutex<Vec<Option<f32>>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of completions requested so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Temperatures passed to each completion, in call order
    pub fn temperatures(&self) -> Vec<Option<f32>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[Tool],
        temperature: Option<f32>,
    ) -> Result<(Message, Usage), ProviderError> {
        self.calls.lock().unwrap().push(temperature);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Return an empty response if no more pre-configured responses
            Ok((Message::assistant().with_text(""), Usage::default()))
        } else {
            Ok((responses.remove(0), Usage::default()))
        }
    }
}

/// A provider that always fails, for exercising retry paths
pub struct FailingProvider {
    error: fn() -> ProviderError,
    calls: Arc<Mutex<usize>>,
}

impl FailingProvider {
    pub fn new(error: fn() -> ProviderError) -> Self {
        Self {
            error,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Provider for FailingProvider {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[Tool],
        _temperature: Option<f32>,
    ) -> Result<(Message, Usage), ProviderError> {
        *self.calls.lock().unwrap() += 1;
        Err((self.error)())
    }
}
