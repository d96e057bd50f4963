use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::base::{Provider, ProviderError, Usage};
use super::utils::{messages_to_openai_spec, openai_response_to_message, tools_to_openai_spec};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn from_env(model: &str) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY must be set"))?;
        let host = std::env::var("OPENAI_HOST")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());

        Self::new(OpenAiProviderConfig {
            host,
            api_key,
            model: model.to_string(),
        })
    }

    fn get_usage(data: &Value) -> Usage {
        let usage = &data["usage"];
        let input_tokens = usage["prompt_tokens"].as_i64().map(|v| v as i32);
        let output_tokens = usage["completion_tokens"].as_i64().map(|v| v as i32);
        let total_tokens = usage["total_tokens"]
            .as_i64()
            .map(|v| v as i32)
            .or_else(|| match (input_tokens, output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    async fn post(&self, payload: Value) -> Result<Value, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Server(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| ProviderError::Response(e.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(ProviderError::RateLimited(response.status().to_string()))
            }
            status if status.as_u16() >= 500 => Err(ProviderError::Server(status.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Request(format!("{}: {}", status, body)))
            }
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        temperature: Option<f32>,
    ) -> Result<(Message, Usage), ProviderError> {
        let mut messages_array = vec![json!({
            "role": "system",
            "content": system,
        })];
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array,
        });
        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(tools));
        }
        if let Some(temperature) = temperature {
            payload["temperature"] = json!(temperature);
        }

        let response = self.post(payload).await?;
        let message = openai_response_to_message(&response)?;
        let usage = Self::get_usage(&response);

        Ok((message, usage))
    }
}
