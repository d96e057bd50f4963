use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent, Role};
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::ProviderError;

/// Convert internal messages to OpenAI's chat API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        match message.role {
            Role::User => {
                messages_spec.push(json!({
                    "role": "user",
                    "content": message.text(),
                }));
            }
            Role::Assistant => {
                let mut converted = json!({ "role": "assistant" });
                let text = message.text();
                if !text.is_empty() {
                    converted["content"] = json!(text);
                }

                let mut tool_calls = Vec::new();
                for request in message.tool_requests() {
                    if let Ok(call) = &request.tool_call {
                        tool_calls.push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        }));
                    }
                }
                if !tool_calls.is_empty() {
                    converted["tool_calls"] = json!(tool_calls);
                }
                messages_spec.push(converted);
            }
            Role::Tool => {
                for response in message
                    .content
                    .iter()
                    .filter_map(|c| c.as_tool_response())
                {
                    messages_spec.push(json!({
                        "role": "tool",
                        "tool_call_id": response.id,
                        "content": response.content,
                    }));
                }
            }
        }
    }

    messages_spec
}

/// Convert internal tools to OpenAI's function-calling tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

/// Normalize an OpenAI chat completion into an internal assistant message.
///
/// Content arriving as either a plain string or an array of text parts is
/// flattened here so downstream code never branches on wire shape. Malformed
/// tool calls become `Err` tool requests rather than hard failures.
pub fn openai_response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let original = response
        .pointer("/choices/0/message")
        .ok_or_else(|| ProviderError::Response("missing choices[0].message".to_string()))?;

    let mut message = Message::assistant();

    match original.get("content") {
        Some(Value::String(text)) => {
            message = message.with_text(text);
        }
        Some(Value::Array(parts)) => {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    message = message.with_text(text);
                }
            }
        }
        _ => {}
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();

            if !is_valid_function_name(&name) {
                let error = AgentError::InvalidParameters(format!(
                    "invalid characters in function name '{}'",
                    name
                ));
                message = message.with_tool_request(id, Err(error));
            } else {
                match serde_json::from_str::<Value>(arguments) {
                    Ok(args) => {
                        message = message.with_tool_request(id, Ok(ToolCall::new(&name, args)));
                    }
                    Err(e) => {
                        let error = AgentError::InvalidParameters(format!(
                            "could not parse arguments for call {}: {}",
                            id, e
                        ));
                        message = message.with_tool_request(id, Err(error));
                    }
                }
            }
        }
    }

    Ok(message)
}

fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
