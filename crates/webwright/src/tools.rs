//! Workspace tools the model can call: file creation with live compile
//! validation, and shell execution pinned to the project root.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::{AgentError, AgentResult};
use crate::events::{ClientEvent, EventSender};
use crate::guardrails::{check_command, check_file_path};
use crate::models::tool::{Tool, ToolCall};
use crate::sandbox::Sandbox;

/// Fixed string embedded in a tool result to signal a validation failure to
/// the loop's decision logic. Never shown to the end user.
pub const VALIDATION_FAILED_MARKER: &str = "__VALIDATION_FAILED__";

/// Response body fragments that indicate the dev server failed to compile or
/// load the module.
const ERROR_SIGNATURES: &[&str] = &[
    "[plugin:vite",
    "SyntaxError",
    "Unexpected token",
    "Transform failed",
    "Module not found",
    "ReferenceError",
    "TypeError",
];

/// Give the dev server a moment to pick up the write before fetching.
const SETTLE_DELAY: Duration = Duration::from_millis(300);

const ERROR_BODY_LIMIT: usize = 900;

/// The closed set of tools. Parsing a provider `ToolCall` into this enum up
/// front gives exhaustive dispatch instead of a string-keyed lookup that can
/// miss at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCommand {
    CreateFile {
        file_path: String,
        content: String,
    },
    RunShellCommand {
        command: String,
        // Accepted for schema compatibility, always ignored: commands are
        // pinned to the workspace root.
        cwd: Option<String>,
    },
}

impl ToolCommand {
    /// Parse a raw tool call. Missing or empty required arguments produce an
    /// `InvalidParameters` error that names the field and shows a worked
    /// example, so the model can self-correct.
    pub fn parse(call: &ToolCall) -> AgentResult<Self> {
        match call.name.as_str() {
            "create_file" => {
                let file_path = call
                    .arguments
                    .get("filePath")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        AgentError::InvalidParameters(
                            "create_file requires a non-empty 'filePath'. Example: \
                             create_file({\"filePath\": \"src/App.jsx\", \"content\": \
                             \"...full file...\"})"
                                .to_string(),
                        )
                    })?;
                let content = call
                    .arguments
                    .get("content")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        AgentError::InvalidParameters(
                            "create_file requires a 'content' string. Example: \
                             create_file({\"filePath\": \"src/App.jsx\", \"content\": \
                             \"...full file...\"})"
                                .to_string(),
                        )
                    })?;
                Ok(ToolCommand::CreateFile {
                    file_path: file_path.to_string(),
                    content: content.to_string(),
                })
            }
            "run_shell_command" => {
                let command = call
                    .arguments
                    .get("command")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        AgentError::InvalidParameters(
                            "run_shell_command requires a non-empty 'command'. Example: \
                             run_shell_command({\"command\": \"npm install\"})"
                                .to_string(),
                        )
                    })?;
                let cwd = call
                    .arguments
                    .get("cwd")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                Ok(ToolCommand::RunShellCommand {
                    command: command.to_string(),
                    cwd,
                })
            }
            other => Err(AgentError::InvalidParameters(format!(
                "unknown tool '{}'; available tools are create_file and run_shell_command",
                other
            ))),
        }
    }

    /// Tool schemas advertised to the model.
    pub fn schemas() -> Vec<Tool> {
        vec![
            Tool::new(
                "create_file",
                "Creates a file in the project and validates source files against the \
                 running dev server. Use relative paths like 'src/App.jsx'; they are \
                 placed under the project root. Always write the complete file content.",
                json!({
                    "type": "object",
                    "required": ["filePath", "content"],
                    "properties": {
                        "filePath": {
                            "type": "string",
                            "description": "Absolute or relative path to the file"
                        },
                        "content": {
                            "type": "string",
                            "description": "Full text content to write inside the file"
                        }
                    }
                }),
            ),
            Tool::new(
                "run_shell_command",
                "Runs a shell command in the project root, e.g. 'npm install'.",
                json!({
                    "type": "object",
                    "required": ["command"],
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "Shell command to execute"
                        },
                        "cwd": {
                            "type": "string",
                            "description": "Ignored. Commands always run in the project root."
                        }
                    }
                }),
            ),
        ]
    }
}

/// Executes tool commands against one sandbox for the duration of a turn.
pub struct WorkspaceTools {
    sandbox: Arc<dyn Sandbox>,
    events: EventSender,
    http: reqwest::Client,
    workspace_root: String,
    preview_port: u16,
}

impl WorkspaceTools {
    pub fn new(sandbox: Arc<dyn Sandbox>, events: EventSender, settings: &Settings) -> Self {
        Self {
            sandbox,
            events,
            http: reqwest::Client::new(),
            workspace_root: settings.workspace_root.trim_end_matches('/').to_string(),
            preview_port: settings.preview_port,
        }
    }

    pub fn schemas(&self) -> Vec<Tool> {
        ToolCommand::schemas()
    }

    /// Parse and execute one tool call, returning the text to place in the
    /// resulting tool message.
    pub async fn dispatch(&self, call: &ToolCall) -> AgentResult<String> {
        match ToolCommand::parse(call)? {
            ToolCommand::CreateFile { file_path, content } => {
                self.create_file(&file_path, &content).await
            }
            ToolCommand::RunShellCommand { command, cwd } => {
                if let Some(cwd) = cwd {
                    debug!(%cwd, "ignoring caller-suggested cwd");
                }
                self.run_shell_command(&command).await
            }
        }
    }

    /// Rebase any incoming path onto the workspace root.
    fn resolve_path(&self, file_path: &str) -> String {
        let root = &self.workspace_root;
        if file_path.starts_with(&format!("{}/", root)) {
            file_path.to_string()
        } else if let Some(stripped) = file_path.strip_prefix('/') {
            format!("{}/{}", root, stripped)
        } else {
            format!("{}/{}", root, file_path)
        }
    }

    async fn create_file(&self, file_path: &str, content: &str) -> AgentResult<String> {
        check_file_path(file_path)?;

        if content.trim().is_empty() {
            return Ok(format!(
                "create_file received empty 'content' for {}. The file was not written. \
                 Call create_file again with the complete file content.\n{}",
                file_path, VALIDATION_FAILED_MARKER
            ));
        }

        let full_path = self.resolve_path(file_path);

        if let Some((parent, _)) = full_path.rsplit_once('/') {
            self.sandbox
                .run_command(&format!("mkdir -p {}", parent), &self.workspace_root)
                .await
                .map_err(|e| AgentError::ExecutionError(e.to_string()))?;
        }

        // The file lands on disk regardless of validation outcome. On a
        // failed validation the model must overwrite the same path.
        self.sandbox
            .write_file(&full_path, content)
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;
        info!(path = %full_path, "file written");

        let needs_validation = file_path.ends_with(".js") || file_path.ends_with(".jsx");
        if needs_validation {
            if let Some(body) = self.validate_module(&full_path).await {
                warn!(path = %full_path, "dev server failed to compile module");
                return Ok(format!(
                    "COMPILATION ERROR for: {}\n\n{}\n\nYour code (with errors):\n```\n{}\n```\n\n\
                     ACTION REQUIRED: call create_file again with the corrected code for {}.\n{}",
                    file_path,
                    body,
                    content,
                    file_path,
                    VALIDATION_FAILED_MARKER
                ));
            }
            debug!(path = %full_path, "module compiled cleanly");
        }

        self.events.send(ClientEvent::RefreshPreview);
        Ok(format!("File created successfully at {}", file_path))
    }

    /// Fetch the just-written module through the dev server and look for
    /// compiler error signatures. Returns the offending body on failure.
    async fn validate_module(&self, full_path: &str) -> Option<String> {
        tokio::time::sleep(SETTLE_DELAY).await;

        let rel_path = full_path
            .strip_prefix(&format!("{}/", self.workspace_root))
            .unwrap_or(full_path);
        let base = self.sandbox.preview_url(self.preview_port);
        let module_url = format!(
            "{}/{}?t={}",
            base.trim_end_matches('/'),
            rel_path,
            Utc::now().timestamp_millis()
        );
        debug!(%module_url, "fetching module for validation");

        let response = match self.http.get(&module_url).send().await {
            Ok(response) => response,
            // An unreachable dev server is treated as a failed validation,
            // not an infrastructure error: the model gets a chance to retry.
            Err(err) => return Some(err.to_string()),
        };

        let ok_status = response.status().is_success();
        let body = response.text().await.unwrap_or_default();
        let error_detected =
            !ok_status || ERROR_SIGNATURES.iter().any(|sig| body.contains(sig));

        if error_detected {
            let truncated: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            Some(truncated)
        } else {
            None
        }
    }

    async fn run_shell_command(&self, command: &str) -> AgentResult<String> {
        check_command(command)?;

        let output = self
            .sandbox
            .run_command(command, &self.workspace_root)
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;
        debug!(%command, stdout = %output.stdout, stderr = %output.stderr, "command finished");

        Ok(format!(
            "Running: \"{}\" in {}",
            command, self.workspace_root
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::MockSandbox;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tools_with(sandbox: Arc<MockSandbox>) -> (WorkspaceTools, tokio::sync::mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = EventSender::channel();
        let tools = WorkspaceTools::new(sandbox, events, &Settings::default());
        (tools, rx)
    }

    #[test]
    fn test_parse_missing_file_path() {
        let call = ToolCall::new("create_file", json!({"content": "x"}));
        let err = ToolCommand::parse(&call).unwrap_err();
        match err {
            AgentError::InvalidParameters(msg) => assert!(msg.contains("filePath")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_unknown_tool() {
        let call = ToolCall::new("delete_everything", json!({}));
        assert!(ToolCommand::parse(&call).is_err());
    }

    #[test]
    fn test_parse_shell_command() {
        let call = ToolCall::new(
            "run_shell_command",
            json!({"command": "npm install", "cwd": "/tmp"}),
        );
        let parsed = ToolCommand::parse(&call).unwrap();
        assert_eq!(
            parsed,
            ToolCommand::RunShellCommand {
                command: "npm install".to_string(),
                cwd: Some("/tmp".to_string()),
            }
        );
    }

    #[test]
    fn test_path_normalization_equivalence() {
        let sandbox = Arc::new(MockSandbox::new());
        let (tools, _rx) = tools_with(sandbox);

        let expected = "/home/user/src/App.jsx";
        assert_eq!(tools.resolve_path("src/App.jsx"), expected);
        assert_eq!(tools.resolve_path("/src/App.jsx"), expected);
        assert_eq!(tools.resolve_path("/home/user/src/App.jsx"), expected);
    }

    #[tokio::test]
    async fn test_create_non_code_file_skips_validation() {
        let sandbox = Arc::new(MockSandbox::new());
        let (tools, mut rx) = tools_with(sandbox.clone());

        let result = tools
            .dispatch(&ToolCall::new(
                "create_file",
                json!({"filePath": "src/App.css", "content": "body { margin: 0; }"}),
            ))
            .await
            .unwrap();

        assert!(result.contains("File created successfully"));
        assert_eq!(
            sandbox.file("/home/user/src/App.css").as_deref(),
            Some("body { margin: 0; }")
        );
        // Parent dir was ensured
        assert!(sandbox
            .commands()
            .iter()
            .any(|c| c == "mkdir -p /home/user/src"));
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::RefreshPreview);
    }

    #[tokio::test]
    async fn test_create_file_empty_content_is_soft_error() {
        let sandbox = Arc::new(MockSandbox::new());
        let (tools, _rx) = tools_with(sandbox.clone());

        let result = tools
            .dispatch(&ToolCall::new(
                "create_file",
                json!({"filePath": "src/App.jsx", "content": "   "}),
            ))
            .await
            .unwrap();

        assert!(result.contains(VALIDATION_FAILED_MARKER));
        assert!(sandbox.file("/home/user/src/App.jsx").is_none());
    }

    #[tokio::test]
    async fn test_create_file_guardrail_rejection() {
        let sandbox = Arc::new(MockSandbox::new());
        let (tools, _rx) = tools_with(sandbox);

        let err = tools
            .dispatch(&ToolCall::new(
                "create_file",
                json!({"filePath": "../../etc/passwd", "content": "x"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::PathRejected(_)));
    }

    #[tokio::test]
    async fn test_create_code_file_validation_passes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("export default {}"))
            .mount(&server)
            .await;

        let sandbox = Arc::new(MockSandbox::new());
        sandbox.set_preview_base(server.uri());
        let (tools, mut rx) = tools_with(sandbox.clone());

        let result = tools
            .dispatch(&ToolCall::new(
                "create_file",
                json!({"filePath": "src/App.jsx", "content": "export default function App() {}"}),
            ))
            .await
            .unwrap();

        assert!(result.contains("File created successfully"));
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::RefreshPreview);
    }

    #[tokio::test]
    async fn test_create_code_file_validation_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("SyntaxError: Unexpected token (3:14)"),
            )
            .mount(&server)
            .await;

        let sandbox = Arc::new(MockSandbox::new());
        sandbox.set_preview_base(server.uri());
        let (tools, mut rx) = tools_with(sandbox.clone());

        let result = tools
            .dispatch(&ToolCall::new(
                "create_file",
                json!({"filePath": "src/App.jsx", "content": "export default function App( {}"}),
            ))
            .await
            .unwrap();

        assert!(result.contains(VALIDATION_FAILED_MARKER));
        assert!(result.contains("SyntaxError"));
        assert!(result.contains("src/App.jsx"));
        // The file is on disk even though validation failed
        assert!(sandbox.file("/home/user/src/App.jsx").is_some());
        // No refresh for a broken module
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_validation_failure_on_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let sandbox = Arc::new(MockSandbox::new());
        sandbox.set_preview_base(server.uri());
        let (tools, _rx) = tools_with(sandbox);

        let result = tools
            .dispatch(&ToolCall::new(
                "create_file",
                json!({"filePath": "src/App.js", "content": "whatever"}),
            ))
            .await
            .unwrap();
        assert!(result.contains(VALIDATION_FAILED_MARKER));
    }

    #[tokio::test]
    async fn test_run_shell_command_pins_workspace_root() {
        let sandbox = Arc::new(MockSandbox::new());
        let (tools, _rx) = tools_with(sandbox.clone());

        let result = tools
            .dispatch(&ToolCall::new(
                "run_shell_command",
                json!({"command": "npm install", "cwd": "/etc"}),
            ))
            .await
            .unwrap();

        assert_eq!(result, "Running: \"npm install\" in /home/user");
        assert_eq!(sandbox.commands(), vec!["npm install".to_string()]);
    }

    #[tokio::test]
    async fn test_shell_command_only_lead_token_is_checked() {
        // Only the destructive-command denylist applies here; words that
        // happen to match the text denylist ("format") pass through.
        let sandbox = Arc::new(MockSandbox::new());
        let (tools, _rx) = tools_with(sandbox.clone());

        let result = tools
            .dispatch(&ToolCall::new(
                "run_shell_command",
                json!({"command": "npm run format"}),
            ))
            .await
            .unwrap();

        assert_eq!(result, "Running: \"npm run format\" in /home/user");
        assert_eq!(sandbox.commands(), vec!["npm run format".to_string()]);
    }

    #[tokio::test]
    async fn test_run_shell_command_guardrail() {
        let sandbox = Arc::new(MockSandbox::new());
        let (tools, _rx) = tools_with(sandbox);

        let err = tools
            .dispatch(&ToolCall::new(
                "run_shell_command",
                json!({"command": "rm -rf /"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::CommandRejected(_)));
    }
}
