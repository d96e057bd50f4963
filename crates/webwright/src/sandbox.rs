//! Contracts for the remote execution environment and its workspace archive.
//!
//! The pool manager and the tools only ever talk to these traits. Concrete
//! implementations (an E2B-style sandbox service, an S3-backed archive) live
//! with the deployment, not in this crate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub mod mock;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One remote execution environment with a project workspace and a running
/// dev server.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Write a file inside the sandbox, creating it if absent.
    async fn write_file(&self, path: &str, contents: &str) -> Result<()>;

    /// Run a shell command inside the sandbox.
    async fn run_command(&self, command: &str, cwd: &str) -> Result<CommandOutput>;

    /// List the file paths under a directory.
    async fn list_files(&self, path: &str) -> Result<Vec<String>>;

    /// Base URL (scheme included) of the dev server bound to `port`.
    fn preview_url(&self, port: u16) -> String;
}

/// Creates sandboxes from a base image template.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(&self, template: &str, idle_timeout: Duration) -> Result<Arc<dyn Sandbox>>;
}

/// Identifies one archived workspace in the archive store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    pub user_id: String,
    pub project_id: String,
}

impl ArchiveKey {
    pub fn new<U: Into<String>, P: Into<String>>(user_id: U, project_id: P) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
        }
    }

    /// Object path inside the archive store
    pub fn object_path(&self) -> String {
        format!("{}/{}/project.zip", self.user_id, self.project_id)
    }
}

/// Round-trips a workspace as a single compressed archive, excluding
/// dependency, build and cache directories.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Pack the workspace and upload it under `key`. Returns false when the
    /// workspace held nothing worth archiving.
    async fn archive(&self, sandbox: &dyn Sandbox, key: &ArchiveKey) -> Result<bool>;

    /// Restore the archive stored under `key` into the workspace. Returns
    /// false when no archive exists for the key.
    async fn restore(&self, sandbox: &dyn Sandbox, key: &ArchiveKey) -> Result<bool>;
}
