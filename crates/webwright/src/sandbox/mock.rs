//! In-memory fakes for the sandbox contracts, used across unit and
//! integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{ArchiveKey, ArchiveStore, CommandOutput, Sandbox, SandboxFactory};

/// A sandbox backed by an in-memory file map that records every command.
#[derive(Default)]
pub struct MockSandbox {
    files: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<String>>,
    preview_base: Mutex<String>,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point preview validation at an arbitrary base URL (e.g. a wiremock server).
    pub fn set_preview_base<S: Into<String>>(&self, base: S) {
        *self.preview_base.lock().unwrap() = base.into();
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_string());
        Ok(())
    }

    async fn run_command(&self, command: &str, _cwd: &str) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(path))
            .cloned()
            .collect())
    }

    fn preview_url(&self, port: u16) -> String {
        let base = self.preview_base.lock().unwrap().clone();
        if base.is_empty() {
            format!("http://localhost:{}", port)
        } else {
            base
        }
    }
}

/// Factory handing out fresh `MockSandbox` instances and keeping handles to
/// them so tests can inspect each one.
#[derive(Default)]
pub struct MockSandboxFactory {
    created: Mutex<Vec<Arc<MockSandbox>>>,
}

impl MockSandboxFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<Arc<MockSandbox>> {
        self.created.lock().unwrap().clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl SandboxFactory for MockSandboxFactory {
    async fn create(&self, _template: &str, _idle_timeout: Duration) -> Result<Arc<dyn Sandbox>> {
        let sandbox = Arc::new(MockSandbox::new());
        self.created.lock().unwrap().push(sandbox.clone());
        Ok(sandbox)
    }
}

/// Archive store that records calls and serves a configurable set of keys.
#[derive(Default)]
pub struct MockArchiveStore {
    available: Mutex<HashSet<String>>,
    archived: Mutex<Vec<ArchiveKey>>,
    restored: Mutex<Vec<ArchiveKey>>,
}

impl MockArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key as present in the store so restores of it succeed.
    pub fn seed(&self, key: &ArchiveKey) {
        self.available.lock().unwrap().insert(key.object_path());
    }

    pub fn archived(&self) -> Vec<ArchiveKey> {
        self.archived.lock().unwrap().clone()
    }

    pub fn restored(&self) -> Vec<ArchiveKey> {
        self.restored.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveStore for MockArchiveStore {
    async fn archive(&self, _sandbox: &dyn Sandbox, key: &ArchiveKey) -> Result<bool> {
        self.archived.lock().unwrap().push(key.clone());
        self.available.lock().unwrap().insert(key.object_path());
        Ok(true)
    }

    async fn restore(&self, _sandbox: &dyn Sandbox, key: &ArchiveKey) -> Result<bool> {
        self.restored.lock().unwrap().push(key.clone());
        Ok(self.available.lock().unwrap().contains(&key.object_path()))
    }
}
