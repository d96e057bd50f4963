//! Pool of remote execution sandboxes, one live sandbox per user.
//!
//! A user switching projects keeps the same remote environment: the old
//! project's workspace is archived, the workspace subtree wiped, and the new
//! project restored in place. Sessions expire after an idle TTL, and the pool
//! is bounded: inserting past capacity persists-then-closes the least
//! recently used idle session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::AgentError;
use crate::sandbox::{ArchiveKey, ArchiveStore, Sandbox, SandboxFactory};

pub struct SandboxSession {
    pub sandbox: Arc<dyn Sandbox>,
    pub current_project_id: Option<String>,
    pub last_accessed: Instant,
}

type Slot = Arc<Mutex<Option<SandboxSession>>>;

pub struct SandboxPool {
    factory: Arc<dyn SandboxFactory>,
    archive: Arc<dyn ArchiveStore>,
    workspace_root: String,
    template: String,
    ttl: Duration,
    capacity: usize,
    // Outer lock only guards the map shape. Each user's session has its own
    // async lock so one user's project switch never blocks another user's
    // turn, and two turns for the same user cannot race each other.
    sessions: StdMutex<HashMap<String, Slot>>,
}

impl SandboxPool {
    pub fn new(
        factory: Arc<dyn SandboxFactory>,
        archive: Arc<dyn ArchiveStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            factory,
            archive,
            workspace_root: settings.workspace_root.clone(),
            template: settings.sandbox_template.clone(),
            ttl: settings.sandbox_ttl,
            capacity: settings.max_sandboxes,
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    fn slot(&self, user_id: &str) -> Slot {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Resolve a sandbox for `(user_id, project_id)`, reusing, switching or
    /// creating as needed. The returned handle is only borrowed for the
    /// duration of one turn; callers must not cache it.
    pub async fn acquire(&self, user_id: &str, project_id: &str) -> Result<Arc<dyn Sandbox>> {
        let slot = self.slot(user_id);
        let mut guard = slot.lock().await;

        if let Some(session) = guard.as_mut() {
            if session.last_accessed.elapsed() < self.ttl {
                if session.current_project_id.as_deref() != Some(project_id) {
                    self.switch_project(user_id, project_id, session).await?;
                } else {
                    debug!(user_id, project_id, "reusing sandbox");
                }
                session.current_project_id = Some(project_id.to_string());
                session.last_accessed = Instant::now();
                return Ok(session.sandbox.clone());
            }
            info!(user_id, "pooled sandbox expired, replacing");
        }

        let sandbox = self.factory.create(&self.template, self.ttl).await?;
        let key = ArchiveKey::new(user_id, project_id);
        if self.archive.restore(sandbox.as_ref(), &key).await? {
            info!(user_id, project_id, "project restored from archive");
        } else {
            info!(user_id, project_id, "no archive found, starting fresh");
        }

        *guard = Some(SandboxSession {
            sandbox: sandbox.clone(),
            current_project_id: Some(project_id.to_string()),
            last_accessed: Instant::now(),
        });
        drop(guard);

        self.evict_overflow(user_id).await;
        Ok(sandbox)
    }

    /// Swap workspace contents while reusing the same remote environment.
    async fn switch_project(
        &self,
        user_id: &str,
        project_id: &str,
        session: &mut SandboxSession,
    ) -> Result<()> {
        if let Some(current) = session.current_project_id.clone() {
            info!(user_id, from = %current, to = %project_id, "switching project");
            let key = ArchiveKey::new(user_id, current);
            self.archive.archive(session.sandbox.as_ref(), &key).await?;
        }

        // Only the mutable source subtree is wiped; toolchain and installed
        // dependencies stay.
        let wipe = format!("rm -rf {}/src/*", self.workspace_root);
        session
            .sandbox
            .run_command(&wipe, &self.workspace_root)
            .await?;

        let key = ArchiveKey::new(user_id, project_id);
        if !self
            .archive
            .restore(session.sandbox.as_ref(), &key)
            .await?
        {
            info!(user_id, project_id, "no archive found, workspace left empty");
        }
        Ok(())
    }

    /// Archive the current workspace under `(user_id, project_id)`.
    ///
    /// Requires an active session. An empty workspace is a warning, not an
    /// error.
    pub async fn persist(&self, user_id: &str, project_id: &str) -> Result<()> {
        let slot = {
            let sessions = self.sessions.lock().unwrap();
            sessions.get(user_id).cloned()
        };
        let slot = slot.ok_or_else(|| AgentError::NoActiveSandbox(user_id.to_string()))?;
        let guard = slot.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| AgentError::NoActiveSandbox(user_id.to_string()))?;

        let key = ArchiveKey::new(user_id, project_id);
        if self.archive.archive(session.sandbox.as_ref(), &key).await? {
            info!(user_id, project_id, "project archived");
        } else {
            warn!(user_id, project_id, "nothing to archive yet");
        }
        Ok(())
    }

    /// Drop a user's session, archiving the current project first when one
    /// is loaded.
    pub async fn close(&self, user_id: &str) -> Result<()> {
        let slot = {
            let sessions = self.sessions.lock().unwrap();
            sessions.get(user_id).cloned()
        };
        let Some(slot) = slot else { return Ok(()) };
        let mut guard = slot.lock().await;
        if let Some(session) = guard.take() {
            if let Some(project_id) = &session.current_project_id {
                let key = ArchiveKey::new(user_id, project_id.clone());
                if let Err(err) = self.archive.archive(session.sandbox.as_ref(), &key).await {
                    warn!(user_id, %err, "archive on close failed");
                }
            }
            info!(user_id, "sandbox session closed");
        }
        Ok(())
    }

    /// Project currently loaded in a user's sandbox, if any.
    pub async fn current_project(&self, user_id: &str) -> Option<String> {
        let slot = {
            let sessions = self.sessions.lock().unwrap();
            sessions.get(user_id).cloned()
        }?;
        let guard = slot.lock().await;
        guard.as_ref().and_then(|s| s.current_project_id.clone())
    }

    /// Persist-then-close the stalest idle sessions once the pool exceeds
    /// capacity. Sessions busy with a turn are skipped and reconsidered on
    /// the next overflow.
    async fn evict_overflow(&self, just_inserted: &str) {
        loop {
            let slots: Vec<(String, Slot)> = {
                let sessions = self.sessions.lock().unwrap();
                sessions
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            };

            let mut live = 0usize;
            let mut oldest: Option<(String, Slot, Instant)> = None;
            for (user_id, slot) in slots {
                let Ok(guard) = slot.try_lock() else { continue };
                let Some(session) = guard.as_ref() else {
                    continue;
                };
                live += 1;
                if user_id == just_inserted {
                    continue;
                }
                let accessed = session.last_accessed;
                if oldest
                    .as_ref()
                    .map(|(_, _, t)| accessed < *t)
                    .unwrap_or(true)
                {
                    oldest = Some((user_id, slot.clone(), accessed));
                }
            }

            if live <= self.capacity {
                return;
            }
            let Some((user_id, slot, _)) = oldest else {
                return;
            };

            let mut guard = match slot.try_lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if let Some(session) = guard.take() {
                info!(user_id = %user_id, "evicting sandbox over capacity");
                if let Some(project_id) = &session.current_project_id {
                    let key = ArchiveKey::new(user_id.clone(), project_id.clone());
                    if let Err(err) = self.archive.archive(session.sandbox.as_ref(), &key).await {
                        warn!(user_id = %user_id, %err, "archive on eviction failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::{MockArchiveStore, MockSandboxFactory};

    fn pool_with(
        capacity: usize,
        ttl: Duration,
    ) -> (Arc<SandboxPool>, Arc<MockSandboxFactory>, Arc<MockArchiveStore>) {
        let factory = Arc::new(MockSandboxFactory::new());
        let archive = Arc::new(MockArchiveStore::new());
        let settings = Settings {
            sandbox_ttl: ttl,
            max_sandboxes: capacity,
            ..Settings::default()
        };
        let pool = Arc::new(SandboxPool::new(factory.clone(), archive.clone(), &settings));
        (pool, factory, archive)
    }

    #[tokio::test]
    async fn test_acquire_creates_and_reuses() {
        let (pool, factory, archive) = pool_with(8, Duration::from_secs(1800));

        pool.acquire("u1", "p1").await.unwrap();
        pool.acquire("u1", "p1").await.unwrap();

        assert_eq!(factory.created_count(), 1);
        // Creation attempts a restore; same-project reuse does not.
        assert_eq!(archive.restored().len(), 1);
        assert!(archive.archived().is_empty());
    }

    #[tokio::test]
    async fn test_project_switch_archives_and_restores() {
        let (pool, factory, archive) = pool_with(8, Duration::from_secs(1800));

        pool.acquire("u1", "p1").await.unwrap();
        pool.acquire("u1", "p2").await.unwrap();

        assert_eq!(factory.created_count(), 1);
        assert_eq!(archive.archived(), vec![ArchiveKey::new("u1", "p1")]);
        let restored = archive.restored();
        assert_eq!(restored.last(), Some(&ArchiveKey::new("u1", "p2")));
        assert_eq!(pool.current_project("u1").await.as_deref(), Some("p2"));

        // The mutable subtree was wiped during the switch
        let sandbox = &factory.created()[0];
        assert!(sandbox
            .commands()
            .iter()
            .any(|c| c.starts_with("rm -rf /home/user/src")));
    }

    #[tokio::test]
    async fn test_expired_session_is_replaced() {
        let (pool, factory, _) = pool_with(8, Duration::ZERO);

        pool.acquire("u1", "p1").await.unwrap();
        pool.acquire("u1", "p1").await.unwrap();

        assert_eq!(factory.created_count(), 2);
    }

    #[tokio::test]
    async fn test_persist_requires_active_session() {
        let (pool, _, _) = pool_with(8, Duration::from_secs(1800));

        let err = pool.persist("ghost", "p1").await.unwrap_err();
        let agent_err = err.downcast::<AgentError>().unwrap();
        assert!(matches!(agent_err, AgentError::NoActiveSandbox(_)));
    }

    #[tokio::test]
    async fn test_persist_archives_workspace() {
        let (pool, _, archive) = pool_with(8, Duration::from_secs(1800));

        pool.acquire("u1", "p1").await.unwrap();
        pool.persist("u1", "p1").await.unwrap();

        assert_eq!(archive.archived(), vec![ArchiveKey::new("u1", "p1")]);
    }

    #[tokio::test]
    async fn test_overflow_evicts_least_recently_used() {
        let (pool, factory, archive) = pool_with(1, Duration::from_secs(1800));

        pool.acquire("u1", "p1").await.unwrap();
        pool.acquire("u2", "p2").await.unwrap();

        assert_eq!(factory.created_count(), 2);
        // u1 was evicted and its project persisted on the way out
        assert!(archive.archived().contains(&ArchiveKey::new("u1", "p1")));
        assert_eq!(pool.current_project("u1").await, None);
        assert_eq!(pool.current_project("u2").await.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn test_close_archives_current_project() {
        let (pool, _, archive) = pool_with(8, Duration::from_secs(1800));

        pool.acquire("u1", "p1").await.unwrap();
        pool.close("u1").await.unwrap();

        assert!(archive.archived().contains(&ArchiveKey::new("u1", "p1")));
        assert_eq!(pool.current_project("u1").await, None);
    }

    #[tokio::test]
    async fn test_restore_hit_on_fresh_sandbox() {
        let (pool, _, archive) = pool_with(8, Duration::from_secs(1800));
        archive.seed(&ArchiveKey::new("u1", "p1"));

        pool.acquire("u1", "p1").await.unwrap();

        assert_eq!(archive.restored(), vec![ArchiveKey::new("u1", "p1")]);
    }
}
