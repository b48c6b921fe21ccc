//! Deterministic in-memory adapters for tests.
//!
//! The fakes complete instantly unless a test closes one of their
//! [`Gate`]s, which holds the corresponding background operations at a
//! known point (a pull in flight, a build in flight) so event ordering
//! can be exercised deliberately. Failures are scripted per clone URL
//! or image tag and consumed one operation at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{AdapterError, CommitId, ContainerHandle, RuntimeAdapter, VcsAdapter};

/// A reusable async gate, open by default.
///
/// Closing the gate parks every subsequent `pass` call until the gate
/// is opened again; opening releases all waiters.
#[derive(Debug, Default)]
pub struct Gate {
    closed: Mutex<bool>,
    notify: Notify,
}

impl Gate {
    /// Closes the gate; subsequent `pass` calls block.
    pub fn close(&self) {
        *self.closed.lock().expect("gate lock poisoned") = true;
    }

    /// Opens the gate and releases all waiters.
    pub fn open(&self) {
        *self.closed.lock().expect("gate lock poisoned") = false;
        self.notify.notify_waiters();
    }

    /// Waits until the gate is open.
    pub async fn pass(&self) {
        loop {
            let notified = self.notify.notified();
            if !*self.closed.lock().expect("gate lock poisoned") {
                return;
            }
            notified.await;
        }
    }
}

struct Checkout {
    url: String,
    head: CommitId,
}

#[derive(Default)]
struct VcsState {
    remotes: HashMap<String, CommitId>,
    checkouts: HashMap<PathBuf, Checkout>,
    pulls_started: HashMap<String, u64>,
    clones_started: u64,
    fail_pulls: HashMap<String, u32>,
    fail_clones: HashMap<String, u32>,
}

/// In-memory [`VcsAdapter`] with a scriptable remote per clone URL.
#[derive(Default)]
pub struct FakeVcs {
    state: Mutex<VcsState>,
    /// Crossed by every clone before it takes effect.
    pub clone_gate: Gate,
    /// Crossed by every pull before it takes effect.
    pub pull_gate: Gate,
}

impl FakeVcs {
    /// Creates a fake with no remotes configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote head commit for `url`, creating the remote if
    /// needed. Subsequent clones and pulls observe this commit.
    pub fn push(&self, url: &str, commit: &str) {
        self.lock()
            .remotes
            .insert(url.to_string(), CommitId::new(commit));
    }

    /// Arms the next `n` pulls of `url` to fail.
    pub fn fail_next_pulls(&self, url: &str, n: u32) {
        self.lock().fail_pulls.insert(url.to_string(), n);
    }

    /// Arms the next `n` clones of `url` to fail.
    pub fn fail_next_clones(&self, url: &str, n: u32) {
        self.lock().fail_clones.insert(url.to_string(), n);
    }

    /// Number of pulls started against `url` (counted before the gate).
    #[must_use]
    pub fn pulls_started(&self, url: &str) -> u64 {
        self.lock().pulls_started.get(url).copied().unwrap_or(0)
    }

    /// Number of clones started, across all URLs.
    #[must_use]
    pub fn clones_started(&self) -> u64 {
        self.lock().clones_started
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VcsState> {
        self.state.lock().expect("fake vcs state poisoned")
    }
}

/// Consumes one scripted failure for `key`, if any remain.
fn take_failure(map: &mut HashMap<String, u32>, key: &str) -> bool {
    match map.get_mut(key) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl VcsAdapter for FakeVcs {
    async fn get_commit(&self, dir: &Path) -> Result<CommitId, AdapterError> {
        self.lock()
            .checkouts
            .get(dir)
            .map(|c| c.head.clone())
            .ok_or_else(|| AdapterError::new("get_commit", "not a repository"))
    }

    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), AdapterError> {
        self.lock().clones_started += 1;
        self.clone_gate.pass().await;
        let mut state = self.lock();
        if take_failure(&mut state.fail_clones, url) {
            return Err(AdapterError::new("clone", "scripted failure"));
        }
        if state.checkouts.contains_key(dir) {
            return Err(AdapterError::new("clone", "destination already exists"));
        }
        let head = state
            .remotes
            .get(url)
            .cloned()
            .ok_or_else(|| AdapterError::new("clone", "unknown remote"))?;
        state.checkouts.insert(
            dir.to_path_buf(),
            Checkout {
                url: url.to_string(),
                head,
            },
        );
        Ok(())
    }

    async fn pull(&self, dir: &Path) -> Result<CommitId, AdapterError> {
        {
            let mut state = self.lock();
            let url = state
                .checkouts
                .get(dir)
                .map(|c| c.url.clone())
                .ok_or_else(|| AdapterError::new("pull", "not a repository"))?;
            *state.pulls_started.entry(url).or_insert(0) += 1;
        }
        self.pull_gate.pass().await;
        let mut state = self.lock();
        let url = state
            .checkouts
            .get(dir)
            .map(|c| c.url.clone())
            .ok_or_else(|| AdapterError::new("pull", "not a repository"))?;
        if take_failure(&mut state.fail_pulls, &url) {
            return Err(AdapterError::new("pull", "scripted failure"));
        }
        let head = state
            .remotes
            .get(&url)
            .cloned()
            .ok_or_else(|| AdapterError::new("pull", "unknown remote"))?;
        if let Some(checkout) = state.checkouts.get_mut(dir) {
            checkout.head = head.clone();
        }
        Ok(head)
    }
}

/// One observed runtime operation, recorded chronologically so tests
/// can assert ordering (a new container is started and ready before an
/// old one is stopped, and so on).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeOp {
    /// An image build completed.
    Build {
        /// Image tag.
        tag: String,
    },
    /// A container was created.
    Create {
        /// Image tag the container was created from.
        tag: String,
        /// Handle assigned to the container.
        handle: ContainerHandle,
    },
    /// A command was executed inside a container.
    Exec {
        /// Target container.
        handle: ContainerHandle,
        /// Whether the command exited zero.
        ok: bool,
    },
    /// A container was stopped.
    Stop {
        /// Target container.
        handle: ContainerHandle,
    },
}

#[derive(Default)]
struct RuntimeState {
    hooks: HashMap<String, Vec<String>>,
    builds: HashMap<String, u64>,
    fail_builds: HashMap<String, u32>,
    fail_ready: HashMap<String, u32>,
    running: HashMap<ContainerHandle, String>,
    log: Vec<RuntimeOp>,
}

/// In-memory [`RuntimeAdapter`] with scriptable build and readiness
/// failures and a chronological operation log.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
    next_handle: AtomicU64,
    /// Crossed by every build before it takes effect.
    pub build_gate: Gate,
    /// Crossed by every exec before it takes effect.
    pub exec_gate: Gate,
}

impl FakeRuntime {
    /// Creates a fake with no images configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hook directory listing reported for images tagged
    /// `tag`.
    pub fn set_hooks(&self, tag: &str, hooks: &[&str]) {
        self.lock()
            .hooks
            .insert(tag.to_string(), hooks.iter().map(ToString::to_string).collect());
    }

    /// Arms the next `n` builds of `tag` to fail.
    pub fn fail_next_builds(&self, tag: &str, n: u32) {
        self.lock().fail_builds.insert(tag.to_string(), n);
    }

    /// Arms the next `n` execs inside containers of `tag` to exit
    /// non-zero.
    pub fn fail_next_execs(&self, tag: &str, n: u32) {
        self.lock().fail_ready.insert(tag.to_string(), n);
    }

    /// Number of completed builds for `tag`.
    #[must_use]
    pub fn builds(&self, tag: &str) -> u64 {
        self.lock().builds.get(tag).copied().unwrap_or(0)
    }

    /// Handles of containers currently running, in creation order.
    #[must_use]
    pub fn running(&self) -> Vec<ContainerHandle> {
        let state = self.lock();
        state
            .log
            .iter()
            .filter_map(|op| match op {
                RuntimeOp::Create { handle, .. } if state.running.contains_key(handle) => {
                    Some(handle.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// The chronological operation log.
    #[must_use]
    pub fn ops(&self) -> Vec<RuntimeOp> {
        self.lock().log.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        self.state.lock().expect("fake runtime state poisoned")
    }
}

#[async_trait]
impl RuntimeAdapter for FakeRuntime {
    async fn build(
        &self,
        tag: &str,
        _recipe: &Path,
        _context_dir: &Path,
    ) -> Result<(), AdapterError> {
        self.build_gate.pass().await;
        let mut state = self.lock();
        if take_failure(&mut state.fail_builds, tag) {
            return Err(AdapterError::new("build", "scripted failure"));
        }
        *state.builds.entry(tag.to_string()).or_insert(0) += 1;
        state.log.push(RuntimeOp::Build {
            tag: tag.to_string(),
        });
        Ok(())
    }

    async fn create(&self, tag: &str) -> Result<String, AdapterError> {
        let raw = format!("{:064x}", self.next_handle.fetch_add(1, Ordering::Relaxed));
        let handle = ContainerHandle::new(raw.clone()).expect("fake handles are well-formed");
        let mut state = self.lock();
        state.running.insert(handle.clone(), tag.to_string());
        state.log.push(RuntimeOp::Create {
            tag: tag.to_string(),
            handle,
        });
        Ok(raw)
    }

    async fn exec(&self, handle: &ContainerHandle, _cmd: &[String]) -> Result<String, AdapterError> {
        self.exec_gate.pass().await;
        let mut state = self.lock();
        let tag = state
            .running
            .get(handle)
            .cloned()
            .ok_or_else(|| AdapterError::new("exec", "no such container"))?;
        let ok = !take_failure(&mut state.fail_ready, &tag);
        state.log.push(RuntimeOp::Exec {
            handle: handle.clone(),
            ok,
        });
        if ok {
            Ok(String::new())
        } else {
            Err(AdapterError::new("exec", "exited with status 1"))
        }
    }

    async fn list_dir(&self, tag: &str, _dir: &Path) -> Result<Vec<String>, AdapterError> {
        Ok(self.lock().hooks.get(tag).cloned().unwrap_or_default())
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.running.remove(handle);
        state.log.push(RuntimeOp::Stop {
            handle: handle.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[tokio::test]
    async fn clone_then_pull_tracks_the_remote() {
        let vcs = FakeVcs::new();
        vcs.push("https://example/r", "c1");
        let dir = PathBuf::from("/work/repo-0");

        vcs.clone_repo("https://example/r", &dir).await.expect("clone");
        assert_eq!(vcs.get_commit(&dir).await.expect("commit").as_str(), "c1");

        vcs.push("https://example/r", "c2");
        assert_eq!(vcs.pull(&dir).await.expect("pull").as_str(), "c2");
        assert_eq!(vcs.pulls_started("https://example/r"), 1);
    }

    #[tokio::test]
    async fn clone_fails_when_destination_exists() {
        let vcs = FakeVcs::new();
        vcs.push("https://example/r", "c1");
        let dir = PathBuf::from("/work/repo-0");

        vcs.clone_repo("https://example/r", &dir).await.expect("clone");
        let err = vcs
            .clone_repo("https://example/r", &dir)
            .await
            .expect_err("second clone must fail");
        assert!(err.message.contains("already exists"));
    }

    #[tokio::test]
    async fn scripted_ready_failures_are_consumed_in_order() {
        let runtime = FakeRuntime::new();
        let raw = runtime.create("web").await.expect("create");
        let handle = ContainerHandle::new(raw).expect("handle");

        runtime.fail_next_execs("web", 1);
        assert!(runtime.exec(&handle, &[]).await.is_err());
        assert!(runtime.exec(&handle, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn gate_blocks_until_opened() {
        let vcs = std::sync::Arc::new(FakeVcs::new());
        vcs.push("https://example/r", "c1");
        vcs.clone_gate.close();

        let cloning = {
            let vcs = std::sync::Arc::clone(&vcs);
            tokio::spawn(async move {
                vcs.clone_repo("https://example/r", &PathBuf::from("/w")).await
            })
        };
        tokio::task::yield_now().await;
        assert!(!cloning.is_finished());

        vcs.clone_gate.open();
        cloning.await.expect("join").expect("clone");
    }
}
