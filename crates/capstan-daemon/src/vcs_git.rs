//! VCS adapter backed by the `git` CLI.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use capstan_core::{AdapterError, CommitId, VcsAdapter};
use tokio::process::Command;

use crate::subprocess;

/// Runs `git` as a subprocess, non-interactively and with a bounded
/// runtime per invocation.
#[derive(Debug)]
pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    /// Creates the adapter with the given per-invocation timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Base `git` command: never prompt, predictable output locale,
    /// child killed if the invocation is abandoned on timeout.
    fn command() -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.env("LC_ALL", "C");
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl VcsAdapter for GitCli {
    async fn get_commit(&self, dir: &Path) -> Result<CommitId, AdapterError> {
        let mut cmd = Self::command();
        cmd.arg("-C").arg(dir).args(["rev-parse", "HEAD"]);
        subprocess::run("git rev-parse", &mut cmd, self.timeout)
            .await
            .map(CommitId::new)
    }

    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), AdapterError> {
        if dir.exists() {
            return Err(AdapterError::new(
                "git clone",
                format!("destination `{}` already exists", dir.display()),
            ));
        }
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                AdapterError::new(
                    "git clone",
                    format!("creating `{}`: {err}", parent.display()),
                )
            })?;
        }
        let mut cmd = Self::command();
        cmd.arg("clone").arg("--quiet").arg(url).arg(dir);
        subprocess::run("git clone", &mut cmd, self.timeout)
            .await
            .map(|_| ())
    }

    async fn pull(&self, dir: &Path) -> Result<CommitId, AdapterError> {
        let mut cmd = Self::command();
        cmd.arg("-C").arg(dir).args(["pull", "--ff-only", "--quiet"]);
        subprocess::run("git pull", &mut cmd, self.timeout).await?;
        self.get_commit(dir).await
    }
}
