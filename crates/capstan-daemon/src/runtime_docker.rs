//! Container runtime adapter backed by the `docker` CLI.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use capstan_core::{AdapterError, ContainerHandle, RuntimeAdapter};
use tokio::process::Command;

use crate::subprocess;

/// Runs `docker` as a subprocess with a bounded runtime per
/// invocation. Image tags are partitioned per project, so concurrent
/// builds never race on a tag.
#[derive(Debug)]
pub struct DockerCli {
    timeout: Duration,
}

impl DockerCli {
    /// Creates the adapter with the given per-invocation timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command() -> Command {
        let mut cmd = Command::new("docker");
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RuntimeAdapter for DockerCli {
    async fn build(
        &self,
        tag: &str,
        recipe: &Path,
        context_dir: &Path,
    ) -> Result<(), AdapterError> {
        let mut cmd = Self::command();
        cmd.arg("build")
            .arg("--file")
            .arg(context_dir.join(recipe))
            .arg("--tag")
            .arg(tag)
            .arg(context_dir);
        subprocess::run("docker build", &mut cmd, self.timeout)
            .await
            .map(|_| ())
    }

    async fn create(&self, tag: &str) -> Result<String, AdapterError> {
        let mut cmd = Self::command();
        cmd.args(["run", "--detach"]).arg(tag);
        subprocess::run("docker run", &mut cmd, self.timeout).await
    }

    async fn exec(&self, handle: &ContainerHandle, cmd_argv: &[String]) -> Result<String, AdapterError> {
        let mut cmd = Self::command();
        cmd.arg("exec").arg(handle.as_str()).args(cmd_argv);
        subprocess::run("docker exec", &mut cmd, self.timeout).await
    }

    async fn list_dir(&self, tag: &str, dir: &Path) -> Result<Vec<String>, AdapterError> {
        let mut cmd = Self::command();
        cmd.args(["run", "--rm"]).arg(tag).arg("ls").arg("-1").arg(dir);
        match subprocess::run("docker run --rm", &mut cmd, self.timeout).await {
            Ok(stdout) => Ok(parse_listing(&stdout)),
            // A project without hooks simply has no hook directory.
            Err(err) if err.message.contains("No such file or directory") => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), AdapterError> {
        let mut cmd = Self::command();
        cmd.args(["rm", "--force"]).arg(handle.as_str());
        subprocess::run("docker rm", &mut cmd, self.timeout)
            .await
            .map(|_| ())
    }
}

fn parse_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}
