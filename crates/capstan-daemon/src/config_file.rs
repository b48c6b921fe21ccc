//! The daemon's TOML configuration file, read once at startup.
//!
//! Any failure here (unreadable file, parse error, invalid project
//! list) is fatal before the engine starts.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use capstan_core::config::validate_projects;
use capstan_core::{EngineSettings, ProjectConfig};
use serde::Deserialize;

/// Complete daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Directory under which repo working directories are created.
    pub workdir_root: PathBuf,

    /// Public address for the webhook receiver.
    #[serde(default = "default_webhook_addr")]
    pub webhook_addr: SocketAddr,

    /// Private address for the status and admin surface.
    #[serde(default = "default_status_addr")]
    pub status_addr: SocketAddr,

    /// Readiness failures tolerated per rotation beyond the first
    /// attempt.
    #[serde(default = "default_ready_retries")]
    pub ready_retries: u32,

    /// Timeout for each `git`/`docker` invocation, in seconds.
    #[serde(default = "default_subprocess_timeout_secs")]
    pub subprocess_timeout_secs: u64,

    /// The deployable units, in order; order is identity.
    #[serde(rename = "project")]
    pub projects: Vec<ProjectConfig>,
}

fn default_webhook_addr() -> SocketAddr {
    "0.0.0.0:8787".parse().expect("literal address")
}

fn default_status_addr() -> SocketAddr {
    "127.0.0.1:8788".parse().expect("literal address")
}

fn default_ready_retries() -> u32 {
    1
}

fn default_subprocess_timeout_secs() -> u64 {
    600
}

impl DaemonConfig {
    /// Engine tunables carried by this configuration.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            ready_retries: self.ready_retries,
        }
    }

    /// Per-invocation subprocess timeout.
    #[must_use]
    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_secs(self.subprocess_timeout_secs)
    }
}

/// Reads and validates the configuration file.
///
/// # Errors
///
/// Any I/O, parse, or validation failure; all are fatal at startup.
pub fn load(path: &Path) -> Result<DaemonConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file `{}`", path.display()))?;
    let config: DaemonConfig = toml::from_str(&raw)
        .with_context(|| format!("parsing config file `{}`", path.display()))?;
    validate_projects(&config.projects).context("invalid project configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn loads_a_minimal_config_with_defaults() {
        let file = write_config(
            r#"
            workdir_root = "/var/lib/capstan"

            [[project]]
            name = "web"
            clone_url = "https://example/r"
            container_range = [2, 5]
            dockerfile = "Dockerfile"
            hook_dir = "/srv/hooks"
            "#,
        );

        let config = load(file.path()).expect("config loads");
        assert_eq!(config.workdir_root, PathBuf::from("/var/lib/capstan"));
        assert_eq!(config.ready_retries, 1);
        assert_eq!(config.subprocess_timeout_secs, 600);
        assert_eq!(config.status_addr.port(), 8788);
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].container_range.min, 2);
        assert_eq!(config.projects[0].container_range.max, 5);
    }

    #[test]
    fn rejects_an_invalid_container_range() {
        let file = write_config(
            r#"
            workdir_root = "/var/lib/capstan"

            [[project]]
            name = "web"
            clone_url = "https://example/r"
            container_range = [0, 5]
            dockerfile = "Dockerfile"
            hook_dir = "/srv/hooks"
            "#,
        );

        let err = load(file.path()).expect_err("zero minimum must be rejected");
        assert!(format!("{err:#}").contains("container range"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let file = write_config(
            r#"
            workdir_root = "/var/lib/capstan"
            frobnicate = true

            [[project]]
            name = "web"
            clone_url = "https://example/r"
            container_range = [1, 1]
            dockerfile = "Dockerfile"
            hook_dir = "/srv/hooks"
            "#,
        );

        assert!(load(file.path()).is_err());
    }

    #[test]
    fn rejects_a_missing_file() {
        assert!(load(Path::new("/nonexistent/capstan.toml")).is_err());
    }
}
