//! Capability seams for the version-control tool and the container
//! runtime.
//!
//! The engine consumes both tools through the narrow trait vocabularies
//! below so that tests can substitute the in-memory implementations in
//! [`fake`] and the daemon can plug in the real CLI-backed adapters.
//! Background tasks convert every adapter failure into a typed
//! completion event; no error escapes a task.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub mod fake;

/// Failure of a single adapter operation.
///
/// Carries the operation name and a human-readable detail. The engine
/// decides per state machine whether the enclosing pipeline stage is
/// retried, skipped, or aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op} failed: {message}")]
pub struct AdapterError {
    /// Operation that failed, e.g. `git pull` or `docker build`.
    pub op: String,
    /// Failure detail, e.g. trimmed stderr of the subprocess.
    pub message: String,
}

impl AdapterError {
    /// Creates an adapter error for the named operation.
    pub fn new(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            message: message.into(),
        }
    }
}

/// An opaque commit identifier as reported by the VCS adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CommitId(String);

impl CommitId {
    /// Wraps a raw commit identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A container handle that failed the well-formedness check.
///
/// The runtime contract promises exactly 64 hex characters; anything
/// else indicates a bug in the adapter and is escalated to a fatal
/// engine error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed container handle `{0}`: expected 64 hex characters")]
pub struct MalformedHandle(pub String);

/// Opaque identifier for a single running container instance.
///
/// Owned by exactly one project's set membership; lifetime bounded by
/// the runtime adapter's create and stop calls.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    /// Validates and wraps a raw handle returned by the runtime.
    pub fn new(raw: impl Into<String>) -> Result<Self, MalformedHandle> {
        let raw = raw.into();
        if raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(raw))
        } else {
            Err(MalformedHandle(raw))
        }
    }

    /// Returns the full handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the abbreviated handle used in log output.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Operations the engine needs from the version-control tool.
#[async_trait]
pub trait VcsAdapter: Send + Sync {
    /// Resolves the current commit identifier of a working directory.
    ///
    /// Fails if the directory is not a valid repository.
    async fn get_commit(&self, dir: &Path) -> Result<CommitId, AdapterError>;

    /// Clones `url` into a fresh directory.
    ///
    /// Fails if `dir` already exists; parent directories are created.
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), AdapterError>;

    /// Fast-forwards the working directory and returns the new commit.
    async fn pull(&self, dir: &Path) -> Result<CommitId, AdapterError>;
}

/// Operations the engine needs from the container runtime.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Builds and tags an image from the recipe rooted in `context_dir`.
    async fn build(&self, tag: &str, recipe: &Path, context_dir: &Path)
        -> Result<(), AdapterError>;

    /// Creates a detached container from `tag`.
    ///
    /// Returns the raw runtime handle; the engine validates it against
    /// the 64-hex-character contract.
    async fn create(&self, tag: &str) -> Result<String, AdapterError>;

    /// Runs a command inside a running container; non-zero exit is a
    /// failure. Returns captured stdout.
    async fn exec(&self, handle: &ContainerHandle, cmd: &[String]) -> Result<String, AdapterError>;

    /// Lists the entries of a directory inside a throwaway container
    /// created from `tag`.
    ///
    /// A missing directory is not an error: the adapter swallows that
    /// failure and returns an empty listing.
    async fn list_dir(&self, tag: &str, dir: &Path) -> Result<Vec<String>, AdapterError>;

    /// Terminates and removes a container.
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_handle_accepts_64_hex() {
        let raw = "a".repeat(64);
        let handle = ContainerHandle::new(raw.clone()).expect("valid handle");
        assert_eq!(handle.as_str(), raw);
        assert_eq!(handle.short(), &raw[..12]);
    }

    #[test]
    fn container_handle_rejects_wrong_length() {
        assert!(ContainerHandle::new("abc123").is_err());
        assert!(ContainerHandle::new("a".repeat(65)).is_err());
        assert!(ContainerHandle::new("").is_err());
    }

    #[test]
    fn container_handle_rejects_non_hex() {
        let raw = format!("{}g", "a".repeat(63));
        let err = ContainerHandle::new(raw).expect_err("non-hex must be rejected");
        assert!(err.to_string().contains("malformed container handle"));
    }

    #[test]
    fn adapter_error_display_names_the_operation() {
        let err = AdapterError::new("git pull", "network unreachable");
        assert_eq!(err.to_string(), "git pull failed: network unreachable");
    }
}
