//! Fatal engine errors.

use thiserror::Error;

use crate::adapter::MalformedHandle;
use crate::engine::repo::RepoState;

/// Conditions that indicate a bug in the control plane rather than an
/// operational failure.
///
/// When one of these surfaces the engine stops accepting events and
/// its loop returns the error; the daemon logs the diagnostic and
/// exits non-zero. Operational failures (network blips, bad recipes,
/// unhealthy containers) never take this path; they are handled per
/// state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    /// A build lock was released with the count already at zero.
    #[error("lock released on `{repo}` with lock count already zero")]
    LockUnderflow {
        /// Clone URL of the repo.
        repo: String,
    },

    /// A build lock was acquired or released outside the `normal`
    /// state.
    #[error("lock operation on `{repo}` while repo is {state}")]
    LockOutsideNormal {
        /// Clone URL of the repo.
        repo: String,
        /// State the repo was in.
        state: RepoState,
    },

    /// The runtime adapter returned a handle that fails the 64-hex
    /// contract.
    #[error(transparent)]
    MalformedHandle(#[from] MalformedHandle),

    /// A cross-registry consistency check failed after an event was
    /// handled.
    #[error("invariant violated: {0}")]
    Invariant(String),
}
