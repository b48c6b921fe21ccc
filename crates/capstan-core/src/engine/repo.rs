//! Tracked repositories and the lock-count protocol.
//!
//! One [`Repo`] exists per distinct clone URL referenced by the project
//! configuration; repos are created at engine start and never
//! destroyed. The lock count serializes image builds against pulls:
//! builds hold a lock while they read the working directory, and a
//! pull may only start when the count is zero.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::adapter::CommitId;
use crate::engine::error::FatalError;

/// Stable identity of a repo in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepoId(pub(crate) usize);

impl RepoId {
    /// Registry index of the repo.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Lifecycle state of a tracked repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoState {
    /// Initial clone has not completed yet.
    Init,
    /// Working directory is consistent; builds may read it.
    Normal,
    /// A pull is rewriting the working directory.
    Updating,
}

impl RepoState {
    /// Lower-case state name, as serialized on the status surface.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Normal => "normal",
            Self::Updating => "updating",
        }
    }
}

impl fmt::Display for RepoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked source repository, possibly backing several projects.
#[derive(Debug)]
pub(crate) struct Repo {
    pub(crate) clone_url: String,
    pub(crate) workdir: PathBuf,
    pub(crate) commit: Option<CommitId>,
    pub(crate) state: RepoState,
    pub(crate) update_pending: bool,
    pub(crate) lock_count: u32,
    /// A VCS task (clone while `Init`, pull while `Updating`) is in
    /// flight.
    pub(crate) busy: bool,
}

impl Repo {
    pub(crate) fn new(clone_url: String, workdir: PathBuf) -> Self {
        Self {
            clone_url,
            workdir,
            commit: None,
            state: RepoState::Init,
            update_pending: false,
            lock_count: 0,
            busy: false,
        }
    }

    /// Acquires a build lock. Only legal while `normal`.
    pub(crate) fn acquire(&mut self) -> Result<(), FatalError> {
        if self.state != RepoState::Normal {
            return Err(FatalError::LockOutsideNormal {
                repo: self.clone_url.clone(),
                state: self.state,
            });
        }
        self.lock_count += 1;
        Ok(())
    }

    /// Releases a build lock; returns `true` when the count reached
    /// zero (the point at which a deferred pull may start).
    pub(crate) fn release(&mut self) -> Result<bool, FatalError> {
        if self.state != RepoState::Normal {
            return Err(FatalError::LockOutsideNormal {
                repo: self.clone_url.clone(),
                state: self.state,
            });
        }
        if self.lock_count == 0 {
            return Err(FatalError::LockUnderflow {
                repo: self.clone_url.clone(),
            });
        }
        self.lock_count -= 1;
        Ok(self.lock_count == 0)
    }

    /// Records a deferred update intent. Idempotent: re-setting the
    /// flag is a no-op, which is what coalesces webhook bursts.
    pub(crate) fn note_update_pending(&mut self) {
        self.update_pending = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repo {
        Repo::new("https://example/r".to_string(), PathBuf::from("/w/repo-0"))
    }

    #[test]
    fn acquire_requires_normal() {
        let mut r = repo();
        assert!(matches!(
            r.acquire(),
            Err(FatalError::LockOutsideNormal {
                state: RepoState::Init,
                ..
            })
        ));

        r.state = RepoState::Normal;
        r.acquire().expect("acquire while normal");
        assert_eq!(r.lock_count, 1);
    }

    #[test]
    fn release_reports_drop_to_zero() {
        let mut r = repo();
        r.state = RepoState::Normal;
        r.acquire().expect("first");
        r.acquire().expect("second");

        assert!(!r.release().expect("first release"));
        assert!(r.release().expect("second release"));
    }

    #[test]
    fn release_underflow_is_fatal() {
        let mut r = repo();
        r.state = RepoState::Normal;
        assert!(matches!(r.release(), Err(FatalError::LockUnderflow { .. })));
    }

    #[test]
    fn release_outside_normal_is_fatal() {
        let mut r = repo();
        r.state = RepoState::Normal;
        r.acquire().expect("acquire");
        r.state = RepoState::Updating;
        assert!(matches!(
            r.release(),
            Err(FatalError::LockOutsideNormal { .. })
        ));
    }

    #[test]
    fn pending_flag_is_idempotent() {
        let mut r = repo();
        r.note_update_pending();
        r.note_update_pending();
        assert!(r.update_pending);
    }
}
