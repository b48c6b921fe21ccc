//! Read-only projection of registry state for the status surface.
//!
//! Snapshots are produced on the engine loop in response to a status
//! event, so they are always internally consistent; the admin HTTP
//! surface serializes them as JSON and tests use them to observe the
//! engine without reaching into its state.

use serde::Serialize;

use crate::engine::{PipelinePhase, ProjectState, RepoState};

/// Point-in-time view of every repo and project.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// All tracked repositories, in registry order.
    pub repos: Vec<RepoStatus>,
    /// All projects, in configuration order.
    pub projects: Vec<ProjectStatus>,
}

/// Observable state of one tracked repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepoStatus {
    /// Clone URL (repo identity).
    pub clone_url: String,
    /// Lifecycle state.
    pub state: RepoState,
    /// Last observed commit, if any pull has completed.
    pub commit: Option<String>,
    /// Whether a deferred update is queued.
    pub update_pending: bool,
    /// Number of in-flight image builds reading the working directory.
    pub lock_count: u32,
}

/// Observable state of one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    /// Stable configuration index.
    pub index: usize,
    /// Project name (image tag base).
    pub name: String,
    /// Clone URL of the backing repo.
    pub clone_url: String,
    /// Lifecycle state.
    pub state: ProjectState,
    /// What the update pipeline is doing right now.
    pub phase: PipelinePhase,
    /// Whether a deferred update is queued.
    pub update_pending: bool,
    /// Hook names discovered in the current image.
    pub hooks: Vec<String>,
    /// Containers currently serving traffic.
    pub active: usize,
    /// Containers created but not yet ready.
    pub starting: usize,
    /// Containers being torn down.
    pub ending: usize,
}

impl StatusSnapshot {
    /// Convenience lookup by project index.
    #[must_use]
    pub fn project(&self, index: usize) -> Option<&ProjectStatus> {
        self.projects.iter().find(|p| p.index == index)
    }

    /// Convenience lookup by clone URL.
    #[must_use]
    pub fn repo(&self, clone_url: &str) -> Option<&RepoStatus> {
        self.repos.iter().find(|r| r.clone_url == clone_url)
    }
}
