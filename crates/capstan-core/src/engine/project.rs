//! Projects and their container fleets.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::adapter::ContainerHandle;
use crate::config::ProjectConfig;
use crate::engine::repo::RepoId;
use crate::engine::rotation::Rotation;

/// Stable identity of a project (its configuration index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectId(pub(crate) usize);

impl ProjectId {
    /// Configuration index of the project.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Lifecycle state of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    /// Before the first image build and initial fleet creation.
    Init,
    /// Fleet is serving the current image; nothing in flight.
    Normal,
    /// An update pipeline (build and rotation) is running or parked.
    Updating,
}

impl ProjectState {
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

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a project's update pipeline is doing right now.
///
/// The lifecycle state alone cannot distinguish "build in flight" from
/// "parked after a failed build" from "waiting for the repo to become
/// normal"; the phase does. `Queued` projects start their build on the
/// next repo entered-normal edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// Nothing in flight and nothing wanted.
    Idle,
    /// A build is wanted; it starts as soon as the repo is normal.
    Queued,
    /// Image build in flight; a repo lock is held.
    Building,
    /// Rolling rotation in progress.
    Rotating,
}

impl PipelinePhase {
    /// Lower-case phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Building => "building",
            Self::Rotating => "rotating",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One deployable unit and its live container fleet.
#[derive(Debug)]
pub(crate) struct Project {
    pub(crate) spec: ProjectConfig,
    pub(crate) repo: RepoId,
    pub(crate) state: ProjectState,
    pub(crate) phase: PipelinePhase,
    pub(crate) update_pending: bool,
    /// Hook names discovered in the current image.
    pub(crate) hooks: BTreeSet<String>,
    /// Containers serving traffic, oldest first.
    pub(crate) active: Vec<ContainerHandle>,
    /// Containers created but not yet ready.
    pub(crate) starting: BTreeSet<ContainerHandle>,
    /// Containers being torn down.
    pub(crate) ending: BTreeSet<ContainerHandle>,
    /// Present exactly while `phase` is `Rotating`.
    pub(crate) rotation: Option<Rotation>,
}

impl Project {
    pub(crate) fn new(spec: ProjectConfig, repo: RepoId) -> Self {
        Self {
            spec,
            repo,
            state: ProjectState::Init,
            // Startup wants an initial build as soon as the clone lands.
            phase: PipelinePhase::Queued,
            update_pending: false,
            hooks: BTreeSet::new(),
            active: Vec::new(),
            starting: BTreeSet::new(),
            ending: BTreeSet::new(),
            rotation: None,
        }
    }

    /// Whether the readiness hook is present in the current image.
    pub(crate) fn has_ready_hook(&self) -> bool {
        self.hooks.contains(WAIT_READY_HOOK)
    }
}

/// Hook executed inside a freshly created container; the engine blocks
/// promotion to `active` on its zero exit.
pub(crate) const WAIT_READY_HOOK: &str = "wait_ready";
