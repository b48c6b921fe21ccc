//! Shared harness for engine integration tests.
//!
//! Tests launch a real engine loop against the in-memory adapters and
//! observe it exclusively through the status snapshot, the same way
//! the admin surface does.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use capstan_core::adapter::fake::{FakeRuntime, FakeVcs};
use capstan_core::{
    ContainerRange, Engine, EngineHandle, EngineSettings, ProjectConfig, ProjectState, RepoState,
    RuntimeAdapter, StatusSnapshot, VcsAdapter,
};

/// Clone URL shared by most scenarios.
pub const URL: &str = "https://example/r";

/// Builds a project config with the defaults scenarios care about.
pub fn project(name: &str, url: &str, range: [usize; 2]) -> ProjectConfig {
    ProjectConfig {
        name: name.to_string(),
        clone_url: url.to_string(),
        container_range: ContainerRange::from(range),
        dockerfile: PathBuf::from("Dockerfile"),
        hook_dir: PathBuf::from("/srv/hooks"),
    }
}

/// A running engine plus the fakes behind it.
pub struct TestPlane {
    pub handle: EngineHandle,
    pub vcs: Arc<FakeVcs>,
    pub runtime: Arc<FakeRuntime>,
}

/// Launches the engine loop over pre-configured fakes.
///
/// Must be called from within a tokio runtime. The engine task is
/// detached; a fatal engine error surfaces as `status()` returning
/// `None`, which [`wait_until`] reports as a panic.
pub fn launch_with(
    projects: &[ProjectConfig],
    vcs: Arc<FakeVcs>,
    runtime: Arc<FakeRuntime>,
) -> EngineHandle {
    let (engine, handle) = Engine::new(
        "/work",
        projects,
        EngineSettings::default(),
        vcs as Arc<dyn VcsAdapter>,
        runtime as Arc<dyn RuntimeAdapter>,
    )
    .expect("test config is valid");
    tokio::spawn(engine.run());
    handle
}

/// Launches the engine with fresh fakes, seeding every referenced
/// remote at commit `c1`.
pub fn launch(projects: &[ProjectConfig]) -> TestPlane {
    let vcs = Arc::new(FakeVcs::new());
    for spec in projects {
        vcs.push(&spec.clone_url, "c1");
    }
    let runtime = Arc::new(FakeRuntime::new());
    let handle = launch_with(projects, Arc::clone(&vcs), Arc::clone(&runtime));
    TestPlane {
        handle,
        vcs,
        runtime,
    }
}

/// Polls the status surface until `predicate` holds.
///
/// Panics if the engine stops (fatal error) or the condition is not
/// reached within five seconds.
pub async fn wait_until<F>(handle: &EngineHandle, what: &str, predicate: F) -> StatusSnapshot
where
    F: Fn(&StatusSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut last: Option<StatusSnapshot> = None;
    while tokio::time::Instant::now() < deadline {
        match handle.status().await {
            Some(snapshot) => {
                if predicate(&snapshot) {
                    return snapshot;
                }
                last = Some(snapshot);
            }
            None => panic!("engine stopped while waiting for {what}"),
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}; last status: {last:#?}");
}

/// True when every repo and project has come to rest in `normal`.
pub fn settled(snapshot: &StatusSnapshot) -> bool {
    snapshot
        .repos
        .iter()
        .all(|r| r.state == RepoState::Normal && r.lock_count == 0 && !r.update_pending)
        && snapshot
            .projects
            .iter()
            .all(|p| p.state == ProjectState::Normal)
}
