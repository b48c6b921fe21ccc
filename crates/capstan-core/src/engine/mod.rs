//! The orchestration engine.
//!
//! A single loop owns the repo and project registries and processes
//! intake events one at a time; every handler is synchronous with
//! respect to shared state. Long-running work (clones, pulls, image
//! builds, container lifecycle operations) runs in background tasks
//! that never touch the registries and report back by posting typed
//! completion events to the same queue.
//!
//! The interesting coordination lives in three places:
//!
//! - the repo lock-count protocol: builds hold a lock on their repo's
//!   working directory, and a pull may only start at lock count zero;
//! - pending-update coalescing: webhook bursts against a busy repo (or
//!   project) collapse into a single deferred rerun;
//! - the rolling rotation: one replacement step at a time, new
//!   container ready before an old one stops.

mod error;
mod event;
mod project;
mod repo;
mod rotation;

pub use error::FatalError;
pub use event::{EngineEvent, EngineHandle};
pub use project::{PipelinePhase, ProjectId, ProjectState};
pub use repo::{RepoId, RepoState};

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterError, CommitId, ContainerHandle, RuntimeAdapter, VcsAdapter};
use crate::config::{validate_projects, ConfigError, EngineSettings, ProjectConfig};
use crate::engine::project::{Project, WAIT_READY_HOOK};
use crate::engine::repo::Repo;
use crate::engine::rotation::Rotation;
use crate::status::{ProjectStatus, RepoStatus, StatusSnapshot};

/// The control-plane engine. Owns both registries; consumed by
/// [`Engine::run`].
pub struct Engine {
    repos: Vec<Repo>,
    repo_ids_by_url: HashMap<String, RepoId>,
    projects: Vec<Project>,
    vcs: Arc<dyn VcsAdapter>,
    runtime: Arc<dyn RuntimeAdapter>,
    settings: EngineSettings,
    handle: EngineHandle,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Engine {
    /// Builds the registries from the static project configuration.
    ///
    /// Repos are inferred by de-duplicating clone URLs; each repo's
    /// working directory is derived from the first project index
    /// referencing it. Returns the engine and the handle used by the
    /// HTTP surfaces (and tests) to post events.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] is fatal at startup.
    pub fn new(
        workdir_root: impl AsRef<Path>,
        projects: &[ProjectConfig],
        settings: EngineSettings,
        vcs: Arc<dyn VcsAdapter>,
        runtime: Arc<dyn RuntimeAdapter>,
    ) -> Result<(Self, EngineHandle), ConfigError> {
        validate_projects(projects)?;
        let workdir_root = workdir_root.as_ref();

        let mut repos: Vec<Repo> = Vec::new();
        let mut repo_ids_by_url: HashMap<String, RepoId> = HashMap::new();
        let mut members: Vec<Project> = Vec::new();
        for (index, spec) in projects.iter().enumerate() {
            let repo_id = *repo_ids_by_url
                .entry(spec.clone_url.clone())
                .or_insert_with(|| {
                    let id = RepoId(repos.len());
                    repos.push(Repo::new(
                        spec.clone_url.clone(),
                        workdir_root.join(format!("repo-{index}")),
                    ));
                    id
                });
            members.push(Project::new(spec.clone(), repo_id));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = EngineHandle::new(tx);
        let engine = Self {
            repos,
            repo_ids_by_url,
            projects: members,
            vcs,
            runtime,
            settings,
            handle: handle.clone(),
            rx,
        };
        Ok((engine, handle))
    }

    /// Runs the engine loop until shutdown or a fatal error.
    ///
    /// Starts the initial clones, then processes events in arrival
    /// order. After every event the cross-registry invariants are
    /// re-checked; a violation means a bug, and the loop stops
    /// accepting events and returns the diagnostic.
    ///
    /// # Errors
    ///
    /// Returns the first [`FatalError`] encountered.
    pub async fn run(mut self) -> Result<(), FatalError> {
        info!(
            repos = self.repos.len(),
            projects = self.projects.len(),
            "engine starting"
        );
        for index in 0..self.repos.len() {
            self.start_clone(RepoId(index));
        }
        while let Some(event) = self.rx.recv().await {
            if matches!(event, EngineEvent::Shutdown) {
                info!("shutdown requested");
                break;
            }
            let mut outcome = self.dispatch(event);
            if outcome.is_ok() {
                outcome = self.verify_invariants();
            }
            if let Err(fatal) = outcome {
                error!(error = %fatal, "fatal engine error; stopping");
                return Err(fatal);
            }
        }
        info!("engine stopped");
        Ok(())
    }

    fn dispatch(&mut self, event: EngineEvent) -> Result<(), FatalError> {
        match event {
            EngineEvent::Webhook { clone_url } => self.handle_webhook(&clone_url),
            EngineEvent::AdminRefresh { project_index } => self.handle_admin_refresh(project_index),
            EngineEvent::Status { reply } => {
                let _ = reply.send(self.snapshot());
                Ok(())
            }
            EngineEvent::Shutdown => Ok(()),
            EngineEvent::CloneFinished { repo, result } => self.handle_clone_finished(repo, result),
            EngineEvent::PullFinished { repo, result } => self.handle_pull_finished(repo, result),
            EngineEvent::BuildFinished { project, result } => {
                self.handle_build_finished(project, result)
            }
            EngineEvent::CreateFinished { project, result } => {
                self.handle_create_finished(project, result)
            }
            EngineEvent::ReadyFinished {
                project,
                handle,
                result,
            } => self.handle_ready_finished(project, handle, result),
            EngineEvent::StopFinished {
                project,
                handle,
                result,
            } => self.handle_stop_finished(project, handle, result),
        }
    }

    // ------------------------------------------------------------------
    // Repo handlers
    // ------------------------------------------------------------------

    fn handle_webhook(&mut self, clone_url: &str) -> Result<(), FatalError> {
        let Some(&repo_id) = self.repo_ids_by_url.get(clone_url) else {
            warn!(clone_url, "webhook for unknown repository; dropped");
            return Ok(());
        };
        let (state, lock_count, busy) = {
            let repo = &self.repos[repo_id.0];
            (repo.state, repo.lock_count, repo.busy)
        };
        match state {
            RepoState::Normal if lock_count == 0 => self.start_pull(repo_id),
            RepoState::Normal => {
                debug!(clone_url, lock_count, "builds in flight; update deferred");
                self.repos[repo_id.0].note_update_pending();
            }
            RepoState::Init if !busy => {
                info!(clone_url, "retrying initial clone");
                self.start_clone(repo_id);
            }
            RepoState::Init | RepoState::Updating => {
                debug!(clone_url, "update already in flight; coalescing");
                self.repos[repo_id.0].note_update_pending();
            }
        }
        Ok(())
    }

    fn handle_clone_finished(
        &mut self,
        repo_id: RepoId,
        result: Result<CommitId, AdapterError>,
    ) -> Result<(), FatalError> {
        let repo = &mut self.repos[repo_id.0];
        if repo.state != RepoState::Init || !repo.busy {
            warn!(repo = %repo.clone_url, state = %repo.state, "stale clone completion; dropped");
            return Ok(());
        }
        repo.busy = false;
        match result {
            Ok(commit) => {
                info!(repo = %repo.clone_url, commit = %commit, "initial clone complete");
                repo.commit = Some(commit);
                repo.state = RepoState::Normal;
                self.repo_entered_normal(repo_id, false)
            }
            Err(err) => {
                warn!(repo = %repo.clone_url, error = %err, "initial clone failed");
                if repo.update_pending {
                    repo.update_pending = false;
                    self.start_clone(repo_id);
                }
                Ok(())
            }
        }
    }

    fn handle_pull_finished(
        &mut self,
        repo_id: RepoId,
        result: Result<CommitId, AdapterError>,
    ) -> Result<(), FatalError> {
        let repo = &mut self.repos[repo_id.0];
        if repo.state != RepoState::Updating || !repo.busy {
            warn!(repo = %repo.clone_url, state = %repo.state, "stale pull completion; dropped");
            return Ok(());
        }
        repo.busy = false;
        match result {
            Ok(commit) => {
                let changed = repo.commit.as_ref() != Some(&commit);
                if changed {
                    info!(repo = %repo.clone_url, commit = %commit, "new commit observed");
                } else {
                    debug!(repo = %repo.clone_url, "pull returned the same commit; nothing to do");
                }
                repo.commit = Some(commit);
                repo.state = RepoState::Normal;
                self.repo_entered_normal(repo_id, changed)
            }
            Err(err) => {
                warn!(repo = %repo.clone_url, error = %err, "pull failed");
                repo.state = RepoState::Normal;
                self.repo_entered_normal(repo_id, false)
            }
        }
    }

    /// Processing common to every entry into the `normal` repo state.
    ///
    /// Order matters: a changed commit first fans out update requests,
    /// then queued projects acquire their locks, and only then is the
    /// deferred-pull flag consulted, so a coalesced pull waits for
    /// the builds it just enabled instead of starving them.
    fn repo_entered_normal(&mut self, repo_id: RepoId, changed: bool) -> Result<(), FatalError> {
        let member_ids: Vec<ProjectId> = self
            .projects
            .iter()
            .enumerate()
            .filter(|(_, p)| p.repo == repo_id)
            .map(|(index, _)| ProjectId(index))
            .collect();

        if changed {
            for &project_id in &member_ids {
                self.request_project_update(project_id);
            }
        }
        for &project_id in &member_ids {
            self.try_start_build(project_id)?;
        }

        let repo = &mut self.repos[repo_id.0];
        if repo.update_pending && repo.lock_count == 0 {
            repo.update_pending = false;
            self.start_pull(repo_id);
        }
        Ok(())
    }

    /// Releases one build lock and starts the deferred pull if this
    /// was the last one and an update is pending.
    fn release_build_lock(&mut self, repo_id: RepoId) -> Result<(), FatalError> {
        let dropped_to_zero = self.repos[repo_id.0].release()?;
        if dropped_to_zero && self.repos[repo_id.0].update_pending {
            self.repos[repo_id.0].update_pending = false;
            self.start_pull(repo_id);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Project handlers
    // ------------------------------------------------------------------

    fn handle_admin_refresh(&mut self, project_index: usize) -> Result<(), FatalError> {
        if project_index >= self.projects.len() {
            warn!(project_index, "refresh for unknown project; dropped");
            return Ok(());
        }
        let project_id = ProjectId(project_index);
        info!(project = %self.projects[project_index].spec.name, "admin refresh");
        self.request_project_update(project_id);
        self.try_start_build(project_id)
    }

    /// Requests an update pipeline run; used by repo fan-out and the
    /// admin refresh command.
    fn request_project_update(&mut self, project_id: ProjectId) {
        let project = &mut self.projects[project_id.0];
        match (project.state, project.phase) {
            (ProjectState::Normal, _) => {
                info!(project = %project.spec.name, "update queued");
                project.state = ProjectState::Updating;
                project.phase = PipelinePhase::Queued;
            }
            (_, PipelinePhase::Idle) => {
                info!(project = %project.spec.name, "update queued");
                project.phase = PipelinePhase::Queued;
            }
            (_, PipelinePhase::Queued) => {}
            (_, PipelinePhase::Building | PipelinePhase::Rotating) => {
                debug!(project = %project.spec.name, "pipeline busy; update deferred");
                project.update_pending = true;
            }
        }
    }

    /// Starts the build for a queued project if its repo is normal;
    /// otherwise the project stays queued and is kicked on the repo's
    /// next entered-normal edge.
    fn try_start_build(&mut self, project_id: ProjectId) -> Result<(), FatalError> {
        let (phase, repo_id) = {
            let project = &self.projects[project_id.0];
            (project.phase, project.repo)
        };
        if phase != PipelinePhase::Queued {
            return Ok(());
        }
        if self.repos[repo_id.0].state != RepoState::Normal {
            return Ok(());
        }
        self.repos[repo_id.0].acquire()?;
        let project = &mut self.projects[project_id.0];
        project.phase = PipelinePhase::Building;
        info!(project = %project.spec.name, "starting image build");
        self.spawn_build(project_id);
        Ok(())
    }

    fn handle_build_finished(
        &mut self,
        project_id: ProjectId,
        result: Result<BTreeSet<String>, AdapterError>,
    ) -> Result<(), FatalError> {
        let (phase, repo_id) = {
            let project = &self.projects[project_id.0];
            (project.phase, project.repo)
        };
        if phase != PipelinePhase::Building {
            warn!(
                project = %self.projects[project_id.0].spec.name,
                phase = %phase,
                "stale build completion; dropped"
            );
            return Ok(());
        }
        // The lock is dropped on both the success and the failure path,
        // before anything else happens.
        self.release_build_lock(repo_id)?;

        match result {
            Ok(hooks) => {
                let settings = self.settings;
                let project = &mut self.projects[project_id.0];
                info!(
                    project = %project.spec.name,
                    hooks = ?hooks,
                    "image built; beginning rotation"
                );
                project.hooks = hooks;
                project.phase = PipelinePhase::Rotating;
                project.rotation = Some(Rotation::begin(
                    &project.active,
                    project.spec.container_range.min,
                    settings.ready_retries,
                ));
                self.rotation_advance(project_id)
            }
            Err(err) => {
                let project = &mut self.projects[project_id.0];
                warn!(project = %project.spec.name, error = %err, "image build failed");
                if project.update_pending {
                    project.update_pending = false;
                    project.phase = PipelinePhase::Queued;
                    self.try_start_build(project_id)
                } else {
                    // Parked until the next commit notification.
                    project.phase = PipelinePhase::Idle;
                    Ok(())
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Rotation handlers
    // ------------------------------------------------------------------

    fn handle_create_finished(
        &mut self,
        project_id: ProjectId,
        result: Result<String, AdapterError>,
    ) -> Result<(), FatalError> {
        if self.projects[project_id.0].phase != PipelinePhase::Rotating {
            warn!(
                project = %self.projects[project_id.0].spec.name,
                "stale container-create completion; dropped"
            );
            return Ok(());
        }
        match result {
            Ok(raw) => {
                let handle = ContainerHandle::new(raw)?;
                let project = &mut self.projects[project_id.0];
                debug!(
                    project = %project.spec.name,
                    container = %handle,
                    "container created"
                );
                project.starting.insert(handle.clone());
                if project.has_ready_hook() {
                    let hook = project.spec.hook_dir.join(WAIT_READY_HOOK);
                    self.spawn_ready(project_id, handle, hook);
                    Ok(())
                } else {
                    self.promote(project_id, handle)
                }
            }
            Err(err) => {
                warn!(
                    project = %self.projects[project_id.0].spec.name,
                    error = %err,
                    "container creation failed"
                );
                self.rotation_failure(project_id, None)
            }
        }
    }

    fn handle_ready_finished(
        &mut self,
        project_id: ProjectId,
        handle: ContainerHandle,
        result: Result<(), AdapterError>,
    ) -> Result<(), FatalError> {
        {
            let project = &self.projects[project_id.0];
            if project.phase != PipelinePhase::Rotating || !project.starting.contains(&handle) {
                warn!(
                    project = %project.spec.name,
                    container = %handle,
                    "stale readiness completion; dropped"
                );
                return Ok(());
            }
        }
        match result {
            Ok(()) => {
                debug!(
                    project = %self.projects[project_id.0].spec.name,
                    container = %handle,
                    "container ready"
                );
                self.promote(project_id, handle)
            }
            Err(err) => {
                warn!(
                    project = %self.projects[project_id.0].spec.name,
                    container = %handle,
                    error = %err,
                    "readiness hook failed"
                );
                self.rotation_failure(project_id, Some(handle))
            }
        }
    }

    fn handle_stop_finished(
        &mut self,
        project_id: ProjectId,
        handle: ContainerHandle,
        result: Result<(), AdapterError>,
    ) -> Result<(), FatalError> {
        if let Err(err) = result {
            // The runtime owns actual reaping; nothing more to do here.
            warn!(
                project = %self.projects[project_id.0].spec.name,
                container = %handle,
                error = %err,
                "container stop failed"
            );
        }
        let (removed, rotating) = {
            let project = &mut self.projects[project_id.0];
            (
                project.ending.remove(&handle),
                project.phase == PipelinePhase::Rotating,
            )
        };
        if removed {
            if rotating {
                return self.rotation_advance(project_id);
            }
        } else {
            debug!(
                project = %self.projects[project_id.0].spec.name,
                container = %handle,
                "cleanup stop completed"
            );
        }
        Ok(())
    }

    /// Decides the next rotation step when no tracked operation is in
    /// flight.
    fn rotation_advance(&mut self, project_id: ProjectId) -> Result<(), FatalError> {
        enum Step {
            Create,
            StopOld(ContainerHandle),
            Finish,
            Wait,
        }
        let step = {
            let project = &mut self.projects[project_id.0];
            let max = project.spec.container_range.max;
            let active_len = project.active.len();
            let ending_empty = project.ending.is_empty();
            let rotation = Self::rotation_mut(project)?;
            if rotation.aborting {
                if active_len > max {
                    match rotation.old.pop_front() {
                        Some(old) => Step::StopOld(old),
                        None => Step::Finish,
                    }
                } else if ending_empty {
                    Step::Finish
                } else {
                    Step::Wait
                }
            } else if rotation.remaining_new > 0 {
                Step::Create
            } else if ending_empty {
                Step::Finish
            } else {
                Step::Wait
            }
        };
        match step {
            Step::Create => {
                self.spawn_create(project_id);
                Ok(())
            }
            Step::StopOld(old) => self.begin_stop(project_id, old),
            Step::Finish => self.finish_rotation(project_id),
            Step::Wait => Ok(()),
        }
    }

    /// Moves a ready container into `active` and stops one old
    /// container if any remain to be replaced.
    fn promote(
        &mut self,
        project_id: ProjectId,
        handle: ContainerHandle,
    ) -> Result<(), FatalError> {
        let old = {
            let project = &mut self.projects[project_id.0];
            project.starting.remove(&handle);
            project.active.push(handle);
            let rotation = Self::rotation_mut(project)?;
            rotation.remaining_new -= 1;
            rotation.old.pop_front()
        };
        match old {
            Some(old) => self.begin_stop(project_id, old),
            None => self.rotation_advance(project_id),
        }
    }

    /// Handles a failed container start: terminate the nascent
    /// container (if one exists), then retry or abort per the budget.
    fn rotation_failure(
        &mut self,
        project_id: ProjectId,
        failed: Option<ContainerHandle>,
    ) -> Result<(), FatalError> {
        if let Some(handle) = failed {
            self.projects[project_id.0].starting.remove(&handle);
            self.spawn_stop_task(project_id, handle);
        }
        let retry = {
            let project = &mut self.projects[project_id.0];
            Self::rotation_mut(project)?.consume_retry()
        };
        if retry {
            info!(
                project = %self.projects[project_id.0].spec.name,
                "retrying container start"
            );
            self.spawn_create(project_id);
            Ok(())
        } else {
            warn!(
                project = %self.projects[project_id.0].spec.name,
                "startup retry budget exhausted; aborting rotation"
            );
            let project = &mut self.projects[project_id.0];
            Self::rotation_mut(project)?.aborting = true;
            self.rotation_advance(project_id)
        }
    }

    /// Moves an old container from `active` to `ending` and asks the
    /// runtime to stop it.
    fn begin_stop(
        &mut self,
        project_id: ProjectId,
        handle: ContainerHandle,
    ) -> Result<(), FatalError> {
        let project = &mut self.projects[project_id.0];
        match project.active.iter().position(|h| *h == handle) {
            Some(position) => {
                project.active.remove(position);
            }
            None => {
                return Err(FatalError::Invariant(format!(
                    "project `{}`: rotation snapshot names container {} which is not active",
                    project.spec.name, handle
                )));
            }
        }
        project.ending.insert(handle.clone());
        debug!(
            project = %project.spec.name,
            container = %handle,
            "stopping replaced container"
        );
        self.spawn_stop_task(project_id, handle);
        Ok(())
    }

    /// Ends the rotation and re-enters `normal` (or parks an initial
    /// bring-up that never reached the minimum fleet size).
    fn finish_rotation(&mut self, project_id: ProjectId) -> Result<(), FatalError> {
        let project = &mut self.projects[project_id.0];
        project.rotation = None;
        let min = project.spec.container_range.min;
        if project.active.len() < min {
            warn!(
                project = %project.spec.name,
                active = project.active.len(),
                min,
                "fleet below minimum after aborted bring-up; parked until the next update"
            );
            if project.update_pending {
                // A commit arrived mid-bring-up; retry with it.
                project.update_pending = false;
                project.phase = PipelinePhase::Queued;
                return self.try_start_build(project_id);
            }
            project.phase = PipelinePhase::Idle;
            return Ok(());
        }
        self.project_entered_normal(project_id)
    }

    /// Processing common to every entry into the `normal` project
    /// state: drain the pending flag into a fresh pipeline run.
    fn project_entered_normal(&mut self, project_id: ProjectId) -> Result<(), FatalError> {
        let project = &mut self.projects[project_id.0];
        project.state = ProjectState::Normal;
        project.phase = PipelinePhase::Idle;
        info!(
            project = %project.spec.name,
            active = project.active.len(),
            "project fleet is current"
        );
        if project.update_pending {
            project.update_pending = false;
            project.state = ProjectState::Updating;
            project.phase = PipelinePhase::Queued;
            return self.try_start_build(project_id);
        }
        Ok(())
    }

    fn rotation_mut(project: &mut Project) -> Result<&mut Rotation, FatalError> {
        let name = project.spec.name.clone();
        project.rotation.as_mut().ok_or_else(|| {
            FatalError::Invariant(format!(
                "project `{name}` is rotating but has no rotation bookkeeping"
            ))
        })
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    fn start_clone(&mut self, repo_id: RepoId) {
        let repo = &mut self.repos[repo_id.0];
        repo.busy = true;
        info!(repo = %repo.clone_url, dir = %repo.workdir.display(), "cloning repository");
        let vcs = Arc::clone(&self.vcs);
        let url = repo.clone_url.clone();
        let dir = repo.workdir.clone();
        let tx = self.handle.clone();
        tokio::spawn(async move {
            let result = async {
                vcs.clone_repo(&url, &dir).await?;
                vcs.get_commit(&dir).await
            }
            .await;
            tx.send(EngineEvent::CloneFinished {
                repo: repo_id,
                result,
            });
        });
    }

    fn start_pull(&mut self, repo_id: RepoId) {
        let repo = &mut self.repos[repo_id.0];
        repo.state = RepoState::Updating;
        repo.busy = true;
        info!(repo = %repo.clone_url, "pulling repository");
        let vcs = Arc::clone(&self.vcs);
        let dir = repo.workdir.clone();
        let tx = self.handle.clone();
        tokio::spawn(async move {
            let result = vcs.pull(&dir).await;
            tx.send(EngineEvent::PullFinished {
                repo: repo_id,
                result,
            });
        });
    }

    fn spawn_build(&self, project_id: ProjectId) {
        let project = &self.projects[project_id.0];
        let runtime = Arc::clone(&self.runtime);
        let tag = project.spec.name.clone();
        let recipe = project.spec.dockerfile.clone();
        let hook_dir = project.spec.hook_dir.clone();
        let context_dir = self.repos[project.repo.0].workdir.clone();
        let tx = self.handle.clone();
        tokio::spawn(async move {
            let result = async {
                runtime.build(&tag, &recipe, &context_dir).await?;
                let entries = runtime.list_dir(&tag, &hook_dir).await?;
                Ok::<_, AdapterError>(entries.into_iter().collect::<BTreeSet<String>>())
            }
            .await;
            tx.send(EngineEvent::BuildFinished {
                project: project_id,
                result,
            });
        });
    }

    fn spawn_create(&self, project_id: ProjectId) {
        let runtime = Arc::clone(&self.runtime);
        let tag = self.projects[project_id.0].spec.name.clone();
        let tx = self.handle.clone();
        tokio::spawn(async move {
            let result = runtime.create(&tag).await;
            tx.send(EngineEvent::CreateFinished {
                project: project_id,
                result,
            });
        });
    }

    fn spawn_ready(&self, project_id: ProjectId, handle: ContainerHandle, hook: PathBuf) {
        let runtime = Arc::clone(&self.runtime);
        let tx = self.handle.clone();
        tokio::spawn(async move {
            let cmd = vec![hook.to_string_lossy().into_owned()];
            let result = runtime.exec(&handle, &cmd).await.map(|_| ());
            tx.send(EngineEvent::ReadyFinished {
                project: project_id,
                handle,
                result,
            });
        });
    }

    fn spawn_stop_task(&self, project_id: ProjectId, handle: ContainerHandle) {
        let runtime = Arc::clone(&self.runtime);
        let tx = self.handle.clone();
        tokio::spawn(async move {
            let result = runtime.stop(&handle).await;
            tx.send(EngineEvent::StopFinished {
                project: project_id,
                handle,
                result,
            });
        });
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            repos: self
                .repos
                .iter()
                .map(|repo| RepoStatus {
                    clone_url: repo.clone_url.clone(),
                    state: repo.state,
                    commit: repo.commit.as_ref().map(|c| c.as_str().to_string()),
                    update_pending: repo.update_pending,
                    lock_count: repo.lock_count,
                })
                .collect(),
            projects: self
                .projects
                .iter()
                .enumerate()
                .map(|(index, project)| ProjectStatus {
                    index,
                    name: project.spec.name.clone(),
                    clone_url: project.spec.clone_url.clone(),
                    state: project.state,
                    phase: project.phase,
                    update_pending: project.update_pending,
                    hooks: project.hooks.iter().cloned().collect(),
                    active: project.active.len(),
                    starting: project.starting.len(),
                    ending: project.ending.len(),
                })
                .collect(),
        }
    }

    /// Cross-registry consistency checks, run after every event. Any
    /// failure is a bug in the engine, not an operational condition.
    fn verify_invariants(&self) -> Result<(), FatalError> {
        for (index, repo) in self.repos.iter().enumerate() {
            let fail = |message: String| Err(FatalError::Invariant(message));
            if repo.lock_count > 0 && repo.state != RepoState::Normal {
                return fail(format!(
                    "repo `{}` holds {} locks while {}",
                    repo.clone_url, repo.lock_count, repo.state
                ));
            }
            if repo.state == RepoState::Updating && !repo.busy {
                return fail(format!(
                    "repo `{}` is updating with no pull in flight",
                    repo.clone_url
                ));
            }
            let building = self
                .projects
                .iter()
                .filter(|p| p.repo == RepoId(index) && p.phase == PipelinePhase::Building)
                .count();
            if building != repo.lock_count as usize {
                return fail(format!(
                    "repo `{}` lock count {} disagrees with {} builds in flight",
                    repo.clone_url, repo.lock_count, building
                ));
            }
        }
        for project in &self.projects {
            let name = &project.spec.name;
            let fail = |message: String| Err(FatalError::Invariant(message));
            for handle in &project.active {
                if project.starting.contains(handle) || project.ending.contains(handle) {
                    return fail(format!(
                        "project `{name}`: container {handle} is in more than one set"
                    ));
                }
            }
            if project.starting.intersection(&project.ending).count() > 0 {
                return fail(format!(
                    "project `{name}`: starting and ending sets overlap"
                ));
            }
            if (project.phase == PipelinePhase::Rotating) != project.rotation.is_some() {
                return fail(format!(
                    "project `{name}`: phase {} disagrees with rotation bookkeeping",
                    project.phase
                ));
            }
            let range = project.spec.container_range;
            match project.state {
                ProjectState::Normal => {
                    if project.phase != PipelinePhase::Idle {
                        return fail(format!(
                            "project `{name}` is normal with pipeline phase {}",
                            project.phase
                        ));
                    }
                    if project.update_pending {
                        return fail(format!("project `{name}` is normal with update pending"));
                    }
                    if !project.starting.is_empty() || !project.ending.is_empty() {
                        return fail(format!(
                            "project `{name}` is normal with containers in transition"
                        ));
                    }
                    if project.active.len() < range.min || project.active.len() > range.max {
                        return fail(format!(
                            "project `{name}` is normal with {} active containers outside [{}, {}]",
                            project.active.len(),
                            range.min,
                            range.max
                        ));
                    }
                }
                ProjectState::Updating => {
                    if project.active.len() + project.starting.len() < range.min {
                        return fail(format!(
                            "project `{name}` fell below its minimum fleet size during an update"
                        ));
                    }
                }
                ProjectState::Init => {}
            }
        }
        Ok(())
    }
}
