//! Event intake: the queue vocabulary and the sending half.
//!
//! The engine consumes a single mpsc queue. Inbound commands come from
//! the HTTP surfaces (webhook, admin refresh, status) and shutdown
//! handling; completion events are posted by the background tasks the
//! engine itself spawned. Background tasks never touch engine state;
//! a typed completion event is their only output.

use std::collections::BTreeSet;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::adapter::{AdapterError, CommitId, ContainerHandle};
use crate::engine::project::ProjectId;
use crate::engine::repo::RepoId;
use crate::status::StatusSnapshot;

/// Everything the engine loop can be asked to process.
#[derive(Debug)]
pub enum EngineEvent {
    /// A source-hosting webhook announced new commits on `clone_url`.
    Webhook {
        /// Clone URL named by the webhook payload.
        clone_url: String,
    },
    /// Operator asked for a redeploy of one project.
    AdminRefresh {
        /// Configuration index of the project.
        project_index: usize,
    },
    /// Read-only snapshot request.
    Status {
        /// Reply channel; dropped replies are ignored.
        reply: oneshot::Sender<StatusSnapshot>,
    },
    /// Stop the engine loop.
    Shutdown,

    /// Initial clone (plus commit resolution) finished.
    CloneFinished {
        /// Repo the clone belongs to.
        repo: RepoId,
        /// Cloned commit, or the failure.
        result: Result<CommitId, AdapterError>,
    },
    /// Fast-forward pull finished.
    PullFinished {
        /// Repo the pull belongs to.
        repo: RepoId,
        /// New commit, or the failure.
        result: Result<CommitId, AdapterError>,
    },
    /// Image build plus hook discovery finished.
    BuildFinished {
        /// Project the build belongs to.
        project: ProjectId,
        /// Discovered hook names, or the failure.
        result: Result<BTreeSet<String>, AdapterError>,
    },
    /// Container creation finished.
    CreateFinished {
        /// Project the container belongs to.
        project: ProjectId,
        /// Raw runtime handle (validated by the engine), or the
        /// failure.
        result: Result<String, AdapterError>,
    },
    /// Readiness hook execution finished.
    ReadyFinished {
        /// Project the container belongs to.
        project: ProjectId,
        /// The container that was probed.
        handle: ContainerHandle,
        /// Zero exit, or the failure.
        result: Result<(), AdapterError>,
    },
    /// Container stop finished.
    StopFinished {
        /// Project the container belonged to.
        project: ProjectId,
        /// The container that was stopped.
        handle: ContainerHandle,
        /// Confirmation, or the failure.
        result: Result<(), AdapterError>,
    },
}

/// Sending half of the intake queue.
///
/// Cloned freely: the HTTP surfaces hold one, and every background
/// task gets one to post its completion event. Sends after the engine
/// has stopped are dropped silently; in-flight task results are
/// discarded once the loop exits.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Posts an event to the intake queue.
    pub(crate) fn send(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            debug!("engine stopped; event dropped");
        }
    }

    /// Announces new commits on `clone_url`.
    pub fn webhook(&self, clone_url: impl Into<String>) {
        self.send(EngineEvent::Webhook {
            clone_url: clone_url.into(),
        });
    }

    /// Requests a redeploy of the project at `project_index`.
    pub fn admin_refresh(&self, project_index: usize) {
        self.send(EngineEvent::AdminRefresh { project_index });
    }

    /// Requests the engine loop to stop.
    pub fn shutdown(&self) {
        self.send(EngineEvent::Shutdown);
    }

    /// Fetches a consistent snapshot of all repos and projects.
    ///
    /// Returns `None` if the engine has stopped.
    pub async fn status(&self) -> Option<StatusSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Status { reply });
        rx.await.ok()
    }
}
