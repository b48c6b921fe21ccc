//! Orchestration engine for the capstan deployment control plane.
//!
//! capstan watches source repositories, rebuilds container images when
//! commits land, and performs rolling replacement of running containers
//! so that user code is always served by healthy containers running the
//! latest committed revision.
//!
//! This crate owns the core: the repo and project state machines, the
//! pending-update coalescing mechanism, the repo lock-count protocol,
//! and the rolling container rotation. Everything that talks to the
//! outside world (the version-control tool, the container runtime, the
//! HTTP surfaces) sits behind the capability traits in [`adapter`] and
//! lives in the daemon crate (or, for tests, in [`adapter::fake`]).
//!
//! # Architecture
//!
//! ```text
//! webhook ──► event intake ──► engine loop ──► background tasks
//!                                  ▲   (clone / pull / build / create /
//!                                  │    exec / stop via the adapters)
//!                                  └──────── completion events
//! ```
//!
//! All registry state is owned by the single engine loop; background
//! tasks never touch it and communicate results exclusively by posting
//! completion events back to the intake queue.

pub mod adapter;
pub mod config;
pub mod engine;
pub mod status;

pub use adapter::{AdapterError, CommitId, ContainerHandle, RuntimeAdapter, VcsAdapter};
pub use config::{ConfigError, ContainerRange, EngineSettings, ProjectConfig};
pub use engine::{
    Engine, EngineEvent, EngineHandle, FatalError, PipelinePhase, ProjectState, RepoState,
};
pub use status::{ProjectStatus, RepoStatus, StatusSnapshot};
