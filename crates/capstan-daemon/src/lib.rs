//! Process shell for the capstan deployment control plane.
//!
//! The orchestration engine lives in `capstan-core`; this crate owns
//! everything around it: the configuration file, the real CLI-backed
//! VCS and runtime adapters, and the two HTTP surfaces (public webhook
//! receiver, private status and admin surface).

pub mod config_file;
pub mod http;
pub mod runtime_docker;
pub mod vcs_git;

mod subprocess;
