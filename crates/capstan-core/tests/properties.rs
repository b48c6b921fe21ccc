//! Property tests: the engine survives arbitrary command scripts.
//!
//! Each case drives a three-project, two-repo control plane with a
//! random interleaving of remote pushes, webhooks (known and unknown),
//! and admin refreshes, then waits for quiescence. The engine re-checks
//! its registry invariants after every event it processes (lock
//! counts, set disjointness, fleet bounds) and dies on violation,
//! which [`common::wait_until`] turns into a test failure. On top of
//! that, each case asserts the coalescing guarantee: every repo ends
//! on a commit at least as new as the newest one a webhook announced.

mod common;

use std::sync::Arc;

use capstan_core::adapter::fake::{FakeRuntime, FakeVcs};
use capstan_core::StatusSnapshot;
use proptest::prelude::*;

use common::{launch_with, project, settled, wait_until};

const URLS: [&str; 2] = ["https://example/alpha", "https://example/beta"];

#[derive(Debug, Clone)]
enum Cmd {
    /// Advance the remote head of one repo.
    Push(usize),
    /// Announce the current head of one repo.
    Webhook(usize),
    /// Webhook for a URL nobody tracks.
    UnknownWebhook,
    /// Admin refresh; index 3 is deliberately out of range.
    Refresh(usize),
}

fn cmd_strategy() -> impl Strategy<Value = Cmd> {
    prop_oneof![
        (0..URLS.len()).prop_map(Cmd::Push),
        (0..URLS.len()).prop_map(Cmd::Webhook),
        Just(Cmd::UnknownWebhook),
        (0..4usize).prop_map(Cmd::Refresh),
    ]
}

fn commit_number(snapshot: &StatusSnapshot, url: &str) -> u32 {
    snapshot
        .repo(url)
        .and_then(|r| r.commit.as_deref())
        .and_then(|c| c.strip_prefix('c'))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

async fn run_script(script: Vec<Cmd>) {
    let vcs = Arc::new(FakeVcs::new());
    let mut heads = [1u32; 2];
    for url in URLS {
        vcs.push(url, "c1");
    }
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_hooks("p1", &["wait_ready"]);

    let projects = [
        project("p0", URLS[0], [1, 2]),
        project("p1", URLS[0], [2, 3]),
        project("p2", URLS[1], [1, 1]),
    ];
    let handle = launch_with(&projects, Arc::clone(&vcs), Arc::clone(&runtime));
    wait_until(&handle, "startup to settle", settled).await;

    // The newest commit each repo is obliged to eventually observe.
    let mut promised = [1u32; 2];
    for cmd in script {
        match cmd {
            Cmd::Push(url_index) => {
                heads[url_index] += 1;
                vcs.push(URLS[url_index], &format!("c{}", heads[url_index]));
            }
            Cmd::Webhook(url_index) => {
                promised[url_index] = heads[url_index];
                handle.webhook(URLS[url_index]);
            }
            Cmd::UnknownWebhook => handle.webhook("https://example/untracked"),
            Cmd::Refresh(project_index) => handle.admin_refresh(project_index),
        }
    }

    let snapshot = wait_until(&handle, "the script to quiesce", |s| {
        settled(s)
            && URLS
                .iter()
                .enumerate()
                .all(|(url_index, url)| commit_number(s, url) >= promised[url_index])
    })
    .await;

    for (project_status, spec) in snapshot.projects.iter().zip(&projects) {
        let range = spec.container_range;
        assert!(
            (range.min..=range.max).contains(&project_status.active),
            "project {} settled with {} active containers outside [{}, {}]",
            project_status.name,
            project_status.active,
            range.min,
            range.max
        );
        assert_eq!(project_status.starting, 0);
        assert_eq!(project_status.ending, 0);
        assert!(!project_status.update_pending);
    }
    for repo_status in &snapshot.repos {
        assert_eq!(repo_status.lock_count, 0);
        assert!(!repo_status.update_pending);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn engine_survives_arbitrary_command_scripts(script in prop::collection::vec(cmd_strategy(), 0..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("test runtime");
        runtime.block_on(run_script(script));
    }
}
