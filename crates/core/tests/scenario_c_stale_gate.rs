//! Moving the git HEAD without re-syncing must make the freshness gate
//! fall back to a live scan, and report the state as stale rather than
//! forwarding the persisted "fresh" status.

mod helpers;

use helpers::ScratchRepo;
use rag_core::config::RagConfig;
use rag_core::graph::SchemaGraph;
use rag_core::retrieval::{self, QueryFilters, ResultSource};
use rag_core::types::IndexState;

#[test]
fn head_drift_without_resync_falls_back_to_live_scan() {
    let repo = ScratchRepo::from_fixture("tiny_repo");
    let root = repo.root();
    let status_before = helpers::load_status(&root.to_path_buf()).expect("status written by initial sync");
    assert_eq!(status_before.index_state, IndexState::Fresh);

    // Advance HEAD by committing an untracked change, without running
    // another sync cycle -- the persisted IndexStatus still names the old
    // commit.
    std::fs::write(root.join("c.py"), "def quux():\n    return 3\n").unwrap();
    repo.commit("drift HEAD");

    let status = helpers::load_status(&root.to_path_buf()).unwrap();
    let graph = SchemaGraph::default();

    let envelope = retrieval::query(
        &repo.controller.store,
        &graph,
        &RagConfig::default(),
        root,
        Some(&status),
        "bar",
        &QueryFilters::default(),
        |_| None,
        10,
    )
    .unwrap();

    assert_eq!(envelope.source, ResultSource::LocalFallback);
    assert_eq!(envelope.freshness_state, IndexState::Stale);
    assert!(!envelope.results.is_empty(), "live scan should still find 'bar' textually");
}
