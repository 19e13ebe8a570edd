//! Test harness for end-to-end scenario tests.
//!
//! Copies a named fixture directory into a temp dir, `git init`s it so
//! freshness-gate HEAD comparisons work, and wires up a `SyncController`
//! against it directly (no CLI process involved).

use rag_core::config::RagConfig;
use rag_core::store::Store;
use rag_core::sync::SyncController;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

pub struct ScratchRepo {
    pub controller: SyncController,
    _temp_dir: TempDir,
}

impl ScratchRepo {
    /// Builds a scratch repo from `tests/fixtures/<name>`, git-initializes
    /// it, and runs one full sync cycle.
    pub fn from_fixture(name: &str) -> Self {
        let fixture_src = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
        assert!(fixture_src.exists(), "fixture '{name}' not found at {}", fixture_src.display());

        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let root = temp_dir.path();
        copy_dir_recursive(&fixture_src, root);
        git(root, &["init"]);
        git(root, &["add", "-A"]);
        git(root, &["-c", "user.email=test@test.com", "-c", "user.name=Test", "commit", "-m", "initial"]);

        let store = Store::open_in_memory().expect("failed to open store");
        let mut controller = SyncController::new(root.to_path_buf(), store, RagConfig::default());
        controller.scan_full(1_000).expect("initial sync failed");

        ScratchRepo { controller, _temp_dir: temp_dir }
    }

    pub fn root(&self) -> &Path {
        &self.controller.repo_root
    }

    /// Overwrites a file relative to the repo root and re-syncs it.
    pub fn edit(&mut self, rel_path: &str, content: &str, now: i64) {
        let abs = self.root().join(rel_path);
        std::fs::write(&abs, content).expect("failed to write fixture edit");
        self.controller.run_cycle(&[abs], now).expect("sync cycle failed");
    }

    /// Commits the current working tree state, advancing HEAD.
    pub fn commit(&self, message: &str) {
        git(self.root(), &["add", "-A"]);
        git(self.root(), &["-c", "user.email=test@test.com", "-c", "user.name=Test", "commit", "-m", message]);
    }
}

fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(root)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap_or_else(|e| panic!("failed to run git {args:?}: {e}"));
    assert!(status.success(), "git {args:?} failed");
}

fn copy_dir_recursive(src: &Path, dst: &Path) {
    for entry in std::fs::read_dir(src).expect("failed to read fixture dir") {
        let entry = entry.expect("failed to read fixture entry");
        let target = dst.join(entry.file_name());
        if entry.file_type().expect("failed to stat fixture entry").is_dir() {
            std::fs::create_dir_all(&target).expect("failed to create fixture subdir");
            copy_dir_recursive(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).expect("failed to copy fixture file");
        }
    }
}

#[allow(dead_code)]
pub fn load_status(root: &PathBuf) -> Option<rag_core::types::IndexStatus> {
    let content = std::fs::read_to_string(root.join(".llmc").join("rag_index_status.json")).ok()?;
    serde_json::from_str(&content).ok()
}
