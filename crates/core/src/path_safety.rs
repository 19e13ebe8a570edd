//! Path validation for every boundary call that accepts a path.
//!
//! Rejects empty paths, null bytes, `..` components, and absolute paths up
//! front, then canonicalizes and checks the result still lives under the
//! repo root — `canonicalize` alone won't catch a null byte before the OS
//! call rejects it, so that check happens first. Errors carry a typed
//! `RagError::PathSecurity` so callers get the `PATH_TRAVERSAL` code on
//! the wire.

use crate::error::{RagError, Result};
use std::path::{Path, PathBuf};

/// Validate `rel_path` against `repo_root` and return its canonical absolute
/// path. Rejects null bytes, `..` segments, absolute paths, and any result
/// that escapes the root after resolution.
pub fn validate_path(repo_root: &Path, rel_path: &str) -> Result<PathBuf> {
    if rel_path.is_empty() {
        return Err(RagError::PathSecurity("empty path".to_string()));
    }
    if rel_path.as_bytes().contains(&0) {
        return Err(RagError::PathSecurity("null byte in path".to_string()));
    }
    if rel_path.contains("..") || rel_path.starts_with('/') {
        return Err(RagError::PathSecurity(format!("rejected path: {rel_path}")));
    }

    let joined = repo_root.join(rel_path);
    let root_canonical = repo_root
        .canonicalize()
        .map_err(|e| RagError::PathSecurity(format!("repo root not found: {e}")))?;

    // The target may not exist yet (e.g. a path about to be written), so
    // canonicalize what exists and re-join the remaining tail rather than
    // failing outright.
    let canonical = canonicalize_best_effort(&joined)?;

    if !canonical.starts_with(&root_canonical) {
        return Err(RagError::PathSecurity(format!("path escapes repository root: {rel_path}")));
    }
    Ok(canonical)
}

fn canonicalize_best_effort(path: &Path) -> Result<PathBuf> {
    if let Ok(c) = path.canonicalize() {
        return Ok(c);
    }
    let parent = path.parent().ok_or_else(|| RagError::PathSecurity("path has no parent".to_string()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| RagError::PathSecurity("path has no file name".to_string()))?;
    let parent_canonical = parent
        .canonicalize()
        .map_err(|e| RagError::PathSecurity(format!("parent not found: {e}")))?;
    Ok(parent_canonical.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn rejects_dotdot() {
        let dir = TempDir::new().unwrap();
        assert!(validate_path(dir.path(), "../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_absolute() {
        let dir = TempDir::new().unwrap();
        assert!(validate_path(dir.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn rejects_null_byte() {
        let dir = TempDir::new().unwrap();
        assert!(validate_path(dir.path(), "foo\0bar").is_err());
    }

    #[test]
    fn accepts_plain_relative_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let resolved = validate_path(dir.path(), "a.py").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn accepts_not_yet_existing_file_under_root() {
        let dir = TempDir::new().unwrap();
        let resolved = validate_path(dir.path(), "new_file.py").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }
}
