//! Content normalization and span-hash computation.
//!
//! `span_hash` must be robust to trailing-whitespace and line-ending
//! differences so trivial whitespace edits don't churn enrichments.

use sha2::{Digest, Sha256};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Strip trailing whitespace per line and unify line endings to `\n`.
pub fn normalize(content: &str) -> String {
    content
        .replace("\r\n", "\n")
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `span_hash = H(normalized_content)`. Content alone, not the symbol name:
/// two spans with byte-identical normalized bodies are the same identity
/// regardless of what they're called (e.g. two Markdown doc sections under
/// different headings with the same body), so they share one enrichment
/// and embedding lifecycle instead of getting independent ones.
pub fn span_hash(content: &str) -> String {
    let normalized = normalize(content);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content hash for a whole file, used by `File.content_hash`. Not an
/// identity key anything else is keyed by, so the fast non-cryptographic
/// hash is fine here.
pub fn file_hash(content: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
