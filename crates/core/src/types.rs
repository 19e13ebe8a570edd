//! Core data model: File, Span, Embedding, Enrichment, Entity, Relation,
//! IndexStatus, WorkItem.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// A repository-relative file known to the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub rel_path: String,
    pub content_hash: String,
    pub mtime: i64,
    pub language: String,
    pub sidecar_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Function,
    Method,
    Class,
    Module,
    TopLevelBlock,
    DocSection,
}

/// A content-addressed semantic unit of a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub file_path: String,
    pub symbol: String,
    pub kind: SpanKind,
    pub start_line: usize,
    pub end_line: usize,
    pub byte_start: usize,
    pub byte_end: usize,
    pub language: String,
    /// `H(normalized_content)` — primary identity key, independent of location.
    pub span_hash: String,
    /// Raw span text, indexed into FTS by the store. Not part of identity.
    pub content: String,
}

impl Span {
    pub fn key(&self) -> (usize, usize) {
        (self.byte_start, self.byte_end)
    }
}

/// A fixed-dimension vector keyed by `(span_hash, model_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub span_hash: String,
    pub model_id: String,
    pub vector: Vec<f32>,
}

/// A `{field, lines}` back-reference into the span that produced an
/// enrichment field, used to audit model output against the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub field: String,
    pub lines: (usize, usize),
}

/// A structured annotation of a span, keyed by `span_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub span_hash: String,
    pub summary: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub side_effects: Vec<String>,
    pub pitfalls: Vec<String>,
    pub usage_snippet: Option<String>,
    pub tags: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub model_id: String,
    pub schema_version: u32,
    pub created_at: i64,
}

pub const ENRICHMENT_SCHEMA_VERSION: u32 = 1;

impl Enrichment {
    /// Checks the fields every committed enrichment must carry. Missing or
    /// empty fields fail validation.
    pub fn validate_required_fields(&self) -> std::result::Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("summary is empty".to_string());
        }
        if self.inputs.is_empty() && self.outputs.is_empty() {
            return Err("inputs and outputs both empty".to_string());
        }
        Ok(())
    }

    pub fn has_non_latin1(&self) -> bool {
        self.summary.chars().any(|c| c as u32 > 0xFF)
            || self.pitfalls.iter().any(|p| p.chars().any(|c| c as u32 > 0xFF))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Function,
    Method,
    Class,
    Module,
    Variable,
    DocSection,
}

/// A named construct derived from spans during graph build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub qualified_name: String,
    pub kind: EntityKind,
    /// Weak reference to the defining span.
    pub span_hash: String,
    pub importance: f64,
}

impl Entity {
    /// Base importance before edge/size boosts: classes > functions > variables.
    pub fn base_kind_score(kind: EntityKind) -> f64 {
        match kind {
            EntityKind::Class | EntityKind::Module => 3.0,
            EntityKind::Function | EntityKind::Method => 2.0,
            EntityKind::DocSection => 1.5,
            EntityKind::Variable => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Calls,
    Imports,
    Extends,
    References,
    Requires,
    WarnsAbout,
}

/// A typed directed edge between entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub kind: RelationKind,
    pub evidence_file: String,
    pub evidence_line: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Fresh,
    Stale,
    Rebuilding,
    Error,
}

/// Per-repository freshness record. Persisted atomically; read by every
/// retrieval operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub repo: String,
    pub index_state: IndexState,
    pub last_indexed_at: i64,
    pub last_indexed_commit: Option<String>,
    pub schema_version: u32,
    pub last_error: Option<String>,
}

pub const STORE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    Index,
    Embed,
    Enrich,
}

/// A queue entry tying a span (or file) to a pending operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub span_hash: String,
    pub kind: WorkKind,
    pub attempt_count: u32,
    pub last_attempt_at: Option<i64>,
    pub cooldown_until: Option<i64>,
}

/// The symmetric-difference result of a `replace_spans` call: which spans
/// were added, deleted, or left unchanged by the file's new content.
#[derive(Debug, Clone, Default)]
pub struct SpanDiff {
    pub added: Vec<Span>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl SpanDiff {
    pub fn compute(old_spans: &[Span], new_spans: Vec<Span>) -> Self {
        let old_hashes: HashSet<&str> = old_spans.iter().map(|s| s.span_hash.as_str()).collect();
        let new_hashes: HashSet<&str> = new_spans.iter().map(|s| s.span_hash.as_str()).collect();

        let deleted = old_hashes.difference(&new_hashes).map(|h| h.to_string()).collect();
        let unchanged = old_hashes.intersection(&new_hashes).map(|h| h.to_string()).collect();
        let added = new_spans.into_iter().filter(|s| !old_hashes.contains(s.span_hash.as_str())).collect();

        SpanDiff { added, deleted, unchanged }
    }
}

/// A registered repository: display name plus its root path.
#[derive(Debug, Clone)]
pub struct RepoHandle {
    pub name: String,
    pub root: PathBuf,
}
