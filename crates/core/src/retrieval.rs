//! Retrieval pipeline: freshness gate, lexical candidates, dense
//! re-scoring, rank fusion, signal boosts, result envelope. Also hosts the
//! derived operations `where_used`, `lineage`, and `inspect` that reuse
//! the same graph/store plumbing.
//!
//! Signal boosts (path-pattern weighting, extension, graph-neighbor count)
//! are additive contributions layered on top of the fused lexical/dense
//! score. The scored symbol matcher for `where_used` is [`crate::fuzzy`].
//! Freshness uses [`crate::git`]; the fallback path uses [`crate::scan`].

use crate::config::RagConfig;
use crate::fuzzy;
use crate::git;
use crate::graph::SchemaGraph;
use crate::scan;
use crate::store::Store;
use crate::types::{Enrichment, IndexState, IndexStatus, RelationKind};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    RagGraph,
    LocalFallback,
}

#[derive(Debug, Clone)]
pub struct QueryFilters {
    pub path_glob: Option<String>,
    pub language: Option<String>,
}

impl Default for QueryFilters {
    fn default() -> Self {
        QueryFilters { path_glob: None, language: None }
    }
}

#[derive(Debug, Clone)]
pub struct ResultItem {
    pub path: String,
    pub symbol: String,
    pub lines: (usize, usize),
    pub span_hash: String,
    pub score_raw: f64,
    pub score_normalized: u8,
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryEnvelope {
    pub source: ResultSource,
    pub freshness_state: IndexState,
    pub index_status: Option<IndexStatus>,
    pub results: Vec<ResultItem>,
}

const LEXICAL_CANDIDATE_COUNT: usize = 200;

/// Step 1 — decide whether the index can be trusted for this query.
pub fn freshness_gate(repo_root: &Path, status: Option<&IndexStatus>) -> (ResultSource, IndexState) {
    let Some(status) = status else {
        return (ResultSource::LocalFallback, IndexState::Error);
    };
    let head_matches = match git::current_head(repo_root) {
        Some(head) => status.last_indexed_commit.as_deref() == Some(head.as_str()),
        None => true, // no git repo: fall through to mtime-based trust (not re-verified here)
    };
    let was_fresh = matches!(status.index_state, IndexState::Fresh | IndexState::Rebuilding);
    let trustworthy = was_fresh && head_matches;
    if trustworthy {
        (ResultSource::RagGraph, status.index_state)
    } else if was_fresh && !head_matches {
        // The index believes it's fresh, but HEAD moved since the last sync
        // wrote that status: report it as stale rather than forwarding the
        // on-disk state, which would wrongly read as still-fresh.
        (ResultSource::LocalFallback, IndexState::Stale)
    } else {
        (ResultSource::LocalFallback, status.index_state)
    }
}

/// Runs the full pipeline: freshness gate, lexical + dense scoring, rank
/// fusion, signal boosts. Falls back to a live grep scan when the index is
/// untrustworthy.
pub fn query(
    store: &Store,
    graph: &SchemaGraph,
    config: &RagConfig,
    repo_root: &Path,
    status: Option<&IndexStatus>,
    query_text: &str,
    filters: &QueryFilters,
    embed_query: impl FnOnce(&str) -> Option<Vec<f32>>,
    k: usize,
) -> crate::error::Result<QueryEnvelope> {
    let (source, freshness_state) = freshness_gate(repo_root, status);

    if source == ResultSource::LocalFallback {
        let hits = scan::live_fallback_search(repo_root, query_text, k);
        let results = hits
            .into_iter()
            .map(|m| ResultItem {
                path: m.path,
                symbol: String::new(),
                lines: (m.line, m.line),
                span_hash: String::new(),
                score_raw: m.score,
                score_normalized: normalize_score(m.score, 0.0, 50.0),
                summary: None,
            })
            .collect();
        return Ok(QueryEnvelope { source, freshness_state, index_status: status.cloned(), results });
    }

    // Step 2 — lexical candidates.
    let lexical = store.search_lexical(query_text, LEXICAL_CANDIDATE_COUNT)?;
    if lexical.is_empty() {
        return Ok(QueryEnvelope { source, freshness_state, index_status: status.cloned(), results: Vec::new() });
    }
    let candidate_hashes: Vec<String> = lexical.iter().map(|(h, _)| h.clone()).collect();

    // Step 3 — dense re-scoring, bounded to the lexical candidate set.
    let dense: Vec<(String, f32)> = match embed_query(query_text) {
        Some(vector) => store.search_vector(&vector, &config.embedding_model, &candidate_hashes, candidate_hashes.len())?,
        None => Vec::new(),
    };

    // Step 4 — rank fusion (weighted reciprocal-rank fusion across both
    // rankings). Weights come from `[routing]` (routing_weights's "lexical"
    // and "dense" keys); defaults bias lexical so a query for a technical
    // identifier isn't drowned out by a looser dense match.
    let lexical_weight = signal_weight(config, "lexical", DEFAULT_LEXICAL_WEIGHT);
    let dense_weight = signal_weight(config, "dense", DEFAULT_DENSE_WEIGHT);
    let mut fused: Vec<(String, f64)> = Vec::new();
    let lexical_ranks = rank_index(&lexical.iter().map(|(h, _)| h.clone()).collect::<Vec<_>>());
    let dense_ranks = rank_index(&dense.iter().map(|(h, _)| h.clone()).collect::<Vec<_>>());
    for hash in &candidate_hashes {
        let lex_rank = lexical_ranks.get(hash).copied();
        let dense_rank = dense_ranks.get(hash).copied();
        let mut rrf = 0.0;
        if let Some(r) = lex_rank {
            rrf += lexical_weight / (60.0 + r as f64);
        }
        if let Some(r) = dense_rank {
            rrf += dense_weight / (60.0 + r as f64);
        }
        fused.push((hash.clone(), rrf));
    }

    // Step 5 — signal boosts.
    let mut boosted: Vec<(String, f64)> = Vec::new();
    for (hash, base_score) in fused {
        let Some(span) = store.spans_for_hash(&hash)? else { continue };
        if let Some(glob) = &filters.path_glob {
            if !glob_matches(glob, &span.file_path) {
                continue;
            }
        }
        if let Some(lang) = &filters.language {
            if &span.language != lang {
                continue;
            }
        }

        let mut score = base_score;
        score += path_weight_boost(config, &span.file_path);
        score += extension_boost(&span.language);

        let qualified = format!("{}::{}", span.file_path, span.symbol);
        let neighbor_boost = graph.neighbors(&qualified, Some(RelationKind::Calls)).len() as f64 * 0.01;
        score += neighbor_boost;

        boosted.push((hash, score));
    }
    boosted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    boosted.truncate(k);

    let max_score = boosted.first().map(|(_, s)| *s).unwrap_or(1.0).max(0.0001);
    let mut results = Vec::new();
    for (hash, score) in boosted {
        let Some(span) = store.spans_for_hash(&hash)? else { continue };
        let summary = store.enrichment_for(&hash)?.map(|e: Enrichment| e.summary);
        results.push(ResultItem {
            path: span.file_path,
            symbol: span.symbol,
            lines: (span.start_line, span.end_line),
            span_hash: hash,
            score_raw: score,
            score_normalized: normalize_score(score, 0.0, max_score),
            summary,
        });
    }

    Ok(QueryEnvelope { source, freshness_state, index_status: status.cloned(), results })
}

const DEFAULT_LEXICAL_WEIGHT: f64 = 1.5;
const DEFAULT_DENSE_WEIGHT: f64 = 1.0;

/// Reads a named rank-fusion weight from `[routing]`, falling back to
/// `default` when the operator hasn't configured that key.
fn signal_weight(config: &RagConfig, key: &str, default: f64) -> f64 {
    config.routing_weights.get(key).copied().unwrap_or(default)
}

fn rank_index(ordered_hashes: &[String]) -> std::collections::HashMap<String, usize> {
    ordered_hashes.iter().enumerate().map(|(i, h)| (h.clone(), i + 1)).collect()
}

fn normalize_score(raw: f64, min: f64, max: f64) -> u8 {
    if max <= min {
        return 0;
    }
    (((raw - min) / (max - min)).clamp(0.0, 1.0) * 100.0) as u8
}

/// Additive path-pattern boost from `[enrichment.path_weights]`, penalizing
/// `tests/`/`vendor/` by default via the absence of a configured weight.
fn path_weight_boost(config: &RagConfig, path: &str) -> f64 {
    for (pattern, weight) in &config.path_weights {
        if glob_matches(pattern, path) {
            return (*weight as f64 - 5.0) / 10.0;
        }
    }
    if path.starts_with("tests/") || path.contains("/vendor/") {
        -0.05
    } else {
        0.0
    }
}

fn extension_boost(language: &str) -> f64 {
    if language == "markdown" {
        0.0
    } else {
        0.02
    }
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    let prefix = pattern.trim_end_matches("**").trim_end_matches('*');
    path.starts_with(prefix)
}

/// `where_used(symbol)`: resolve against the entity table with the scored
/// matcher, then enumerate inbound CALLS/REFERENCES edges with evidence.
pub fn where_used<'a>(graph: &'a SchemaGraph, symbol: &str) -> Vec<&'a crate::types::Relation> {
    let names: Vec<&str> = graph.entities.iter().map(|e| e.qualified_name.as_str()).collect();
    let ranked = fuzzy::rank(symbol, names);
    let Some(best) = ranked.first() else { return Vec::new() };
    graph
        .relations
        .iter()
        .filter(|r| r.to == best.candidate && matches!(r.kind, RelationKind::Calls | RelationKind::References))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineageDirection {
    Callers,
    Callees,
}

/// `lineage(symbol, direction, depth)`: BFS over the graph, capped at `max_depth`.
pub fn lineage(graph: &SchemaGraph, symbol: &str, direction: LineageDirection, max_depth: usize) -> Vec<String> {
    use std::collections::{HashSet, VecDeque};
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((symbol.to_string(), 0usize));
    visited.insert(symbol.to_string());
    let mut order = Vec::new();

    while let Some((current, depth)) = queue.pop_front() {
        if depth > 0 {
            order.push(current.clone());
        }
        if depth >= max_depth {
            continue;
        }
        for relation in &graph.relations {
            let next = match direction {
                LineageDirection::Callers if relation.to == current => Some(relation.from.clone()),
                LineageDirection::Callees if relation.from == current => Some(relation.to.clone()),
                _ => None,
            };
            if let Some(next) = next {
                if visited.insert(next.clone()) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
    }
    order
}

#[derive(Debug)]
pub struct InspectResult {
    pub span: crate::types::Span,
    pub enrichment: Option<Enrichment>,
    pub top_callers: Vec<String>,
    pub top_callees: Vec<String>,
}

/// `inspect(symbol|path)`: defining span, enrichment, and top neighbors by
/// importance. Rejects paths outside the repo root.
pub fn inspect(store: &Store, graph: &SchemaGraph, repo_root: &Path, symbol_or_path: &str) -> crate::error::Result<Option<InspectResult>> {
    if symbol_or_path.contains('/') || symbol_or_path.contains('.') {
        crate::path_safety::validate_path(repo_root, symbol_or_path)?;
    }

    let names: Vec<&str> = graph.entities.iter().map(|e| e.qualified_name.as_str()).collect();
    let ranked = fuzzy::rank(symbol_or_path, names);
    let Some(best) = ranked.first() else { return Ok(None) };
    let entity = graph.entity(best.candidate).expect("ranked from graph.entities");
    let Some(span) = store.spans_for_hash(&entity.span_hash)? else { return Ok(None) };
    let enrichment = store.enrichment_for(&entity.span_hash)?;

    let mut callers: Vec<(String, f64)> = graph
        .neighbors(&entity.qualified_name, Some(RelationKind::Calls))
        .into_iter()
        .filter(|r| r.to == entity.qualified_name)
        .filter_map(|r| graph.entity(&r.from).map(|e| (e.qualified_name.clone(), e.importance)))
        .collect();
    callers.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut callees: Vec<(String, f64)> = graph
        .neighbors(&entity.qualified_name, Some(RelationKind::Calls))
        .into_iter()
        .filter(|r| r.from == entity.qualified_name)
        .filter_map(|r| graph.entity(&r.to).map(|e| (e.qualified_name.clone(), e.importance)))
        .collect();
    callees.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    Ok(Some(InspectResult {
        span,
        enrichment,
        top_callers: callers.into_iter().map(|(n, _)| n).collect(),
        top_callees: callees.into_iter().map(|(n, _)| n).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndexState;

    #[test]
    fn freshness_gate_trusts_matching_head() {
        let dir = tempfile::TempDir::new().unwrap();
        let status = IndexStatus {
            repo: "r".into(),
            index_state: IndexState::Fresh,
            last_indexed_at: 0,
            last_indexed_commit: None,
            schema_version: 1,
            last_error: None,
        };
        // No git repo present => head_matches defaults true, so a Fresh
        // status with no commit recorded is still trusted.
        let (source, _) = freshness_gate(dir.path(), Some(&status));
        assert_eq!(source, ResultSource::RagGraph);
    }

    #[test]
    fn freshness_gate_falls_back_with_no_status() {
        let dir = tempfile::TempDir::new().unwrap();
        let (source, state) = freshness_gate(dir.path(), None);
        assert_eq!(source, ResultSource::LocalFallback);
        assert_eq!(state, IndexState::Error);
    }

    #[test]
    fn normalize_score_clamps_into_0_100() {
        assert_eq!(normalize_score(5.0, 0.0, 10.0), 50);
        assert_eq!(normalize_score(-5.0, 0.0, 10.0), 0);
        assert_eq!(normalize_score(100.0, 0.0, 10.0), 100);
    }

    #[test]
    fn signal_weight_defaults_bias_lexical_over_dense() {
        let config = RagConfig::default();
        assert!(signal_weight(&config, "lexical", DEFAULT_LEXICAL_WEIGHT) > signal_weight(&config, "dense", DEFAULT_DENSE_WEIGHT));
    }

    #[test]
    fn signal_weight_reads_operator_override_from_routing_table() {
        let mut config = RagConfig::default();
        config.routing_weights.insert("dense".to_string(), 3.0);
        assert_eq!(signal_weight(&config, "dense", DEFAULT_DENSE_WEIGHT), 3.0);
        // An unconfigured key still falls back to its default.
        assert_eq!(signal_weight(&config, "lexical", DEFAULT_LEXICAL_WEIGHT), DEFAULT_LEXICAL_WEIGHT);
    }

    /// Scaling a path-pattern weight by a positive amount must only ever
    /// move its boost in the same direction, never cross over the boost
    /// from a different, unmatched pattern with a fixed weight -- pinning
    /// the combiner signal this way keeps result ordering stable under
    /// config tuning.
    #[test]
    fn path_weight_boost_scales_monotonically_with_configured_weight() {
        let mut low = RagConfig::default();
        low.path_weights.insert("docs/**".to_string(), 3);
        let mut high = RagConfig::default();
        high.path_weights.insert("docs/**".to_string(), 9);

        let boost_low = path_weight_boost(&low, "docs/readme.py");
        let boost_high = path_weight_boost(&high, "docs/readme.py");
        assert!(boost_high > boost_low, "raising the configured weight must raise the boost");

        // A path that doesn't match any configured pattern and isn't
        // tests/vendor gets a fixed zero boost regardless of what other
        // patterns are configured -- scaling one signal doesn't leak into
        // another path's score.
        assert_eq!(path_weight_boost(&low, "core/engine.py"), 0.0);
        assert_eq!(path_weight_boost(&high, "core/engine.py"), 0.0);
    }

    #[test]
    fn lineage_bfs_respects_max_depth() {
        let graph = SchemaGraph {
            entities: Vec::new(),
            relations: vec![
                crate::types::Relation { from: "a".into(), to: "b".into(), kind: RelationKind::Calls, evidence_file: "f".into(), evidence_line: 1, confidence: 1.0 },
                crate::types::Relation { from: "b".into(), to: "c".into(), kind: RelationKind::Calls, evidence_file: "f".into(), evidence_line: 1, confidence: 1.0 },
            ],
        };
        let one_hop = lineage(&graph, "a", LineageDirection::Callees, 1);
        assert_eq!(one_hop, vec!["b".to_string()]);
        let two_hop = lineage(&graph, "a", LineageDirection::Callees, 2);
        assert_eq!(two_hop, vec!["b".to_string(), "c".to_string()]);
    }
}
