//! Live filesystem fallback scanning for `LOCAL_FALLBACK` retrieval
//! results: when the index is stale or unavailable, grep the working tree
//! directly instead of trusting the span store or schema graph.
//!
//! Walks with `ignore::WalkBuilder` (parallel, hidden/gitignore-aware) and
//! scores hits with a BM25-lite formula suited to raw grep hits with no
//! enrichment or graph context available.

use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct GrepMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
    pub score: f64,
}

const DEFAULT_SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", "build", ".venv", "__pycache__"];

pub fn walk_files(root: &Path) -> Vec<PathBuf> {
    let skip: HashSet<String> = DEFAULT_SKIP_DIRS.iter().map(|s| s.to_string()).collect();
    let results: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

    WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .filter_entry(move |entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !skip.contains(name.as_ref());
            }
            true
        })
        .build_parallel()
        .run(|| {
            let results = &results;
            Box::new(move |entry| {
                let Ok(entry) = entry else { return ignore::WalkState::Continue };
                if entry.file_type().is_some_and(|ft| ft.is_file()) {
                    results.lock().unwrap().push(entry.path().to_path_buf());
                }
                ignore::WalkState::Continue
            })
        });

    results.into_inner().unwrap()
}

fn is_definition_file(ext: &str) -> bool {
    matches!(ext, "h" | "hpp" | "hxx" | "pyi")
}

/// BM25-lite relevance score for a grep hit, weighted by query-term IDF.
/// Weights term frequency, filename/definition-file bonuses, match density,
/// and how early in the file the first hit lands.
fn grep_relevance_score(
    match_count: usize,
    total_lines: usize,
    filename_lower: &str,
    ext: &str,
    terms_lower: &[String],
    terms_matched: usize,
    first_match_line: usize,
    idf_weights: &[f64],
) -> f64 {
    let tf = match_count as f64 / (match_count as f64 + 1.5);
    let avg_idf = if idf_weights.is_empty() { 1.0 } else { idf_weights.iter().sum::<f64>() / idf_weights.len() as f64 };
    let density = match_count as f64 / (total_lines as f64).sqrt().max(1.0);
    let filename_bonus = if terms_lower.iter().any(|t| filename_lower.contains(t.as_str())) { 15.0 } else { 0.0 };
    let def_bonus = if is_definition_file(ext) { 5.0 } else { 0.0 };
    let position_bonus = if total_lines > 30 && first_match_line < 30 { 3.0 * (1.0 - first_match_line as f64 / 30.0) } else { 0.0 };
    let base = tf * 15.0 * avg_idf + filename_bonus + def_bonus + density + position_bonus;

    let term_count = terms_lower.len();
    if term_count <= 1 || idf_weights.is_empty() {
        return base;
    }
    let mut sorted_idfs = idf_weights.to_vec();
    sorted_idfs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let matched_idf_sum: f64 = sorted_idfs.iter().take(terms_matched).sum();
    let total_idf_sum: f64 = sorted_idfs.iter().sum();
    let coverage = if total_idf_sum > 0.0 { matched_idf_sum / total_idf_sum } else { 1.0 };
    base * (0.3 + 0.7 * coverage * coverage)
}

/// Grep the working tree for `query`'s whitespace-split terms and return
/// ranked matches, highest score first, truncated to `limit`.
pub fn live_fallback_search(repo_root: &Path, query: &str, limit: usize) -> Vec<GrepMatch> {
    let terms_lower: Vec<String> = query.split_whitespace().map(|t| t.to_lowercase()).collect();
    if terms_lower.is_empty() {
        return Vec::new();
    }
    let idf_weights: Vec<f64> = terms_lower.iter().map(|_| 1.0).collect();

    let mut matches = Vec::new();
    for path in walk_files(repo_root) {
        let Ok(content) = std::fs::read_to_string(&path) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let filename_lower = path.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let rel_path = path.strip_prefix(repo_root).unwrap_or(&path).to_string_lossy().replace('\\', "/");

        let mut match_count = 0usize;
        let mut terms_present: HashSet<&str> = HashSet::new();
        let mut first_match_line = usize::MAX;
        let mut first_match_text = String::new();

        for (idx, line) in lines.iter().enumerate() {
            let line_lower = line.to_lowercase();
            let mut hit = false;
            for term in &terms_lower {
                if line_lower.contains(term.as_str()) {
                    terms_present.insert(term.as_str());
                    hit = true;
                }
            }
            if hit {
                match_count += 1;
                if first_match_line == usize::MAX {
                    first_match_line = idx;
                    first_match_text = line.trim().to_string();
                }
            }
        }

        if match_count == 0 {
            continue;
        }

        let score = grep_relevance_score(
            match_count,
            lines.len().max(1),
            &filename_lower,
            ext,
            &terms_lower,
            terms_present.len(),
            first_match_line,
            &idf_weights,
        );

        matches.push(GrepMatch { path: rel_path, line: first_match_line + 1, text: first_match_text, score });
    }

    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    matches.truncate(limit);
    matches
}
