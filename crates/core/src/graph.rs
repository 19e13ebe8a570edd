//! Schema graph: entities and typed relations derived from spans.
//!
//! Symbol resolution prefers same-file, then imported-file, then
//! directory-proximity matches. Edges are keyed by `span_hash` rather than
//! file path so they survive code motion. Doc-to-code
//! `REFERENCES`/`REQUIRES`/`WARNS_ABOUT` edges come from backtick/identifier
//! scanning over Markdown spans.

use crate::types::{Entity, EntityKind, Relation, RelationKind, Span, SpanKind};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// The full entity/relation graph, rebuilt from scratch each sync cycle
/// and serialized as a single snapshot. No partial incremental update.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SchemaGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl SchemaGraph {
    pub fn build(spans: &[Span]) -> Self {
        let entities = build_entities(spans);
        let by_name = build_name_lookup(&entities);

        let mut relations = Vec::new();
        relations.extend(extract_call_edges(spans, &entities, &by_name));
        relations.extend(extract_doc_edges(spans, &entities, &by_name));

        SchemaGraph { entities, relations }
    }

    pub fn neighbors(&self, qualified_name: &str, kind: Option<RelationKind>) -> Vec<&Relation> {
        self.relations
            .iter()
            .filter(|r| (r.from == qualified_name || r.to == qualified_name) && kind.map(|k| k == r.kind).unwrap_or(true))
            .collect()
    }

    pub fn entity(&self, qualified_name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.qualified_name == qualified_name)
    }
}

fn qualified_name(span: &Span) -> String {
    format!("{}::{}", span.file_path, span.symbol)
}

fn entity_kind(kind: SpanKind) -> EntityKind {
    match kind {
        SpanKind::Function => EntityKind::Function,
        SpanKind::Method => EntityKind::Method,
        SpanKind::Class => EntityKind::Class,
        SpanKind::Module | SpanKind::TopLevelBlock => EntityKind::Module,
        SpanKind::DocSection => EntityKind::DocSection,
    }
}

fn build_entities(spans: &[Span]) -> Vec<Entity> {
    spans
        .iter()
        .map(|span| {
            let kind = entity_kind(span.kind);
            let size_boost = (span.content.len() as f64 / 500.0).min(2.0);
            let importance = Entity::base_kind_score(kind) + size_boost;
            Entity {
                qualified_name: qualified_name(span),
                kind,
                span_hash: span.span_hash.clone(),
                importance,
            }
        })
        .collect()
}

/// Maps a bare symbol name to every entity with that name, ordered by the
/// same-file > same-directory > anywhere preference used at resolution
/// time.
fn build_name_lookup(entities: &[Entity]) -> HashMap<String, Vec<usize>> {
    let mut lookup: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, entity) in entities.iter().enumerate() {
        if let Some(bare) = entity.qualified_name.rsplit("::").next() {
            lookup.entry(bare.to_string()).or_default().push(idx);
        }
    }
    lookup
}

fn resolve(bare_name: &str, from_file: &str, entities: &[Entity], by_name: &HashMap<String, Vec<usize>>) -> Option<usize> {
    let candidates = by_name.get(bare_name)?;
    if candidates.is_empty() {
        return None;
    }
    if let Some(&same_file) = candidates.iter().find(|&&idx| entities[idx].qualified_name.starts_with(&format!("{from_file}::"))) {
        return Some(same_file);
    }
    let from_dir = from_file.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    if let Some(&same_dir) = candidates
        .iter()
        .find(|&&idx| entities[idx].qualified_name.rsplit_once("::").map(|(f, _)| f).unwrap_or("").starts_with(from_dir))
    {
        return Some(same_dir);
    }
    candidates.first().copied()
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap())
}

fn extract_call_edges(spans: &[Span], entities: &[Entity], by_name: &HashMap<String, Vec<usize>>) -> Vec<Relation> {
    let mut relations = Vec::new();
    for span in spans {
        if matches!(span.kind, SpanKind::DocSection) {
            continue;
        }
        let from = qualified_name(span);
        for cap in identifier_regex().captures_iter(&span.content) {
            let name = &cap[1];
            if name == span.symbol {
                continue; // recursive self-call noise filtered at this stage
            }
            if let Some(target_idx) = resolve(name, &span.file_path, entities, by_name) {
                let target = &entities[target_idx];
                if target.qualified_name == from {
                    continue;
                }
                relations.push(Relation {
                    from: from.clone(),
                    to: target.qualified_name.clone(),
                    kind: RelationKind::Calls,
                    evidence_file: span.file_path.clone(),
                    evidence_line: span.start_line,
                    confidence: 0.6,
                });
            }
        }
    }
    relations
}

fn backtick_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([A-Za-z_][A-Za-z0-9_:.]*)`").unwrap())
}

fn warns_about_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(warning|caution|danger|gotcha)\b").unwrap())
}

fn requires_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(requires?|prerequisite|depends on)\b").unwrap())
}

/// Detects inline references to code symbols inside doc spans and emits
/// `REFERENCES` edges; recognized admonition patterns ("warning", "requires")
/// emit `WARNS_ABOUT`/`REQUIRES` edges to the same target.
fn extract_doc_edges(spans: &[Span], entities: &[Entity], by_name: &HashMap<String, Vec<usize>>) -> Vec<Relation> {
    let mut relations = Vec::new();
    for span in spans {
        if !matches!(span.kind, SpanKind::DocSection) {
            continue;
        }
        let from = qualified_name(span);
        let has_warning = warns_about_regex().is_match(&span.content);
        let has_requires = requires_regex().is_match(&span.content);

        for cap in backtick_regex().captures_iter(&span.content) {
            let name = cap[1].rsplit("::").next().unwrap_or(&cap[1]);
            let Some(target_idx) = resolve(name, &span.file_path, entities, by_name) else { continue };
            let target = &entities[target_idx];
            if matches!(target.kind, EntityKind::DocSection) {
                continue;
            }
            relations.push(Relation {
                from: from.clone(),
                to: target.qualified_name.clone(),
                kind: RelationKind::References,
                evidence_file: span.file_path.clone(),
                evidence_line: span.start_line,
                confidence: 0.5,
            });
            if has_warning {
                relations.push(Relation {
                    from: from.clone(),
                    to: target.qualified_name.clone(),
                    kind: RelationKind::WarnsAbout,
                    evidence_file: span.file_path.clone(),
                    evidence_line: span.start_line,
                    confidence: 0.4,
                });
            }
            if has_requires {
                relations.push(Relation {
                    from: from.clone(),
                    to: target.qualified_name.clone(),
                    kind: RelationKind::Requires,
                    evidence_file: span.file_path.clone(),
                    evidence_line: span.start_line,
                    confidence: 0.4,
                });
            }
        }
    }
    relations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(file: &str, symbol: &str, kind: SpanKind, content: &str) -> Span {
        Span {
            file_path: file.into(),
            symbol: symbol.into(),
            kind,
            start_line: 1,
            end_line: 2,
            byte_start: 0,
            byte_end: content.len(),
            language: "python".into(),
            span_hash: format!("{file}:{symbol}"),
            content: content.into(),
        }
    }

    #[test]
    fn call_edge_resolves_same_file_first() {
        let spans = vec![
            span("a.py", "helper", SpanKind::Function, "def helper(): pass"),
            span("a.py", "main", SpanKind::Function, "def main(): helper()"),
            span("b.py", "helper", SpanKind::Function, "def helper(): pass"),
        ];
        let graph = SchemaGraph::build(&spans);
        let calls: Vec<_> = graph.relations.iter().filter(|r| r.kind == RelationKind::Calls).collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to, "a.py::helper");
    }

    #[test]
    fn doc_section_emits_references_and_warns_about() {
        let spans = vec![
            span("a.py", "connect", SpanKind::Function, "def connect(): pass"),
            span(
                "README.md",
                "# Connecting",
                SpanKind::DocSection,
                "Warning: calling `connect` twice leaks a socket.",
            ),
        ];
        let graph = SchemaGraph::build(&spans);
        assert!(graph.relations.iter().any(|r| r.kind == RelationKind::References && r.to == "a.py::connect"));
        assert!(graph.relations.iter().any(|r| r.kind == RelationKind::WarnsAbout && r.to == "a.py::connect"));
    }

    #[test]
    fn entity_importance_ranks_class_above_function_above_variable() {
        let spans = vec![
            span("a.py", "Widget", SpanKind::Class, "class Widget: pass"),
            span("a.py", "make", SpanKind::Function, "def make(): pass"),
        ];
        let graph = SchemaGraph::build(&spans);
        let class_score = graph.entity("a.py::Widget").unwrap().importance;
        let fn_score = graph.entity("a.py::make").unwrap().importance;
        assert!(class_score > fn_score);
    }
}
