//! Span store: a single local sqlite database holding files, spans,
//! embeddings, enrichments, the FTS index, and the work queue.
//!
//! Concurrency is single-writer/multi-reader: every mutating method takes
//! `&mut self` and runs inside an immediate-mode transaction so a write
//! failure aborts cleanly and never leaves a partial file update visible.

use crate::error::{RagError, Result};
use crate::types::{
    Embedding, Enrichment, Evidence, Span, SpanDiff, SpanKind, WorkItem, WorkKind,
    ENRICHMENT_SCHEMA_VERSION, STORE_SCHEMA_VERSION,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Store { conn };
        store.init_schema()?;
        store.check_schema_version()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Store { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);

            CREATE TABLE IF NOT EXISTS files (
                rel_path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                mtime INTEGER NOT NULL,
                language TEXT NOT NULL,
                sidecar_path TEXT
            );

            CREATE TABLE IF NOT EXISTS spans (
                span_hash TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                byte_start INTEGER NOT NULL,
                byte_end INTEGER NOT NULL,
                language TEXT NOT NULL,
                content TEXT NOT NULL,
                FOREIGN KEY(file_path) REFERENCES files(rel_path) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_spans_file ON spans(file_path);

            CREATE VIRTUAL TABLE IF NOT EXISTS spans_fts USING fts5(
                span_hash UNINDEXED, symbol, content, tokenize='unicode61 remove_diacritics 2'
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS enrichment_fts USING fts5(
                span_hash UNINDEXED, summary, tokenize='unicode61 remove_diacritics 2'
            );

            CREATE TABLE IF NOT EXISTS embeddings (
                span_hash TEXT NOT NULL,
                model_id TEXT NOT NULL,
                vector BLOB NOT NULL,
                PRIMARY KEY(span_hash, model_id),
                FOREIGN KEY(span_hash) REFERENCES spans(span_hash) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS enrichments (
                span_hash TEXT PRIMARY KEY,
                summary TEXT NOT NULL,
                inputs_json TEXT NOT NULL,
                outputs_json TEXT NOT NULL,
                side_effects_json TEXT NOT NULL,
                pitfalls_json TEXT NOT NULL,
                usage_snippet TEXT,
                tags_json TEXT NOT NULL,
                evidence_json TEXT NOT NULL,
                model_id TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY(span_hash) REFERENCES spans(span_hash) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS work_items (
                span_hash TEXT NOT NULL,
                kind TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_attempt_at INTEGER,
                cooldown_until INTEGER,
                PRIMARY KEY(span_hash, kind),
                FOREIGN KEY(span_hash) REFERENCES spans(span_hash) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS fuzzy_reuse_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                old_span_hash TEXT NOT NULL,
                new_span_hash TEXT NOT NULL,
                reused_at INTEGER NOT NULL
            );
            ",
        )?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_meta(key, value) VALUES ('schema_version', ?1)",
            params![STORE_SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    fn check_schema_version(&self) -> Result<()> {
        let stored: String = self
            .conn
            .query_row("SELECT value FROM schema_meta WHERE key = 'schema_version'", [], |r| r.get(0))?;
        let stored: u32 = stored.parse().map_err(|_| RagError::Store("corrupt schema_version".to_string()))?;
        if stored != STORE_SCHEMA_VERSION {
            return Err(RagError::Store(format!(
                "unsupported schema version {stored}, expected {STORE_SCHEMA_VERSION}"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------

    pub fn upsert_file(&mut self, path: &str, hash: &str, mtime: i64, language: &str, sidecar: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO files(rel_path, content_hash, mtime, language, sidecar_path)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(rel_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                mtime = excluded.mtime,
                language = excluded.language,
                sidecar_path = excluded.sidecar_path",
            params![path, hash, mtime, language, sidecar],
        )?;
        Ok(())
    }

    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        self.conn.execute("DELETE FROM files WHERE rel_path = ?1", params![path])?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Spans — the differential replace contract
    // -----------------------------------------------------------------

    /// Replace all spans of `file` with `new_spans`, touching only the
    /// symmetric difference: `old \ new` is deleted, `new \ old` is
    /// inserted, the intersection (and its embeddings/enrichments) is left
    /// untouched. Runs inside one transaction so readers never observe a
    /// half-updated file.
    pub fn replace_spans(&mut self, file: &str, new_spans: Vec<Span>) -> Result<SpanDiff> {
        let tx = self.conn.transaction()?;

        let old_spans: Vec<Span> = {
            let mut stmt = tx.prepare(
                "SELECT span_hash, file_path, symbol, kind, start_line, end_line, byte_start, byte_end, language, content
                 FROM spans WHERE file_path = ?1",
            )?;
            let rows = stmt.query_map(params![file], row_to_span)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let diff = SpanDiff::compute(&old_spans, new_spans);

        for deleted_hash in &diff.deleted {
            tx.execute("DELETE FROM spans WHERE span_hash = ?1", params![deleted_hash])?;
            tx.execute("DELETE FROM spans_fts WHERE span_hash = ?1", params![deleted_hash])?;
        }

        for span in &diff.added {
            tx.execute(
                "INSERT INTO spans(span_hash, file_path, symbol, kind, start_line, end_line, byte_start, byte_end, language, content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    span.span_hash,
                    span.file_path,
                    span.symbol,
                    kind_to_str(span.kind),
                    span.start_line as i64,
                    span.end_line as i64,
                    span.byte_start as i64,
                    span.byte_end as i64,
                    span.language,
                    span.content,
                ],
            )?;
            tx.execute(
                "INSERT INTO spans_fts(span_hash, symbol, content) VALUES (?1, ?2, ?3)",
                params![span.span_hash, span.symbol, span.content],
            )?;
            tx.execute(
                "INSERT INTO work_items(span_hash, kind, attempt_count) VALUES (?1, 'embed', 0)
                 ON CONFLICT(span_hash, kind) DO NOTHING",
                params![span.span_hash],
            )?;
            tx.execute(
                "INSERT INTO work_items(span_hash, kind, attempt_count) VALUES (?1, 'enrich', 0)
                 ON CONFLICT(span_hash, kind) DO NOTHING",
                params![span.span_hash],
            )?;
        }

        tx.commit()?;
        Ok(diff)
    }

    pub fn spans_for_hash(&self, span_hash: &str) -> Result<Option<Span>> {
        self.conn
            .query_row(
                "SELECT span_hash, file_path, symbol, kind, start_line, end_line, byte_start, byte_end, language, content
                 FROM spans WHERE span_hash = ?1",
                params![span_hash],
                row_to_span,
            )
            .optional()
            .map_err(RagError::from)
    }

    pub fn spans_for_file(&self, file: &str) -> Result<Vec<Span>> {
        let mut stmt = self.conn.prepare(
            "SELECT span_hash, file_path, symbol, kind, start_line, end_line, byte_start, byte_end, language, content
             FROM spans WHERE file_path = ?1",
        )?;
        let rows = stmt.query_map(params![file], row_to_span)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn span_exists(&self, span_hash: &str) -> Result<bool> {
        let count: i64 =
            self.conn.query_row("SELECT COUNT(*) FROM spans WHERE span_hash = ?1", params![span_hash], |r| r.get(0))?;
        Ok(count > 0)
    }

    // -----------------------------------------------------------------
    // Embeddings
    // -----------------------------------------------------------------

    pub fn write_embedding(&mut self, span_hash: &str, model_id: &str, vector: &[f32]) -> Result<()> {
        let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO embeddings(span_hash, model_id, vector) VALUES (?1, ?2, ?3)
             ON CONFLICT(span_hash, model_id) DO UPDATE SET vector = excluded.vector",
            params![span_hash, model_id, bytes],
        )?;
        tx.execute(
            "UPDATE work_items SET attempt_count = 0, cooldown_until = NULL WHERE span_hash = ?1 AND kind = 'embed'",
            params![span_hash],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn decode_vector(bytes: &[u8]) -> Vec<f32> {
        bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
    }

    // -----------------------------------------------------------------
    // Enrichments
    // -----------------------------------------------------------------

    pub fn write_enrichment(&mut self, record: &Enrichment) -> Result<()> {
        if !self.span_exists(&record.span_hash)? {
            return Err(RagError::NotFound(format!("span {} does not exist", record.span_hash)));
        }
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO enrichments(span_hash, summary, inputs_json, outputs_json, side_effects_json,
                pitfalls_json, usage_snippet, tags_json, evidence_json, model_id, schema_version, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(span_hash) DO UPDATE SET
                summary=excluded.summary, inputs_json=excluded.inputs_json, outputs_json=excluded.outputs_json,
                side_effects_json=excluded.side_effects_json, pitfalls_json=excluded.pitfalls_json,
                usage_snippet=excluded.usage_snippet, tags_json=excluded.tags_json,
                evidence_json=excluded.evidence_json, model_id=excluded.model_id,
                schema_version=excluded.schema_version, created_at=excluded.created_at",
            params![
                record.span_hash,
                record.summary,
                serde_json::to_string(&record.inputs)?,
                serde_json::to_string(&record.outputs)?,
                serde_json::to_string(&record.side_effects)?,
                serde_json::to_string(&record.pitfalls)?,
                record.usage_snippet,
                serde_json::to_string(&record.tags)?,
                serde_json::to_string(&record.evidence)?,
                record.model_id,
                record.schema_version,
                record.created_at,
            ],
        )?;
        tx.execute("DELETE FROM enrichment_fts WHERE span_hash = ?1", params![record.span_hash])?;
        tx.execute(
            "INSERT INTO enrichment_fts(span_hash, summary) VALUES (?1, ?2)",
            params![record.span_hash, record.summary],
        )?;
        tx.execute(
            "UPDATE work_items SET attempt_count = 0, cooldown_until = NULL WHERE span_hash = ?1 AND kind = 'enrich'",
            params![record.span_hash],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn enrichment_for(&self, span_hash: &str) -> Result<Option<Enrichment>> {
        self.conn
            .query_row(
                "SELECT span_hash, summary, inputs_json, outputs_json, side_effects_json, pitfalls_json,
                    usage_snippet, tags_json, evidence_json, model_id, schema_version, created_at
                 FROM enrichments WHERE span_hash = ?1",
                params![span_hash],
                row_to_enrichment,
            )
            .optional()
            .map_err(RagError::from)
    }

    /// Every committed enrichment, for the post-commit quality pass.
    pub fn all_enrichments(&self) -> Result<Vec<Enrichment>> {
        let mut stmt = self.conn.prepare(
            "SELECT span_hash, summary, inputs_json, outputs_json, side_effects_json, pitfalls_json,
                usage_snippet, tags_json, evidence_json, model_id, schema_version, created_at
             FROM enrichments",
        )?;
        let rows = stmt.query_map([], row_to_enrichment)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Removes a known-bad enrichment and re-queues its span for a fresh
    /// attempt on the next enrichment cycle.
    pub fn delete_enrichment(&mut self, span_hash: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM enrichments WHERE span_hash = ?1", params![span_hash])?;
        tx.execute("DELETE FROM enrichment_fts WHERE span_hash = ?1", params![span_hash])?;
        tx.execute(
            "INSERT INTO work_items(span_hash, kind, attempt_count) VALUES (?1, 'enrich', 0)
             ON CONFLICT(span_hash, kind) DO UPDATE SET attempt_count = 0, cooldown_until = NULL",
            params![span_hash],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Work queue
    // -----------------------------------------------------------------

    pub fn record_attempt(&mut self, span_hash: &str, kind: WorkKind, cooldown_until: Option<i64>, now: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE work_items SET attempt_count = attempt_count + 1, last_attempt_at = ?1, cooldown_until = ?2
             WHERE span_hash = ?3 AND kind = ?4",
            params![now, cooldown_until, span_hash, kind_to_work_str(kind)],
        )?;
        Ok(())
    }

    /// Work items whose cooldown has elapsed (or was never set), whose span
    /// is still live, and that don't already have a committed result,
    /// limited to `limit` entries. A span whose `enrich`/`embed` work item
    /// was reset by `write_enrichment`/`write_embedding` only resurfaces
    /// here once a later `replace_spans` changes its content (new span_hash,
    /// fresh work item) -- a committed result is never silently redone.
    pub fn pending(&self, kind: WorkKind, limit: usize, now: i64) -> Result<Vec<WorkItem>> {
        let done_table = match kind {
            WorkKind::Enrich => Some("enrichments"),
            WorkKind::Embed => Some("embeddings"),
            WorkKind::Index => None,
        };
        let exclude_clause = match done_table {
            Some(table) => format!(" AND NOT EXISTS (SELECT 1 FROM {table} d WHERE d.span_hash = w.span_hash)"),
            None => String::new(),
        };
        let sql = format!(
            "SELECT w.span_hash, w.kind, w.attempt_count, w.last_attempt_at, w.cooldown_until
             FROM work_items w
             JOIN spans s ON s.span_hash = w.span_hash
             WHERE w.kind = ?1 AND (w.cooldown_until IS NULL OR w.cooldown_until <= ?2){exclude_clause}
             ORDER BY w.last_attempt_at ASC NULLS FIRST
             LIMIT ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![kind_to_work_str(kind), now, limit as i64], |row| {
            Ok(WorkItem {
                span_hash: row.get(0)?,
                kind: str_to_work_kind(&row.get::<_, String>(1)?),
                attempt_count: row.get::<_, i64>(2)? as u32,
                last_attempt_at: row.get(3)?,
                cooldown_until: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------

    /// BM25-ranked lexical candidates over span content and (weighted
    /// lower) enrichment summaries. FTS5's built-in `unicode61` tokenizer
    /// is used unmodified — no stopword filtering, so common technical
    /// vocabulary never gets dropped from the index.
    pub fn search_lexical(&self, query: &str, k: usize) -> Result<Vec<(String, f64)>> {
        let fts_query = escape_fts_query(query);
        let mut scores: std::collections::HashMap<String, f64> = std::collections::HashMap::new();

        {
            let mut stmt = self
                .conn
                .prepare("SELECT span_hash, bm25(spans_fts) FROM spans_fts WHERE spans_fts MATCH ?1 ORDER BY rank LIMIT ?2")?;
            let rows = stmt.query_map(params![fts_query, (k * 2) as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            for r in rows {
                let (hash, bm25) = r?;
                // bm25() in sqlite is negative-is-better; invert to positive-is-better.
                scores.insert(hash, -bm25);
            }
        }

        {
            let mut stmt = self.conn.prepare(
                "SELECT span_hash, bm25(enrichment_fts) FROM enrichment_fts WHERE enrichment_fts MATCH ?1 ORDER BY rank LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![fts_query, (k * 2) as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            for r in rows {
                let (hash, bm25) = r?;
                // Enrichment-summary matches are weighted lower than span-content matches.
                let weighted = -bm25 * 0.5;
                scores.entry(hash).and_modify(|v| *v += weighted).or_insert(weighted);
            }
        }

        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Dot-product ranking restricted to `candidate_set` — bounds cost and
    /// avoids full-vector scans.
    pub fn search_vector(&self, vector: &[f32], model_id: &str, candidate_set: &[String], k: usize) -> Result<Vec<(String, f32)>> {
        if candidate_set.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = candidate_set.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT span_hash, vector FROM embeddings WHERE model_id = ? AND span_hash IN ({placeholders})"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut param_values: Vec<&dyn rusqlite::ToSql> = vec![&model_id];
        for c in candidate_set {
            param_values.push(c);
        }
        let rows = stmt.query_map(param_values.as_slice(), |row| {
            let hash: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            Ok((hash, Self::decode_vector(&bytes)))
        })?;

        let mut scored: Vec<(String, f32)> = Vec::new();
        for r in rows {
            let (hash, stored_vec) = r?;
            let score = dot_product(vector, &stored_vec);
            scored.push((hash, score));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    // -----------------------------------------------------------------
    // Garbage collection
    // -----------------------------------------------------------------

    /// Removes embeddings/enrichments whose `span_hash` no longer exists.
    /// Foreign keys with ON DELETE CASCADE already guarantee this for spans
    /// deleted through `replace_spans`; this method exists as an explicit,
    /// operator-invokable sweep for the `garbage_collect()` contract and to
    /// clean up anything inserted out of band.
    pub fn garbage_collect(&mut self) -> Result<(usize, usize)> {
        let tx = self.conn.transaction()?;
        let embeddings_removed = tx.execute(
            "DELETE FROM embeddings WHERE span_hash NOT IN (SELECT span_hash FROM spans)",
            [],
        )?;
        let enrichments_removed = tx.execute(
            "DELETE FROM enrichments WHERE span_hash NOT IN (SELECT span_hash FROM spans)",
            [],
        )?;
        tx.execute("DELETE FROM enrichment_fts WHERE span_hash NOT IN (SELECT span_hash FROM spans)", [])?;
        tx.commit()?;
        Ok((embeddings_removed, enrichments_removed))
    }

    pub fn record_fuzzy_reuse(&mut self, old_hash: &str, new_hash: &str, now: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO fuzzy_reuse_log(old_span_hash, new_span_hash, reused_at) VALUES (?1, ?2, ?3)",
            params![old_hash, new_hash, now],
        )?;
        Ok(())
    }
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn kind_to_str(kind: SpanKind) -> &'static str {
    match kind {
        SpanKind::Function => "function",
        SpanKind::Method => "method",
        SpanKind::Class => "class",
        SpanKind::Module => "module",
        SpanKind::TopLevelBlock => "top_level_block",
        SpanKind::DocSection => "doc_section",
    }
}

fn str_to_kind(s: &str) -> SpanKind {
    match s {
        "method" => SpanKind::Method,
        "class" => SpanKind::Class,
        "module" => SpanKind::Module,
        "doc_section" => SpanKind::DocSection,
        "top_level_block" => SpanKind::TopLevelBlock,
        _ => SpanKind::Function,
    }
}

fn kind_to_work_str(kind: WorkKind) -> &'static str {
    match kind {
        WorkKind::Index => "index",
        WorkKind::Embed => "embed",
        WorkKind::Enrich => "enrich",
    }
}

fn str_to_work_kind(s: &str) -> WorkKind {
    match s {
        "index" => WorkKind::Index,
        "embed" => WorkKind::Embed,
        _ => WorkKind::Enrich,
    }
}

fn row_to_span(row: &rusqlite::Row) -> rusqlite::Result<Span> {
    Ok(Span {
        span_hash: row.get(0)?,
        file_path: row.get(1)?,
        symbol: row.get(2)?,
        kind: str_to_kind(&row.get::<_, String>(3)?),
        start_line: row.get::<_, i64>(4)? as usize,
        end_line: row.get::<_, i64>(5)? as usize,
        byte_start: row.get::<_, i64>(6)? as usize,
        byte_end: row.get::<_, i64>(7)? as usize,
        language: row.get(8)?,
        content: row.get(9)?,
    })
}

fn row_to_enrichment(row: &rusqlite::Row) -> rusqlite::Result<Enrichment> {
    let inputs: String = row.get(2)?;
    let outputs: String = row.get(3)?;
    let side_effects: String = row.get(4)?;
    let pitfalls: String = row.get(5)?;
    let tags: String = row.get(7)?;
    let evidence: String = row.get(8)?;
    Ok(Enrichment {
        span_hash: row.get(0)?,
        summary: row.get(1)?,
        inputs: serde_json::from_str(&inputs).unwrap_or_default(),
        outputs: serde_json::from_str(&outputs).unwrap_or_default(),
        side_effects: serde_json::from_str(&side_effects).unwrap_or_default(),
        pitfalls: serde_json::from_str(&pitfalls).unwrap_or_default(),
        usage_snippet: row.get(6)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        evidence: serde_json::from_str::<Vec<Evidence>>(&evidence).unwrap_or_default(),
        model_id: row.get(9)?,
        schema_version: row.get::<_, i64>(10)? as u32,
        created_at: row.get(11)?,
    })
}

/// FTS5 query strings disallow several bare punctuation characters; quote
/// each token so user queries containing them (e.g. `foo::bar`) don't blow
/// up the MATCH parser.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[allow(dead_code)]
fn default_schema_version() -> u32 {
    ENRICHMENT_SCHEMA_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpanKind;

    fn mk_span(hash: &str, symbol: &str, content: &str) -> Span {
        Span {
            file_path: "a.py".into(),
            symbol: symbol.into(),
            kind: SpanKind::Function,
            start_line: 1,
            end_line: 3,
            byte_start: 0,
            byte_end: content.len(),
            language: "python".into(),
            span_hash: hash.into(),
            content: content.into(),
        }
    }

    #[test]
    fn replace_spans_editing_one_of_three_touches_one() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert_file("a.py", "h0", 0, "python", None).unwrap();
        let initial = vec![
            mk_span("a", "foo", "def foo(): model system"),
            mk_span("b", "bar", "def bar(): pass"),
            mk_span("c", "baz", "def baz(): data"),
        ];
        store.replace_spans("a.py", initial).unwrap();

        let enrichment = Enrichment {
            span_hash: "b".into(),
            summary: "does a thing with bar".into(),
            inputs: vec!["x".into()],
            outputs: vec!["y".into()],
            side_effects: vec![],
            pitfalls: vec![],
            usage_snippet: None,
            tags: vec![],
            evidence: vec![],
            model_id: "local-7b".into(),
            schema_version: ENRICHMENT_SCHEMA_VERSION,
            created_at: 0,
        };
        store.write_enrichment(&enrichment).unwrap();

        let edited = vec![
            mk_span("a", "foo", "def foo(): model system"),
            mk_span("b2", "bar", "def bar(): return 1"),
            mk_span("c", "baz", "def baz(): data"),
        ];
        let diff = store.replace_spans("a.py", edited).unwrap();

        assert_eq!(diff.deleted, vec!["b".to_string()]);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.unchanged.len(), 2);

        // Enrichment for the deleted span hash is gone via cascade.
        assert!(store.enrichment_for("b").unwrap().is_none());
        assert!(store.span_exists("a").unwrap());
        assert!(store.span_exists("c").unwrap());
        assert!(!store.span_exists("b").unwrap());
    }

    /// `old ∪ new` must equal `unchanged ∪ added ∪ deleted` with the three
    /// sets pairwise disjoint, for an edit that touches one of three spans
    /// and also drops one entirely.
    #[test]
    fn replace_spans_diff_partitions_old_and_new_without_overlap() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert_file("a.py", "h0", 0, "python", None).unwrap();
        let old = vec![
            mk_span("a", "foo", "def foo(): pass"),
            mk_span("b", "bar", "def bar(): pass"),
            mk_span("c", "baz", "def baz(): pass"),
        ];
        store.replace_spans("a.py", old.clone()).unwrap();

        let new = vec![
            mk_span("a", "foo", "def foo(): pass"),   // unchanged
            mk_span("b2", "bar", "def bar(): edited"), // bar's content changed -> new hash
                                                        // "c" dropped entirely
        ];
        let diff = store.replace_spans("a.py", new.clone()).unwrap();

        let old_hashes: std::collections::HashSet<&str> = old.iter().map(|s| s.span_hash.as_str()).collect();
        let new_hashes: std::collections::HashSet<&str> = new.iter().map(|s| s.span_hash.as_str()).collect();
        let union: std::collections::HashSet<&str> = old_hashes.union(&new_hashes).copied().collect();

        let added: std::collections::HashSet<&str> = diff.added.iter().map(|s| s.span_hash.as_str()).collect();
        let deleted: std::collections::HashSet<&str> = diff.deleted.iter().map(|s| s.as_str()).collect();
        let unchanged: std::collections::HashSet<&str> = diff.unchanged.iter().map(|s| s.as_str()).collect();

        assert!(added.is_disjoint(&deleted));
        assert!(added.is_disjoint(&unchanged));
        assert!(deleted.is_disjoint(&unchanged));

        let partitioned: std::collections::HashSet<&str> = added.union(&deleted).copied().collect::<std::collections::HashSet<_>>().union(&unchanged).copied().collect();
        assert_eq!(partitioned, union);

        assert_eq!(added, std::collections::HashSet::from(["b2"]));
        assert_eq!(deleted, std::collections::HashSet::from(["b", "c"]));
        assert_eq!(unchanged, std::collections::HashSet::from(["a"]));
    }

    #[test]
    fn garbage_collect_removes_orphans() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert_file("a.py", "h0", 0, "python", None).unwrap();
        store.replace_spans("a.py", vec![mk_span("a", "foo", "def foo(): pass")]).unwrap();
        store.write_embedding("a", "minilm", &[1.0, 2.0, 3.0]).unwrap();
        store.replace_spans("a.py", vec![]).unwrap();
        let (embeddings, enrichments) = store.garbage_collect().unwrap();
        assert_eq!(enrichments, 0);
        // FK cascade already removed the embedding on span delete; the
        // explicit sweep should find nothing left to do.
        assert_eq!(embeddings, 0);
    }

    #[test]
    fn search_lexical_finds_technical_keywords() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert_file("a.py", "h0", 0, "python", None).unwrap();
        store
            .replace_spans(
                "a.py",
                vec![
                    mk_span("a", "foo", "def foo(): the model loads the system data"),
                    mk_span("b", "bar", "def bar(): unrelated content here"),
                ],
            )
            .unwrap();

        for keyword in ["model", "system", "data"] {
            let hits = store.search_lexical(keyword, 10).unwrap();
            assert!(!hits.is_empty(), "expected a hit for {keyword}");
            assert_eq!(hits[0].0, "a");
        }
    }

    #[test]
    fn search_vector_restricted_to_candidate_set() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert_file("a.py", "h0", 0, "python", None).unwrap();
        store
            .replace_spans("a.py", vec![mk_span("a", "foo", "x"), mk_span("b", "bar", "y")])
            .unwrap();
        store.write_embedding("a", "minilm", &[1.0, 0.0]).unwrap();
        store.write_embedding("b", "minilm", &[0.0, 1.0]).unwrap();

        let results = store.search_vector(&[1.0, 0.0], "minilm", &["a".to_string()], 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn write_enrichment_rejects_orphan() {
        let mut store = Store::open_in_memory().unwrap();
        let enrichment = Enrichment {
            span_hash: "nonexistent".into(),
            summary: "x".into(),
            inputs: vec![],
            outputs: vec![],
            side_effects: vec![],
            pitfalls: vec![],
            usage_snippet: None,
            tags: vec![],
            evidence: vec![],
            model_id: "m".into(),
            schema_version: ENRICHMENT_SCHEMA_VERSION,
            created_at: 0,
        };
        assert!(store.write_enrichment(&enrichment).is_err());
    }

    #[test]
    fn pending_respects_cooldown() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert_file("a.py", "h0", 0, "python", None).unwrap();
        store.replace_spans("a.py", vec![mk_span("a", "foo", "x")]).unwrap();
        store.record_attempt("a", WorkKind::Enrich, Some(1000), 500).unwrap();

        let pending_before = store.pending(WorkKind::Enrich, 10, 500).unwrap();
        assert!(pending_before.is_empty());

        let pending_after = store.pending(WorkKind::Enrich, 10, 1500).unwrap();
        assert_eq!(pending_after.len(), 1);
        assert_eq!(pending_after[0].span_hash, "a");
    }
}
