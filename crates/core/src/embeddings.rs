//! Local embedding generation for dense retrieval scoring. Wraps a
//! fastembed-loaded ONNX sentence-transformer model run through `ort` --
//! no network call per query and no Python runtime, once the model weights
//! are cached on first load.
//!
//! Kept separate from `retrieval.rs`: the retrieval pipeline only needs an
//! `embed_query` closure, never the model itself, so callers that don't care
//! about dense scoring (tests, the local-fallback path) never pay for model
//! load.

use crate::error::{RagError, Result};
use crate::store::Store;
use crate::types::WorkKind;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;
use tracing::warn;

/// Resolves a configured model name to the fastembed preset it runs.
/// Unrecognized names fall back to the default preset rather than failing
/// the whole pipeline -- a typo in `[embeddings] model` should degrade
/// retrieval quality, not take the index offline.
fn resolve_model(name: &str) -> EmbeddingModel {
    match name {
        "minilm" | "" => EmbeddingModel::AllMiniLML6V2,
        "bge-small" => EmbeddingModel::BGESmallENV15,
        "bge-base" => EmbeddingModel::BGEBaseENV15,
        other => {
            warn!(model = %other, "unrecognized embedding model, falling back to minilm");
            EmbeddingModel::AllMiniLML6V2
        }
    }
}

/// A loaded embedding model, shared across the query path and the
/// embed-drain cycle. `fastembed::TextEmbedding::embed` takes `&mut self`;
/// the mutex lets both callers hold only a shared reference to the engine.
pub struct EmbeddingEngine {
    model: Mutex<TextEmbedding>,
    pub model_id: String,
}

impl EmbeddingEngine {
    pub fn new(model_name: &str) -> Result<Self> {
        let preset = resolve_model(model_name);
        let model =
            TextEmbedding::try_new(InitOptions::new(preset)).map_err(|e| RagError::Embedding(e.to_string()))?;
        Ok(EmbeddingEngine { model: Mutex::new(model), model_id: model_name.to_string() })
    }

    /// Embeds a batch of texts in one forward pass.
    pub fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut model = self.model.lock().map_err(|_| RagError::Embedding("model lock poisoned".to_string()))?;
        model.embed(texts, None).map_err(|e| RagError::Embedding(e.to_string()))
    }

    /// Embeds a single query string for the retrieval pipeline's dense
    /// rescoring step. Swallows failures to `None`: a missing dense vector
    /// means "skip dense rescoring, fall back to lexical order," not a hard
    /// query failure.
    pub fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        match self.embed_batch(vec![text.to_string()]) {
            Ok(mut vectors) => vectors.pop(),
            Err(e) => {
                warn!(error = %e, "query embedding failed, skipping dense rescoring");
                None
            }
        }
    }
}

/// Outcome counters for one embed-drain cycle.
#[derive(Debug, Default, Clone)]
pub struct EmbedCycleMetrics {
    pub attempted: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Drains up to `batch_size` pending `embed` work items, embeds their span
/// content in one batch, and writes the resulting vectors back to the store.
/// A batch-level failure (model load/inference error) parks every item in
/// the batch with a cooldown rather than retrying them one at a time -- a
/// failure at this stage is never specific to one span's content.
pub fn run_embed_cycle(
    engine: &EmbeddingEngine,
    store: &mut Store,
    batch_size: usize,
    now: i64,
) -> Result<EmbedCycleMetrics> {
    let mut metrics = EmbedCycleMetrics::default();
    let pending = store.pending(WorkKind::Embed, batch_size, now)?;
    if pending.is_empty() {
        return Ok(metrics);
    }

    let mut hashes = Vec::with_capacity(pending.len());
    let mut texts = Vec::with_capacity(pending.len());
    for item in &pending {
        let Some(span) = store.spans_for_hash(&item.span_hash)? else { continue };
        hashes.push(item.span_hash.clone());
        texts.push(span.content);
    }
    metrics.attempted = hashes.len();
    if hashes.is_empty() {
        return Ok(metrics);
    }

    match engine.embed_batch(texts) {
        Ok(vectors) => {
            for (hash, vector) in hashes.iter().zip(vectors.into_iter()) {
                store.write_embedding(hash, &engine.model_id, &vector)?;
                metrics.embedded += 1;
            }
        }
        Err(e) => {
            warn!(error = %e, count = hashes.len(), "embed batch failed, parking items");
            let cooldown_until = now + 60;
            for hash in &hashes {
                store.record_attempt(hash, WorkKind::Embed, Some(cooldown_until), now)?;
            }
            metrics.failed = hashes.len();
        }
    }

    Ok(metrics)
}
