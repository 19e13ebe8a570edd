//! Enrichment engine: drives spans through a backend cascade and commits
//! validated annotations back to the store.
//!
//! Five phases per cycle: select work, route to a tier, attempt, validate,
//! commit. Metrics are tracked per-phase and logged at cycle end.

pub mod backend;
pub mod quality;
pub mod reliability;

use crate::config::{ChainEntry, RagConfig, StartingTierMode};
use crate::error::{BackendFailureKind, RagError, Result};
use crate::store::Store;
use crate::types::{Enrichment, Evidence, Span, SpanKind, WorkKind};
use backend::{Backend, CompletionOutcome, CompletionRequest};
use rand::Rng;
use reliability::{CircuitBreaker, CostTracker, TokenBucket};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

fn kind_label(kind: SpanKind) -> &'static str {
    match kind {
        SpanKind::Function => "function",
        SpanKind::Method => "method",
        SpanKind::Class => "class",
        SpanKind::Module => "module",
        SpanKind::TopLevelBlock => "block",
        SpanKind::DocSection => "documentation section",
    }
}

/// Per-span progress through the enrichment cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanState {
    New,
    InFlight { tier_index: usize },
    Parked { last_error: String },
    Done,
}

/// Timing and outcome counters for one enrichment cycle: per-phase
/// durations plus counts, logged at cycle end.
#[derive(Debug, Default, Clone)]
pub struct CycleMetrics {
    pub attempted: usize,
    pub committed: usize,
    pub parked: usize,
    pub select_duration: Duration,
    pub attempt_duration: Duration,
    pub commit_duration: Duration,
}

pub struct EnrichmentEngine {
    chain: Vec<Arc<dyn Backend>>,
    chain_config: Vec<ChainEntry>,
    max_failures_per_span: u32,
    enforce_latin1: bool,
    starting_tier_mode: StartingTierMode,
    per_backend_concurrency: HashMap<String, Arc<Semaphore>>,
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<TokenBucket>,
    cost_tracker: Arc<CostTracker>,
    batch_size: usize,
}

impl EnrichmentEngine {
    pub fn new(chain: Vec<Arc<dyn Backend>>, config: &RagConfig, concurrency_per_backend: usize) -> Self {
        let per_backend_concurrency = chain
            .iter()
            .map(|b| (b.tier().to_string(), Arc::new(Semaphore::new(concurrency_per_backend))))
            .collect();
        EnrichmentEngine {
            chain,
            chain_config: config.chain.clone(),
            max_failures_per_span: config.max_failures_per_span,
            enforce_latin1: config.enforce_latin1_enrichment,
            starting_tier_mode: config.starting_tier_mode,
            per_backend_concurrency,
            circuit_breaker: Arc::new(CircuitBreaker::new(5, Duration::from_secs(60))),
            rate_limiter: Arc::new(TokenBucket::new(10.0, 2.0)),
            cost_tracker: Arc::new(CostTracker::new(5.0)),
            batch_size: config.batch_size,
        }
    }

    /// Complexity-heuristic starting tier: line count, nesting depth (via
    /// brace/indent density as a cheap proxy), and symbol-name schema depth.
    fn starting_tier(&self, span: &Span) -> usize {
        if self.chain.is_empty() {
            return 0;
        }
        match self.starting_tier_mode {
            StartingTierMode::Fixed => 0,
            StartingTierMode::Heuristic => {
                let lines = span.end_line.saturating_sub(span.start_line) + 1;
                let nesting = span.content.matches('{').count() + span.content.matches(':').count();
                let complexity = lines + nesting;
                let tier_count = self.chain.len();
                let bucket = (complexity / 20).min(tier_count - 1);
                bucket
            }
        }
    }

    fn cooldown_seconds(&self, attempt_count: u32) -> i64 {
        let base: f64 = 2.0;
        let capped_exponent = attempt_count.min(10) as i32;
        let raw = base.powi(capped_exponent).min(3600.0);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        (raw * jitter) as i64
    }

    fn build_prompt(&self, span: &Span) -> String {
        format!(
            "Summarize this {} named `{}` in {} for an engineer. Respond as JSON with keys \
             summary, inputs, outputs, side_effects, pitfalls, usage_snippet, tags.\n\n```{}\n{}\n```",
            kind_label(span.kind),
            span.symbol,
            span.language,
            span.language,
            span.content
        )
    }

    /// Runs one enrichment cycle: pulls up to `batch_size` pending spans,
    /// attempts each through the cascade (bounded concurrency per backend),
    /// and commits validated results to the store in one batch.
    pub async fn run_cycle(&self, store: &mut Store, now: i64) -> Result<CycleMetrics> {
        let mut metrics = CycleMetrics::default();
        let select_start = std::time::Instant::now();
        let pending = store.pending(WorkKind::Enrich, self.batch_size, now)?;
        metrics.select_duration = select_start.elapsed();
        if pending.is_empty() {
            return Ok(metrics);
        }

        let attempt_start = std::time::Instant::now();
        let mut outcomes: Vec<(String, std::result::Result<Enrichment, String>, u32)> = Vec::new();

        for item in &pending {
            let Some(span) = store.spans_for_hash(&item.span_hash)? else { continue };
            metrics.attempted += 1;
            let mut tier_index = self.starting_tier(&span);
            let mut failures = 0u32;
            let mut last_error = String::new();
            let mut committed: Option<Enrichment> = None;

            loop {
                if failures >= self.max_failures_per_span || tier_index >= self.chain.len() {
                    break;
                }
                let backend = &self.chain[tier_index];
                let host = backend.tier().to_string();

                if !self.circuit_breaker.allow(&host) || !self.rate_limiter.try_acquire() || self.cost_tracker.over_budget() {
                    failures += 1;
                    tier_index += 1;
                    last_error = "backend unavailable (circuit/rate/budget)".to_string();
                    continue;
                }

                let permit = self.per_backend_concurrency.get(&host).map(|s| s.clone());
                let _permit = match permit {
                    Some(sem) => Some(sem.acquire_owned().await.map_err(|e| RagError::Internal(e.to_string()))?),
                    None => None,
                };

                let request = CompletionRequest {
                    prompt: self.build_prompt(&span),
                    max_tokens: 512,
                    timeout: Duration::from_secs(self.chain_config.get(tier_index).map(|c| c.timeout_seconds).unwrap_or(30)),
                };

                match backend.complete(request).await {
                    Ok(outcome) => {
                        self.circuit_breaker.record_success(&host);
                        match self.validate(&span, &outcome, &host) {
                            Ok(enrichment) => {
                                debug!(
                                    span_hash = %span.span_hash,
                                    tier = %host,
                                    tokens_in = outcome.tokens_in,
                                    tokens_out = outcome.tokens_out,
                                    latency_ms = outcome.latency.as_millis() as u64,
                                    "span enriched"
                                );
                                committed = Some(enrichment);
                                break;
                            }
                            Err(reason) => {
                                failures += 1;
                                tier_index += 1;
                                last_error = reason;
                            }
                        }
                    }
                    Err(kind) => {
                        last_error = kind.to_string();
                        match kind {
                            BackendFailureKind::AuthError => {
                                // Bad credentials, not transient load: disable the
                                // backend for the rest of the process rather than
                                // letting it half-open and get retried later.
                                self.circuit_breaker.disable_permanently(&host);
                                failures = self.max_failures_per_span; // fatal for this session
                            }
                            BackendFailureKind::RateLimited | BackendFailureKind::Overloaded => {
                                self.circuit_breaker.record_failure(&host);
                                failures += 1;
                            }
                            _ => {
                                self.circuit_breaker.record_failure(&host);
                                failures += 1;
                                tier_index += 1;
                            }
                        }
                    }
                }
            }

            match committed {
                Some(enrichment) => outcomes.push((span.span_hash.clone(), Ok(enrichment), failures)),
                None => outcomes.push((span.span_hash.clone(), Err(last_error), failures)),
            }
        }
        metrics.attempt_duration = attempt_start.elapsed();

        let commit_start = std::time::Instant::now();
        for (span_hash, result, failures) in outcomes {
            match result {
                Ok(enrichment) => {
                    store.write_enrichment(&enrichment)?;
                    metrics.committed += 1;
                }
                Err(reason) => {
                    let cooldown_until = now + self.cooldown_seconds(failures);
                    store.record_attempt(&span_hash, WorkKind::Enrich, Some(cooldown_until), now)?;
                    warn!(span_hash = %span_hash, error = %reason, "span parked after exhausting cascade");
                    metrics.parked += 1;
                }
            }
        }
        metrics.commit_duration = commit_start.elapsed();

        info!(
            attempted = metrics.attempted,
            committed = metrics.committed,
            parked = metrics.parked,
            select_ms = metrics.select_duration.as_millis() as u64,
            attempt_ms = metrics.attempt_duration.as_millis() as u64,
            commit_ms = metrics.commit_duration.as_millis() as u64,
            "enrichment cycle complete"
        );
        Ok(metrics)
    }

    fn validate(&self, span: &Span, outcome: &CompletionOutcome, tier: &str) -> std::result::Result<Enrichment, String> {
        let raw = &outcome.raw;
        if raw.summary.trim().is_empty() {
            return Err("missing summary".to_string());
        }
        if raw.inputs.is_empty() && raw.outputs.is_empty() {
            return Err("inputs and outputs both empty".to_string());
        }
        if self.enforce_latin1 && raw.summary.chars().any(|c| c as u32 > 0xFF) {
            return Err(BackendFailureKind::NonLatin1Output.to_string());
        }

        Ok(Enrichment {
            span_hash: span.span_hash.clone(),
            summary: raw.summary.clone(),
            inputs: raw.inputs.clone(),
            outputs: raw.outputs.clone(),
            side_effects: raw.side_effects.clone(),
            pitfalls: raw.pitfalls.clone(),
            usage_snippet: raw.usage_snippet.clone(),
            tags: raw.tags.clone(),
            evidence: vec![Evidence { field: "summary".to_string(), lines: (span.start_line, span.end_line) }],
            model_id: tier.to_string(),
            schema_version: crate::types::ENRICHMENT_SCHEMA_VERSION,
            created_at: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyBackend {
        tier: String,
        fail_times: usize,
        calls: AtomicUsize,
    }

    struct AlwaysAuthFails {
        tier: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for AlwaysAuthFails {
        fn tier(&self) -> &str {
            &self.tier
        }

        async fn complete(&self, _request: CompletionRequest) -> backend::BackendResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendFailureKind::AuthError)
        }
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        fn tier(&self) -> &str {
            &self.tier
        }

        async fn complete(&self, _request: CompletionRequest) -> backend::BackendResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                return Err(BackendFailureKind::TransportError);
            }
            Ok(CompletionOutcome {
                raw: backend::RawCompletion {
                    summary: "parses the input and returns a normalized value".to_string(),
                    inputs: vec!["x".to_string()],
                    outputs: vec!["y".to_string()],
                    ..Default::default()
                },
                tokens_in: 10,
                tokens_out: 20,
                latency: Duration::from_millis(5),
            })
        }
    }

    fn mk_span(hash: &str) -> Span {
        Span {
            file_path: "a.py".into(),
            symbol: "foo".into(),
            kind: crate::types::SpanKind::Function,
            start_line: 1,
            end_line: 5,
            byte_start: 0,
            byte_end: 10,
            language: "python".into(),
            span_hash: hash.into(),
            content: "def foo():\n    return 1\n".into(),
        }
    }

    #[tokio::test]
    async fn cascade_escalates_to_second_tier_on_failure() {
        let backend_a: Arc<dyn Backend> = Arc::new(FlakyBackend { tier: "local-7b".into(), fail_times: 99, calls: AtomicUsize::new(0) });
        let backend_b: Arc<dyn Backend> = Arc::new(FlakyBackend { tier: "remote-premium".into(), fail_times: 0, calls: AtomicUsize::new(0) });
        let mut config = RagConfig::default();
        config.max_failures_per_span = 5;
        let engine = EnrichmentEngine::new(vec![backend_a, backend_b], &config, 2);

        let mut store = Store::open_in_memory().unwrap();
        store.upsert_file("a.py", "h0", 0, "python", None).unwrap();
        store.replace_spans("a.py", vec![mk_span("a")]).unwrap();

        let metrics = engine.run_cycle(&mut store, 0).await.unwrap();
        assert_eq!(metrics.committed, 1);
        assert!(store.enrichment_for("a").unwrap().is_some());
    }

    #[tokio::test]
    async fn all_tiers_exhausted_parks_span() {
        let backend_a: Arc<dyn Backend> = Arc::new(FlakyBackend { tier: "local-7b".into(), fail_times: 99, calls: AtomicUsize::new(0) });
        let mut config = RagConfig::default();
        config.max_failures_per_span = 2;
        let engine = EnrichmentEngine::new(vec![backend_a], &config, 2);

        let mut store = Store::open_in_memory().unwrap();
        store.upsert_file("a.py", "h0", 0, "python", None).unwrap();
        store.replace_spans("a.py", vec![mk_span("a")]).unwrap();

        let metrics = engine.run_cycle(&mut store, 0).await.unwrap();
        assert_eq!(metrics.parked, 1);
        assert!(store.enrichment_for("a").unwrap().is_none());
    }

    /// An `auth_error` must disable the backend for every subsequent
    /// attempt in the same cycle, not just park the span that hit it: a
    /// second span routed to the same tier must skip straight past the
    /// dead backend instead of calling it again.
    #[tokio::test]
    async fn auth_error_permanently_disables_backend_for_later_spans() {
        let backend_a: Arc<dyn Backend> = Arc::new(AlwaysAuthFails { tier: "local-7b".into(), calls: AtomicUsize::new(0) });
        let backend_b: Arc<dyn Backend> = Arc::new(FlakyBackend { tier: "remote-premium".into(), fail_times: 0, calls: AtomicUsize::new(0) });
        let mut config = RagConfig::default();
        config.max_failures_per_span = 5;
        config.starting_tier_mode = crate::config::StartingTierMode::Fixed;
        let engine = EnrichmentEngine::new(vec![backend_a, backend_b], &config, 2);

        let mut store = Store::open_in_memory().unwrap();
        store.upsert_file("a.py", "h0", 0, "python", None).unwrap();
        store.replace_spans("a.py", vec![mk_span("a"), mk_span("b")]).unwrap();

        let metrics = engine.run_cycle(&mut store, 0).await.unwrap();

        assert!(engine.circuit_breaker.is_permanently_disabled("local-7b"));
        // First span hits the auth-failing backend exactly once; the
        // second span's routing skips it entirely rather than calling it
        // again and finding it still broken.
        assert_eq!(metrics.attempted, 2);
        assert_eq!(metrics.committed, 1, "only the span that escalated past the dead backend should commit");
    }

    /// A span that never succeeds must never be attempted more than
    /// `max_failures_per_span` times in a single cycle, and must leave a
    /// cooldown set so it doesn't spin the pending queue hot.
    #[tokio::test]
    async fn failure_count_never_exceeds_configured_ceiling() {
        let backend: Arc<dyn Backend> = Arc::new(FlakyBackend { tier: "local-7b".into(), fail_times: 99, calls: AtomicUsize::new(0) });
        let mut config = RagConfig::default();
        config.max_failures_per_span = 3;
        let engine = EnrichmentEngine::new(vec![backend], &config, 2);

        let mut store = Store::open_in_memory().unwrap();
        store.upsert_file("a.py", "h0", 0, "python", None).unwrap();
        store.replace_spans("a.py", vec![mk_span("a")]).unwrap();

        let metrics = engine.run_cycle(&mut store, 0).await.unwrap();
        assert_eq!(metrics.parked, 1);

        // Query with a far-future `now` so the cooldown this cycle just set
        // doesn't hide the parked item from the pending list.
        let pending = store.pending(WorkKind::Enrich, 10, i64::MAX).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(
            pending[0].attempt_count <= config.max_failures_per_span,
            "attempt_count {} exceeded ceiling {}",
            pending[0].attempt_count,
            config.max_failures_per_span
        );
        assert!(pending[0].cooldown_until.is_some(), "parked span must carry a cooldown");
    }
}
