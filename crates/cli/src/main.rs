//! ragc — operator CLI shell over the rag-core indexing and retrieval
//! engine. Calls `rag-core` directly, no server process involved.

use clap::{Parser, Subcommand};
use rag_core::config::{load_config, DaemonMode, RagConfig};
use rag_core::embeddings::{self, EmbeddingEngine};
use rag_core::enrichment::backend::{Backend, OpenAiCompatibleBackend};
use rag_core::enrichment::quality;
use rag_core::enrichment::EnrichmentEngine;
use rag_core::graph::SchemaGraph;
use rag_core::retrieval::{self, QueryFilters};
use rag_core::store::Store;
use rag_core::sync::{self, SyncController};
use rag_core::types::IndexStatus;
use rag_core::RagError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ragc", version, about = "Local-first code-intelligence RAG engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full indexing cycle against a repository
    Sync {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Watch a repository and sync continuously until interrupted
    Watch {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Drive pending spans through the enrichment cascade
    Enrich {
        #[arg(long)]
        root: Option<PathBuf>,
        /// Number of cascade cycles to run
        #[arg(long, default_value = "1")]
        cycles: usize,
    },
    /// Query the index
    Query {
        query: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Report the health of the store, config, and index freshness
    Doctor {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Sweep committed enrichments for placeholder/low-quality output
    Quality {
        #[arg(long)]
        root: Option<PathBuf>,
        /// Delete placeholder enrichments and re-queue their spans
        #[arg(long)]
        fix: bool,
    },
}

fn resolve_root(root: Option<PathBuf>) -> PathBuf {
    root.unwrap_or_else(|| std::env::current_dir().expect("could not determine current directory"))
        .canonicalize()
        .expect("repository root not found")
}

fn store_path(root: &Path) -> PathBuf {
    root.join(".rag").join("index.db")
}

fn open_store(root: &Path) -> rag_core::Result<Store> {
    std::fs::create_dir_all(root.join(".rag"))?;
    Store::open(&store_path(root))
}

fn load_repo_config(root: &Path) -> RagConfig {
    let path = root.join(".llmc").join("config.toml");
    if !path.exists() {
        return RagConfig::default();
    }
    load_config(&path).unwrap_or_else(|e| {
        warn!(error = %e, "config error, falling back to defaults");
        RagConfig::default()
    })
}

fn build_chain(config: &RagConfig) -> Vec<Arc<dyn Backend>> {
    config
        .chain
        .iter()
        .filter(|entry| entry.enabled)
        .map(|entry| {
            let url = entry.url.clone().unwrap_or_else(|| "http://localhost:8080/v1/chat/completions".to_string());
            Arc::new(OpenAiCompatibleBackend::new(
                entry.name.clone(),
                url,
                entry.model.clone(),
                std::env::var("RAGC_API_KEY").ok(),
            )) as Arc<dyn Backend>
        })
        .collect()
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn load_status(root: &Path) -> Option<IndexStatus> {
    let content = std::fs::read_to_string(root.join(".llmc").join("rag_index_status.json")).ok()?;
    serde_json::from_str(&content).ok()
}

fn exit_code_for(e: &RagError) -> i32 {
    if e.code() == "PATH_TRAVERSAL" {
        2
    } else {
        1
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("ragc=info".parse().unwrap()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Sync { root } => cmd_sync(resolve_root(root)),
        Commands::Watch { root } => cmd_watch(resolve_root(root)).await,
        Commands::Enrich { root, cycles } => cmd_enrich(resolve_root(root), cycles).await,
        Commands::Query { query, root, limit } => cmd_query(resolve_root(root), &query, limit, cli.json),
        Commands::Doctor { root } => cmd_doctor(resolve_root(root)),
        Commands::Quality { root, fix } => cmd_quality(resolve_root(root), fix),
    };
    std::process::exit(exit_code);
}

fn cmd_sync(root: PathBuf) -> i32 {
    let config = load_repo_config(&root);
    let store = match open_store(&root) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "could not open store");
            return exit_code_for(&e);
        }
    };
    let mut controller = SyncController::new(root, store, config);
    match controller.scan_full(now_epoch()) {
        Ok(report) => {
            info!(
                changed = report.files_changed,
                removed = report.files_removed,
                spans_added = report.spans_added,
                spans_deleted = report.spans_deleted,
                "sync complete"
            );
            0
        }
        Err(e) => {
            error!(error = %e, "sync failed");
            exit_code_for(&e)
        }
    }
}

async fn cmd_watch(root: PathBuf) -> i32 {
    let config = load_repo_config(&root);
    let store = match open_store(&root) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "could not open store");
            return exit_code_for(&e);
        }
    };
    let mut controller = SyncController::new(root.clone(), store, config.clone());
    if let Err(e) = controller.scan_full(now_epoch()) {
        error!(error = %e, "initial sync failed");
        return exit_code_for(&e);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let loop_shutdown = shutdown.clone();
    let loop_root = root.clone();
    let loop_config = config.clone();
    let handle = tokio::task::spawn_blocking(move || run_watch_loop(controller, &loop_config, &loop_root, &loop_shutdown));

    shutdown_signal().await;
    shutdown.store(true, Ordering::SeqCst);
    match handle.await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "watch loop panicked");
            1
        }
    }
}

fn run_watch_loop(mut controller: SyncController, config: &RagConfig, root: &Path, shutdown: &AtomicBool) {
    match config.daemon_mode {
        DaemonMode::Event => run_event_loop(&mut controller, config, root, shutdown),
        DaemonMode::Poll => run_poll_loop(&mut controller, config, root, shutdown),
    }
}

fn run_event_loop(controller: &mut SyncController, config: &RagConfig, root: &Path, shutdown: &AtomicBool) {
    let debounce = Duration::from_secs(config.debounce_seconds.max(1));
    let Some((_watcher, rx)) = sync::spawn_watcher(root, debounce) else {
        error!("failed to start filesystem watcher, falling back to poll mode");
        return run_poll_loop(controller, config, root, shutdown);
    };
    info!(root = %root.display(), "watching for changes (event mode)");

    while !shutdown.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(batch) => {
                if let Err(e) = controller.run_cycle(&batch, now_epoch()) {
                    error!(error = %e, "sync cycle failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_poll_loop(controller: &mut SyncController, config: &RagConfig, root: &Path, shutdown: &AtomicBool) {
    let tick = Duration::from_secs(config.tick_interval_seconds.max(1));
    let max = Duration::from_secs(config.poll_backoff_max_seconds.max(1));
    let mut interval = tick;
    info!(root = %root.display(), "watching for changes (poll mode)");

    while !shutdown.load(Ordering::SeqCst) {
        interruptible_sleep(interval, shutdown);
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match controller.scan_full(now_epoch()) {
            Ok(report) => {
                let changed = report.spans_added > 0 || report.spans_deleted > 0 || report.files_removed > 0;
                interval = sync::next_poll_interval(interval, tick, config.poll_backoff_base, max, changed);
            }
            Err(e) => error!(error = %e, "poll cycle failed"),
        }
    }
}

fn interruptible_sleep(duration: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_millis(200);
    let mut remaining = duration;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::SeqCst) {
        let chunk = remaining.min(step);
        std::thread::sleep(chunk);
        remaining = remaining.saturating_sub(chunk);
    }
}

async fn cmd_enrich(root: PathBuf, cycles: usize) -> i32 {
    let config = load_repo_config(&root);
    let chain = build_chain(&config);
    if chain.is_empty() {
        warn!("no enabled enrichment chain entries in config, nothing to do");
        return 0;
    }
    let engine = EnrichmentEngine::new(chain, &config, config.concurrency);

    let mut store = match open_store(&root) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "could not open store");
            return exit_code_for(&e);
        }
    };

    let embedder = match EmbeddingEngine::new(&config.embedding_model) {
        Ok(engine) => Some(engine),
        Err(e) => {
            warn!(error = %e, "embedding model unavailable, spans will stay dense-unscored");
            None
        }
    };

    for cycle in 0..cycles {
        if let Some(embedder) = &embedder {
            match embeddings::run_embed_cycle(embedder, &mut store, config.batch_size, now_epoch()) {
                Ok(metrics) => info!(cycle, embedded = metrics.embedded, failed = metrics.failed, "embed cycle done"),
                Err(e) => error!(error = %e, "embed cycle failed"),
            }
        }
        match engine.run_cycle(&mut store, now_epoch()).await {
            Ok(metrics) => info!(cycle, committed = metrics.committed, parked = metrics.parked, "enrichment cycle done"),
            Err(e) => {
                error!(error = %e, "enrichment cycle failed");
                return exit_code_for(&e);
            }
        }
    }
    0
}

fn cmd_query(root: PathBuf, query: &str, limit: usize, json: bool) -> i32 {
    let config = load_repo_config(&root);
    let store = match open_store(&root) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "could not open store");
            return exit_code_for(&e);
        }
    };
    let status = load_status(&root);

    let mut all_spans = Vec::new();
    for abs_path in rag_core::scan::walk_files(&root) {
        let Ok(rel) = abs_path.strip_prefix(&root) else { continue };
        let rel_path = rel.to_string_lossy().replace('\\', "/");
        if let Ok(spans) = store.spans_for_file(&rel_path) {
            all_spans.extend(spans);
        }
    }
    let graph = SchemaGraph::build(&all_spans);

    let embedder = match EmbeddingEngine::new(&config.embedding_model) {
        Ok(engine) => Some(engine),
        Err(e) => {
            warn!(error = %e, "embedding model unavailable, dense rescoring skipped");
            None
        }
    };
    let embed_query = |text: &str| embedder.as_ref().and_then(|e| e.embed_query(text));

    let envelope = match retrieval::query(&store, &graph, &config, &root, status.as_ref(), query, &QueryFilters::default(), embed_query, limit) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(error = %e, "query failed");
            return exit_code_for(&e);
        }
    };

    let source = match envelope.source {
        retrieval::ResultSource::RagGraph => "RAG_GRAPH",
        retrieval::ResultSource::LocalFallback => "LOCAL_FALLBACK",
    };

    if json {
        let items: Vec<serde_json::Value> = envelope
            .results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "path": r.path,
                    "symbol": r.symbol,
                    "lines": [r.lines.0, r.lines.1],
                    "span_hash": r.span_hash,
                    "score_raw": r.score_raw,
                    "score_normalized": r.score_normalized,
                    "summary": r.summary,
                })
            })
            .collect();
        let output = serde_json::json!({
            "meta": { "source": source, "freshness_state": format!("{:?}", envelope.freshness_state) },
            "items": items,
        });
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
    } else {
        if envelope.results.is_empty() {
            eprintln!("No results for '{query}' (source: {source})");
            return 1;
        }
        for r in &envelope.results {
            println!("{:<50} {}:{}-{} [{:>3}]", r.path, r.symbol, r.lines.0, r.lines.1, r.score_normalized);
            if let Some(summary) = &r.summary {
                println!("    {summary}");
            }
        }
        eprintln!("\n{} results (source: {source})", envelope.results.len());
    }
    0
}

fn cmd_doctor(root: PathBuf) -> i32 {
    println!("Repository root: {}", root.display());

    let config_path = root.join(".llmc").join("config.toml");
    if config_path.exists() {
        match load_config(&config_path) {
            Ok(cfg) => println!("Config:      OK ({} chain entries)", cfg.chain.len()),
            Err(e) => println!("Config:      ERROR ({e})"),
        }
    } else {
        println!("Config:      using defaults (no .llmc/config.toml)");
    }

    match open_store(&root) {
        Ok(_) => println!("Store:       OK ({})", store_path(&root).display()),
        Err(e) => {
            println!("Store:       ERROR ({e})");
            return exit_code_for(&e);
        }
    }

    match load_status(&root) {
        Some(status) => {
            println!("Index state: {:?}", status.index_state);
            println!("Last synced: {}", status.last_indexed_at);
            if let Some(commit) = &status.last_indexed_commit {
                println!("Last commit: {commit}");
            }
            if let Some(err) = &status.last_error {
                println!("Last error:  {err}");
            }
        }
        None => println!("Index state: UNKNOWN (repository never synced)"),
    }
    0
}

fn cmd_quality(root: PathBuf, fix: bool) -> i32 {
    let mut store = match open_store(&root) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "could not open store");
            return exit_code_for(&e);
        }
    };

    match quality::run_quality_gate(&mut store, fix) {
        Ok(report) => {
            println!("Enrichments:  {}", report.total);
            println!("Placeholder:  {}", report.fake);
            println!("Quality score: {}/100", report.quality_score);
            if fix {
                println!("Removed:      {}", report.removed);
            }
            0
        }
        Err(e) => {
            error!(error = %e, "quality sweep failed");
            exit_code_for(&e)
        }
    }
}
