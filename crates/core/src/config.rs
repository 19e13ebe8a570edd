//! Repository configuration — one TOML file per repository.
//!
//! Parsed as a `toml::Table` with manual, tolerant extraction per key,
//! rather than one strict `#[derive(Deserialize)]` over the whole file. An
//! unknown key or a missing optional section never fails the load; every
//! field has a documented default.

use crate::error::{RagError, Result};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Code,
    TechDocs,
    Legal,
    Medical,
    Mixed,
}

impl Domain {
    fn parse(s: &str) -> Domain {
        match s {
            "tech_docs" => Domain::TechDocs,
            "legal" => Domain::Legal,
            "medical" => Domain::Medical,
            "mixed" => Domain::Mixed,
            _ => Domain::Code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartingTierMode {
    Heuristic,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarReadMode {
    RetrievalOnly,
    AllReads,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonMode {
    Event,
    Poll,
}

#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub name: String,
    pub provider: String,
    pub model: String,
    pub url: Option<String>,
    pub timeout_seconds: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub domain: Domain,

    pub default_chain: String,
    pub batch_size: usize,
    pub max_failures_per_span: u32,
    pub enforce_latin1_enrichment: bool,
    pub vacuum_interval_hours: u64,
    pub fuzzy_reuse: bool,
    pub chain: Vec<ChainEntry>,

    pub embedding_model: String,
    pub embedding_dim: usize,

    pub routing_weights: BTreeMap<String, f64>,
    pub starting_tier_mode: StartingTierMode,

    pub path_weights: BTreeMap<String, u8>,
    pub sidecar_transparent_reads: SidecarReadMode,

    pub daemon_mode: DaemonMode,
    pub tick_interval_seconds: u64,
    pub debounce_seconds: u64,
    pub concurrency: usize,
    pub poll_backoff_base: f64,
    pub poll_backoff_max_seconds: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        RagConfig {
            domain: Domain::Code,
            default_chain: "default".to_string(),
            batch_size: 16,
            max_failures_per_span: 3,
            enforce_latin1_enrichment: false,
            vacuum_interval_hours: 24,
            fuzzy_reuse: false,
            chain: Vec::new(),
            embedding_model: "minilm".to_string(),
            embedding_dim: 384,
            routing_weights: BTreeMap::new(),
            starting_tier_mode: StartingTierMode::Heuristic,
            path_weights: BTreeMap::new(),
            sidecar_transparent_reads: SidecarReadMode::RetrievalOnly,
            daemon_mode: DaemonMode::Event,
            tick_interval_seconds: 5,
            debounce_seconds: 2,
            concurrency: 4,
            poll_backoff_base: 2.0,
            poll_backoff_max_seconds: 300,
        }
    }
}

/// Load and tolerantly parse a repository config file. Missing sections
/// fall back to defaults; this never fails on an unrecognized key.
pub fn load_config(path: &Path) -> Result<RagConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RagError::Config(e.to_string()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<RagConfig> {
    let table: toml::Table = content.parse().map_err(|e: toml::de::Error| RagError::Config(e.to_string()))?;
    let mut cfg = RagConfig::default();

    if let Some(repository) = table.get("repository").and_then(|v| v.as_table()) {
        if let Some(domain) = repository.get("domain").and_then(|v| v.as_str()) {
            cfg.domain = Domain::parse(domain);
        }
    }

    if let Some(enrichment) = table.get("enrichment").and_then(|v| v.as_table()) {
        if let Some(v) = enrichment.get("default_chain").and_then(|v| v.as_str()) {
            cfg.default_chain = v.to_string();
        }
        if let Some(v) = enrichment.get("batch_size").and_then(|v| v.as_integer()) {
            cfg.batch_size = v.max(1) as usize;
        }
        if let Some(v) = enrichment.get("max_failures_per_span").and_then(|v| v.as_integer()) {
            cfg.max_failures_per_span = v.max(1) as u32;
        }
        if let Some(v) = enrichment.get("enforce_latin1_enrichment").and_then(|v| v.as_bool()) {
            cfg.enforce_latin1_enrichment = v;
        }
        if let Some(v) = enrichment.get("vacuum_interval_hours").and_then(|v| v.as_integer()) {
            cfg.vacuum_interval_hours = v.max(1) as u64;
        }
        if let Some(v) = enrichment.get("fuzzy_reuse").and_then(|v| v.as_bool()) {
            cfg.fuzzy_reuse = v;
        }
        if let Some(weights) = enrichment.get("path_weights").and_then(|v| v.as_table()) {
            for (pattern, value) in weights {
                if let Some(n) = value.as_integer() {
                    cfg.path_weights.insert(pattern.clone(), n.clamp(1, 10) as u8);
                }
            }
        }
    }

    if let Some(chain_entries) = table.get("enrichment").and_then(|v| v.get("chain")).and_then(|v| v.as_array()) {
        for entry in chain_entries {
            let Some(t) = entry.as_table() else { continue };
            let name = t.get("name").and_then(|v| v.as_str()).unwrap_or("unnamed").to_string();
            let provider = t.get("provider").and_then(|v| v.as_str()).unwrap_or("openai-compatible").to_string();
            let model = t.get("model").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let url = t.get("url").and_then(|v| v.as_str()).map(|s| s.to_string());
            let timeout_seconds = t.get("timeout_seconds").and_then(|v| v.as_integer()).unwrap_or(30).max(1) as u64;
            let enabled = t.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true);
            cfg.chain.push(ChainEntry { name, provider, model, url, timeout_seconds, enabled });
        }
    }

    if let Some(embeddings) = table.get("embeddings").and_then(|v| v.as_table()) {
        if let Some(v) = embeddings.get("model").and_then(|v| v.as_str()) {
            cfg.embedding_model = v.to_string();
        }
        if let Some(v) = embeddings.get("dim").and_then(|v| v.as_integer()) {
            cfg.embedding_dim = v.max(1) as usize;
        }
    }

    if let Some(routing) = table.get("routing").and_then(|v| v.as_table()) {
        for (key, value) in routing {
            if let Some(n) = value.as_float() {
                cfg.routing_weights.insert(key.clone(), n);
            } else if let Some(n) = value.as_integer() {
                cfg.routing_weights.insert(key.clone(), n as f64);
            } else if key == "starting_tier_mode" {
                if value.as_str() == Some("fixed") {
                    cfg.starting_tier_mode = StartingTierMode::Fixed;
                }
            }
        }
    }

    if let Some(extractor) = table.get("extractor").and_then(|v| v.as_table()) {
        if extractor.get("sidecar_transparent_reads").and_then(|v| v.as_str()) == Some("all_reads") {
            cfg.sidecar_transparent_reads = SidecarReadMode::AllReads;
        }
    }

    if let Some(daemon) = table.get("daemon").and_then(|v| v.as_table()) {
        if daemon.get("mode").and_then(|v| v.as_str()) == Some("poll") {
            cfg.daemon_mode = DaemonMode::Poll;
        }
        if let Some(v) = daemon.get("tick_interval").and_then(|v| v.as_integer()) {
            cfg.tick_interval_seconds = v.max(1) as u64;
        }
        if let Some(v) = daemon.get("debounce_seconds").and_then(|v| v.as_integer()) {
            cfg.debounce_seconds = v.max(0) as u64;
        }
        if let Some(v) = daemon.get("concurrency").and_then(|v| v.as_integer()) {
            cfg.concurrency = v.max(1) as usize;
        }
    }

    Ok(cfg)
}
