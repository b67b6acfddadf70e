//! Configuration parsing and validation.
//!
//! The connection engine is configured via a TOML file (default:
//! `config/conn-engine.toml`). The config defines the Postgres connection,
//! LLM provider settings, per-engine detection thresholds (spec.md §4.4–§4.6),
//! and worker concurrency (spec.md §5).
//!
//! `DATABASE_URL` overrides the config file's `db.url`, per spec.md §6
//! ("Configuration (environment)").

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::ConnectionType;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub engines: EnginesConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_bridge_concurrency")]
    pub max_concurrent_batches: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
            max_concurrent_batches: default_bridge_concurrency(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_api_key_env() -> String {
    "LLM_API_KEY".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_retries() -> u32 {
    3
}
fn default_bridge_concurrency() -> usize {
    5
}

/// Which engines run, plus each engine's own settings (spec.md §4.7).
/// `enabled` holds the raw wire strings from TOML; `config::validate` checks
/// them against `ConnectionType::from_str` and fails fast on an unknown name
/// (spec.md §7).
#[derive(Debug, Deserialize, Clone)]
pub struct EnginesConfig {
    #[serde(default = "default_enabled_engines")]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub contradiction: ContradictionConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_engines(),
            semantic: SemanticConfig::default(),
            contradiction: ContradictionConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

fn default_enabled_engines() -> Vec<String> {
    vec![
        "semantic_similarity".to_string(),
        "contradiction_detection".to_string(),
        "thematic_bridge".to_string(),
    ]
}

impl EnginesConfig {
    /// Validated, typed view of `enabled` (spec.md §4.7). Called by
    /// `config::validate` and by `OrchestratorConfig::from_app_config`.
    pub fn enabled_engines(&self) -> Result<Vec<ConnectionType>> {
        self.enabled
            .iter()
            .map(|name| {
                ConnectionType::from_str(name)
                    .with_context(|| format!("engines.enabled: unknown engine name '{}'", name))
            })
            .collect()
    }
}

/// E-SEM config (spec.md §4.4).
#[derive(Debug, Deserialize, Clone)]
pub struct SemanticConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_max_results_per_chunk_sem")]
    pub max_results_per_chunk: i64,
    #[serde(default = "default_true")]
    pub cross_document_only: bool,
    #[serde(default = "default_semantic_fan_out")]
    pub fan_out: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_results_per_chunk: default_max_results_per_chunk_sem(),
            cross_document_only: true,
            fan_out: default_semantic_fan_out(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_max_results_per_chunk_sem() -> i64 {
    50
}
fn default_semantic_fan_out() -> usize {
    3
}
fn default_true() -> bool {
    true
}

/// E-CON config (spec.md §4.5).
#[derive(Debug, Deserialize, Clone)]
pub struct ContradictionConfig {
    #[serde(default = "default_min_concept_overlap")]
    pub min_concept_overlap: f64,
    #[serde(default = "default_polarity_threshold")]
    pub polarity_threshold: f64,
    #[serde(default = "default_max_results_per_chunk_con")]
    pub max_results_per_chunk: usize,
    #[serde(default = "default_true")]
    pub cross_document_only: bool,
    /// Optional second signal (spec.md §9): sentence-level negation scan for
    /// pairs the metadata path didn't already emit a connection for.
    #[serde(default)]
    pub enable_negation_fallback: bool,
}

impl Default for ContradictionConfig {
    fn default() -> Self {
        Self {
            min_concept_overlap: default_min_concept_overlap(),
            polarity_threshold: default_polarity_threshold(),
            max_results_per_chunk: default_max_results_per_chunk_con(),
            cross_document_only: true,
            enable_negation_fallback: false,
        }
    }
}

fn default_min_concept_overlap() -> f64 {
    0.5
}
fn default_polarity_threshold() -> f64 {
    0.3
}
fn default_max_results_per_chunk_con() -> usize {
    20
}

/// E-BRI config (spec.md §4.6).
#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_min_importance")]
    pub min_importance: f64,
    #[serde(default = "default_min_strength")]
    pub min_strength: f64,
    #[serde(default = "default_max_source_chunks")]
    pub max_source_chunks: i64,
    #[serde(default = "default_max_candidates_per_source")]
    pub max_candidates_per_source: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            min_importance: default_min_importance(),
            min_strength: default_min_strength(),
            max_source_chunks: default_max_source_chunks(),
            max_candidates_per_source: default_max_candidates_per_source(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_min_importance() -> f64 {
    0.6
}
fn default_min_strength() -> f64 {
    0.6
}
fn default_max_source_chunks() -> i64 {
    50
}
fn default_max_candidates_per_source() -> i64 {
    10
}
fn default_batch_size() -> usize {
    5
}

/// Worker scheduling config (spec.md §5).
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_worker_concurrency() -> usize {
    4
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_poll_interval_secs() -> u64 {
    2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.db.url = url;
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.url.trim().is_empty() {
        anyhow::bail!("db.url must not be empty");
    }

    config.engines.enabled_engines()?;

    if !(0.0..=1.0).contains(&config.engines.semantic.similarity_threshold) {
        anyhow::bail!("engines.semantic.similarity_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.engines.contradiction.min_concept_overlap) {
        anyhow::bail!("engines.contradiction.min_concept_overlap must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.engines.bridge.min_importance) {
        anyhow::bail!("engines.bridge.min_importance must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.engines.bridge.min_strength) {
        anyhow::bail!("engines.bridge.min_strength must be in [0.0, 1.0]");
    }
    if config.worker.concurrency == 0 {
        anyhow::bail!("worker.concurrency must be > 0");
    }

    Ok(())
}

impl Config {
    /// Validated, typed `engines.enabled` (spec.md §4.7). `load_config` has
    /// already called `validate`, so this only re-fails if a caller builds a
    /// `Config` by hand with a bad name.
    pub fn enabled_engines(&self) -> Result<Vec<ConnectionType>> {
        self.engines.enabled_engines()
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable. A missing
    /// key is a configuration error that must fail fast before any engine
    /// runs when `thematic_bridge` is enabled (spec.md §7).
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).with_context(|| {
            format!(
                "{} environment variable not set (required for thematic_bridge engine)",
                self.api_key_env
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"[db]
url = "postgres://localhost/test"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.engines.semantic.similarity_threshold, 0.7);
        assert_eq!(config.engines.contradiction.min_concept_overlap, 0.5);
        assert_eq!(config.engines.bridge.min_importance, 0.6);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.heartbeat_interval_secs, 30);
    }

    fn base_config() -> Config {
        Config {
            db: DbConfig {
                url: "postgres://localhost/test".to_string(),
                pool_size: 5,
            },
            llm: LlmConfig::default(),
            engines: EnginesConfig::default(),
            worker: WorkerConfig::default(),
        }
    }

    #[test]
    fn rejects_empty_db_url() {
        let mut config = base_config();
        config.db.url = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = base_config();
        config.engines.semantic.similarity_threshold = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_worker_concurrency() {
        let mut config = base_config();
        config.worker.concurrency = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unknown_engine_name() {
        let mut config = base_config();
        config.engines.enabled = vec!["semantic_similarity".to_string(), "not_a_real_engine".to_string()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn default_enables_all_three_engines() {
        let config = base_config();
        assert_eq!(
            config.enabled_engines().unwrap(),
            vec![
                crate::models::ConnectionType::SemanticSimilarity,
                crate::models::ConnectionType::ContradictionDetection,
                crate::models::ConnectionType::ThematicBridge,
            ]
        );
    }

    #[test]
    fn subset_of_engines_can_be_enabled() {
        let mut config = base_config();
        config.engines.enabled = vec!["thematic_bridge".to_string()];
        assert_eq!(
            config.enabled_engines().unwrap(),
            vec![crate::models::ConnectionType::ThematicBridge]
        );
    }
}
