//! Orchestrator (C7, spec.md §4.7).
//!
//! Runs the enabled engines in the configured order, concatenates their
//! connections, deduplicates, hands off to C1's `SaveConnections`, and
//! returns summary counts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::engine_bridge::{self, BridgeConfig, ProgressFn};
use crate::engine_contradiction::{self, ContradictionConfig};
use crate::engine_semantic::{self, SemanticConfig};
use crate::llm::LlmClient;
use crate::models::{Connection, ConnectionType};
use crate::store;

/// Which engines to run, and cross-cutting overrides that propagate to all
/// of them (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub enabled_engines: Vec<ConnectionType>,
    pub semantic: SemanticConfig,
    pub contradiction: ContradictionConfig,
    pub bridge: BridgeConfig,
}

impl OrchestratorConfig {
    /// Builds the orchestrator config from the app config, validating
    /// `engines.enabled` against the three known engine names (spec.md §4.7,
    /// §7 "unknown engine name" fails fast before any engine runs).
    pub fn from_app_config(config: &Config) -> Result<Self> {
        Ok(Self {
            enabled_engines: config.enabled_engines()?,
            semantic: (&config.engines.semantic).into(),
            contradiction: (&config.engines.contradiction).into(),
            bridge: BridgeConfig::from_configs(&config.engines.bridge, &config.llm),
        })
    }

    /// Propagates `source_chunk_ids` to all engines, enabling per-chunk mode
    /// (spec.md §4.7, §9 "per-chunk vs per-document detection").
    pub fn with_source_chunk_ids(mut self, ids: Vec<Uuid>) -> Self {
        self.semantic.source_chunk_ids = Some(ids.clone());
        self.contradiction.source_chunk_ids = Some(ids.clone());
        self.bridge.source_chunk_ids = Some(ids);
        self
    }

    pub fn with_target_document_ids(mut self, ids: Vec<Uuid>) -> Self {
        self.semantic.target_document_ids = Some(ids.clone());
        self.contradiction.target_document_ids = Some(ids.clone());
        self.bridge.target_document_ids = Some(ids);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessDocumentResult {
    pub total_connections: usize,
    pub by_engine: HashMap<ConnectionType, usize>,
    pub execution_time_ms: u128,
    pub engine_errors: HashMap<ConnectionType, String>,
}

/// `ProcessDocument(document_id, config)` (spec.md §4.7).
///
/// Engines run sequentially in `semantic_similarity`, `contradiction_detection`,
/// `thematic_bridge` order; a failing engine is recorded in `engine_errors` and
/// skipped, the rest still run. `on_progress` receives a percent in `[0,100]`
/// mapped into the engine's band (0-40/40-55/55-100) plus a message.
pub async fn process_document(
    pool: &PgPool,
    llm: Option<&LlmClient>,
    document_id: Uuid,
    config: &OrchestratorConfig,
    on_progress: Option<Arc<dyn Fn(u32, &str) + Send + Sync>>,
) -> Result<ProcessDocumentResult> {
    let start = Instant::now();
    let mut all_connections: Vec<Connection> = Vec::new();
    let mut by_engine: HashMap<ConnectionType, usize> = HashMap::new();
    let mut engine_errors: HashMap<ConnectionType, String> = HashMap::new();

    if config.enabled_engines.contains(&ConnectionType::SemanticSimilarity) {
        report(&on_progress, 0, "running semantic_similarity");
        match engine_semantic::run(pool, document_id, &config.semantic).await {
            Ok(conns) => {
                by_engine.insert(ConnectionType::SemanticSimilarity, conns.len());
                all_connections.extend(conns);
            }
            Err(e) => {
                tracing::error!(error = %e, document_id = %document_id, "E-SEM failed");
                engine_errors.insert(ConnectionType::SemanticSimilarity, e.to_string());
            }
        }
        report(&on_progress, 40, "semantic_similarity done");
    }

    if config.enabled_engines.contains(&ConnectionType::ContradictionDetection) {
        report(&on_progress, 40, "running contradiction_detection");
        match engine_contradiction::run(pool, document_id, &config.contradiction).await {
            Ok(conns) => {
                by_engine.insert(ConnectionType::ContradictionDetection, conns.len());
                all_connections.extend(conns);
            }
            Err(e) => {
                tracing::error!(error = %e, document_id = %document_id, "E-CON failed");
                engine_errors.insert(ConnectionType::ContradictionDetection, e.to_string());
            }
        }
        report(&on_progress, 55, "contradiction_detection done");
    }

    if config.enabled_engines.contains(&ConnectionType::ThematicBridge) {
        report(&on_progress, 55, "running thematic_bridge");
        match llm {
            Some(llm) => {
                // Bands E-BRI's internal sources_done/total_sources into 55-100.
                let progress_cb: Option<ProgressFn> = on_progress.clone().map(|outer| {
                    let cb: ProgressFn = Arc::new(move |done, total, msg| {
                        let fraction = if total == 0 {
                            1.0
                        } else {
                            done as f64 / total as f64
                        };
                        let percent = 55 + (fraction * 45.0).floor() as u32;
                        outer(percent.min(100), &msg);
                    });
                    cb
                });
                match engine_bridge::run(pool, llm, document_id, &config.bridge, progress_cb).await
                {
                    Ok(conns) => {
                        by_engine.insert(ConnectionType::ThematicBridge, conns.len());
                        all_connections.extend(conns);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, document_id = %document_id, "E-BRI failed");
                        engine_errors.insert(ConnectionType::ThematicBridge, e.to_string());
                    }
                }
            }
            None => {
                engine_errors.insert(
                    ConnectionType::ThematicBridge,
                    "thematic_bridge enabled but no LLM client configured".to_string(),
                );
            }
        }
        report(&on_progress, 100, "thematic_bridge done");
    }

    let deduped = dedup_keep_highest_strength(all_connections);
    let total_connections = deduped.len();

    store::save_connections_with_retry(pool, &deduped).await?;

    Ok(ProcessDocumentResult {
        total_connections,
        by_engine,
        execution_time_ms: start.elapsed().as_millis(),
        engine_errors,
    })
}

fn report(cb: &Option<Arc<dyn Fn(u32, &str) + Send + Sync>>, percent: u32, message: &str) {
    if let Some(cb) = cb {
        cb(percent, message);
    }
}

/// Groups by `(source, target, type)`, keeps the highest-strength record,
/// preserves its metadata verbatim (spec.md §4.7).
fn dedup_keep_highest_strength(connections: Vec<Connection>) -> Vec<Connection> {
    let mut best: HashMap<(Uuid, Uuid, ConnectionType), Connection> = HashMap::new();
    for conn in connections {
        let key = (conn.source_chunk_id, conn.target_chunk_id, conn.connection_type);
        match best.get(&key) {
            Some(existing) if existing.strength >= conn.strength => {}
            _ => {
                best.insert(key, conn);
            }
        }
    }
    best.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conn(source: Uuid, target: Uuid, strength: f64) -> Connection {
        Connection::new(
            source,
            target,
            ConnectionType::SemanticSimilarity,
            strength,
            serde_json::json!({"tag": strength}),
            Utc::now(),
        )
    }

    #[test]
    fn dedup_keeps_highest_strength() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let connections = vec![conn(a, b, 0.5), conn(a, b, 0.9), conn(a, b, 0.3)];
        let deduped = dedup_keep_highest_strength(connections);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].strength, 0.9);
    }

    #[test]
    fn dedup_preserves_distinct_triples() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let connections = vec![conn(a, b, 0.5), conn(a, c, 0.7)];
        let deduped = dedup_keep_highest_strength(connections);
        assert_eq!(deduped.len(), 2);
    }
}
