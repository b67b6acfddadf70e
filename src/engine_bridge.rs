//! Thematic-bridge engine (E-BRI, C6, spec.md §4.6).
//!
//! Cross-domain analogical/causal/argumentative bridge finder. The only
//! engine that calls the LLM, so it filters aggressively before spending a
//! single API call.

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use sqlx::postgres::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::llm::LlmClient;
use crate::metadata::ContentLabel;
use crate::models::{CandidateChunk, Chunk, Connection, ConnectionType};
use crate::store::{self, CandidatePredicates, CurrentOrBatch, SourceOpts};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub min_importance: f64,
    pub min_strength: f64,
    pub max_source_chunks: i64,
    pub max_candidates_per_source: i64,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub source_chunk_ids: Option<Vec<Uuid>>,
    pub target_document_ids: Option<Vec<Uuid>>,
}

impl BridgeConfig {
    pub fn from_configs(
        bridge: &crate::config::BridgeConfig,
        llm: &crate::config::LlmConfig,
    ) -> Self {
        Self {
            min_importance: bridge.min_importance,
            min_strength: bridge.min_strength,
            max_source_chunks: bridge.max_source_chunks,
            max_candidates_per_source: bridge.max_candidates_per_source,
            batch_size: bridge.batch_size,
            max_concurrent_batches: llm.max_concurrent_batches,
            source_chunk_ids: None,
            target_document_ids: None,
        }
    }
}

/// A progress callback invoked after each batch: `(sources_done, total_sources, message)`.
pub type ProgressFn = Arc<dyn Fn(usize, usize, String) + Send + Sync>;

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    bridges: Vec<RawBridge>,
}

#[derive(Debug, Deserialize)]
struct RawBridge {
    #[serde(rename = "targetIndex")]
    target_index: usize,
    #[serde(rename = "bridgeType")]
    bridge_type: String,
    strength: f64,
    explanation: String,
    #[serde(rename = "bridgeConcepts", default)]
    bridge_concepts: Vec<String>,
}

/// Runs E-BRI for one document, returning `thematic_bridge` connections
/// (spec.md §4.6).
pub async fn run(
    pool: &PgPool,
    llm: &LlmClient,
    document_id: Uuid,
    config: &BridgeConfig,
    progress: Option<ProgressFn>,
) -> Result<Vec<Connection>> {
    let sources = load_clean_sources(pool, document_id, config).await?;
    let total_sources = sources.len();
    let ai_call_count = Arc::new(AtomicUsize::new(0));
    let sources_done = Arc::new(AtomicUsize::new(0));

    // Scope every candidate lookup to the source document's owner (spec.md
    // §1, §9: "cross-user leakage is a correctness bug").
    let user_id = store::document_user_id(pool, document_id).await?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches.max(1)));
    let mut tasks = JoinSet::new();

    for (source_idx, source) in sources.into_iter().enumerate() {
        let predicates = CandidatePredicates {
            user_id,
            cross_document_only: Some(document_id),
            importance_gte: Some(config.min_importance),
            require_domain: true,
            different_domain_than: source
                .domain
                .as_ref()
                .map(|d| d.primary_domain.clone()),
            in_documents: config.target_document_ids.clone(),
            ..Default::default()
        };
        let mut candidates = store::fetch_candidate_chunks(pool, &predicates).await?;
        candidates.sort_by(|a, b| {
            b.chunk
                .importance_score
                .unwrap_or(0.0)
                .partial_cmp(&a.chunk.importance_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(config.max_candidates_per_source as usize);

        if candidates.is_empty() {
            sources_done.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        for (batch_idx, batch) in candidates.chunks(config.batch_size).enumerate() {
            let semaphore = semaphore.clone();
            let llm = llm.clone();
            let source = source.clone();
            let batch: Vec<CandidateChunk> = batch.to_vec();
            let min_strength = config.min_strength;
            let ai_call_count = ai_call_count.clone();
            let sources_done = sources_done.clone();
            let progress = progress.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let prompt = build_prompt(&source, &batch, min_strength);

                let raw = match llm.generate(&prompt).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        tracing::warn!(error = %e, source_chunk = %source.id, batch_idx, "E-BRI generate failed, skipping batch");
                        return Vec::new();
                    }
                };

                ai_call_count.fetch_add(1, Ordering::SeqCst);

                let parsed = match crate::json_repair::parse_json_tolerant(&raw) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            excerpt = %crate::json_repair::bounded_excerpt(&raw),
                            source_chunk = %source.id,
                            batch_idx,
                            "E-BRI unrecoverable JSON parse failure, skipping batch"
                        );
                        return Vec::new();
                    }
                };

                let response: BridgeResponse = match serde_json::from_value(parsed) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, source_chunk = %source.id, batch_idx, "E-BRI missing bridges array, skipping batch");
                        return Vec::new();
                    }
                };

                let now = Utc::now();
                let mut connections = Vec::new();
                for bridge in response.bridges {
                    if bridge.strength < min_strength {
                        continue;
                    }
                    let Some(target) = batch.get(bridge.target_index) else {
                        tracing::warn!(
                            target_index = bridge.target_index,
                            batch_len = batch.len(),
                            "E-BRI targetIndex out of bounds, skipping bridge"
                        );
                        continue;
                    };
                    let metadata = serde_json::json!({
                        "bridge_type": bridge.bridge_type,
                        "explanation": bridge.explanation,
                        "bridge_concepts": bridge.bridge_concepts,
                        "source_domain": source.domain.as_ref().map(|d| d.primary_domain.clone()),
                        "target_domain": target.chunk.domain.as_ref().map(|d| d.primary_domain.clone()),
                        "target_document_title": target.document_title,
                        "target_snippet": target.chunk.snippet(),
                    });
                    connections.push(Connection::new(
                        source.id,
                        target.chunk.id,
                        ConnectionType::ThematicBridge,
                        bridge.strength,
                        metadata,
                        now,
                    ));
                }

                let done = sources_done.load(Ordering::SeqCst);
                if let Some(cb) = &progress {
                    cb(
                        done,
                        total_sources,
                        format!(
                            "source {}/{} batch {} (AI calls so far: {})",
                            source_idx + 1,
                            total_sources,
                            batch_idx,
                            ai_call_count.load(Ordering::SeqCst)
                        ),
                    );
                }

                connections
            });
        }
        sources_done.fetch_add(1, Ordering::SeqCst);
    }

    let mut all = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(connections) => all.extend(connections),
            Err(join_err) => tracing::warn!(error = %join_err, "E-BRI batch task panicked, skipping"),
        }
    }

    Ok(all)
}

async fn load_clean_sources(
    pool: &PgPool,
    document_id: Uuid,
    config: &BridgeConfig,
) -> Result<Vec<Chunk>> {
    let chunks = if let Some(ids) = &config.source_chunk_ids {
        let opts = SourceOpts {
            chunk_ids: Some(ids.clone()),
            current_or_batch: CurrentOrBatch::IsCurrent,
            ..Default::default()
        };
        store::fetch_source_chunks(pool, document_id, &opts).await?
    } else {
        let opts = SourceOpts {
            importance_threshold: Some(config.min_importance),
            require_domain: true,
            limit: Some(config.max_source_chunks),
            current_or_batch: CurrentOrBatch::IsCurrent,
            ..Default::default()
        };
        let mut chunks = store::fetch_source_chunks(pool, document_id, &opts).await?;
        chunks.sort_by(|a, b| {
            b.importance_score
                .unwrap_or(0.0)
                .partial_cmp(&a.importance_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        chunks.truncate(config.max_source_chunks as usize);
        chunks
    };

    Ok(chunks
        .into_iter()
        .filter(|c| clean(c))
        .collect())
}

/// content-layer / content-label pre-filter (spec.md §4.6 step 2).
fn clean(chunk: &Chunk) -> bool {
    if chunk.content_layer != crate::metadata::ContentLayer::Body {
        return false;
    }
    if let Some(label) = &chunk.content_label {
        if label.is_page_furniture() {
            return false;
        }
    }
    true
}

fn build_prompt(source: &Chunk, batch: &[CandidateChunk], min_strength: f64) -> String {
    let source_summary = source.summary.as_deref().unwrap_or("(no summary)");
    let source_excerpt = source.content_excerpt();

    let mut candidates_section = String::new();
    for (i, candidate) in batch.iter().enumerate() {
        let domain = candidate
            .chunk
            .domain
            .as_ref()
            .map(|d| d.primary_domain.as_str())
            .unwrap_or("unknown");
        let summary = candidate.chunk.summary.as_deref().unwrap_or("(no summary)");
        candidates_section.push_str(&format!(
            "[{}] domain={} summary=\"{}\" excerpt=\"{}\"\n",
            i,
            domain,
            summary,
            candidate.chunk.content_excerpt()
        ));
    }

    format!(
        "You are finding thematic bridges between a source passage and candidate passages from \
         other documents in different domains.\n\
         Source summary: \"{source_summary}\"\n\
         Source excerpt: \"{source_excerpt}\"\n\
         Candidates:\n{candidates_section}\n\
         For each candidate that forms a genuine bridge with strength >= {min_strength}, return it. \
         Respond with JSON only, shape: \
         {{\"bridges\":[{{\"targetIndex\":int,\"bridgeType\":\"conceptual\"|\"causal\"|\"temporal\"|\
         \"argumentative\"|\"metaphorical\"|\"contextual\",\"strength\":real in [0,1],\
         \"explanation\":string,\"bridgeConcepts\":[string,...]}}]}}. \
         Refer to candidates by their summary as a title in your explanation."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ConceptList, ContentLayer, DomainTag};

    fn chunk_with(importance: Option<f64>, layer: ContentLayer, label: Option<ContentLabel>) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            chunk_index: 0,
            content: "x".repeat(300),
            summary: Some("summary".to_string()),
            embedding: None,
            importance_score: importance,
            concepts: ConceptList::default(),
            polarity: None,
            domain: Some(DomainTag {
                primary_domain: "philosophy".to_string(),
            }),
            content_layer: layer,
            content_label: label,
            is_current: true,
            reprocessing_batch: None,
        }
    }

    #[test]
    fn clean_rejects_non_body_layer() {
        let c = chunk_with(Some(0.8), ContentLayer::Header, None);
        assert!(!clean(&c));
    }

    #[test]
    fn clean_rejects_page_furniture_label() {
        let c = chunk_with(Some(0.8), ContentLayer::Body, Some(ContentLabel::Footnote));
        assert!(!clean(&c));
    }

    #[test]
    fn clean_accepts_plain_body_chunk() {
        let c = chunk_with(Some(0.8), ContentLayer::Body, None);
        assert!(clean(&c));
    }

    #[test]
    fn build_prompt_includes_threshold_and_candidates() {
        let source = chunk_with(Some(0.8), ContentLayer::Body, None);
        let candidate = CandidateChunk {
            chunk: chunk_with(Some(0.7), ContentLayer::Body, None),
            document_title: "Other Doc".to_string(),
        };
        let prompt = build_prompt(&source, &[candidate], 0.6);
        assert!(prompt.contains("0.6"));
        assert!(prompt.contains("Other Doc") || prompt.contains("philosophy"));
    }
}
