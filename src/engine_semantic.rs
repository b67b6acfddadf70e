//! Semantic similarity engine (E-SEM, C4, spec.md §4.4).
//!
//! Embedding-based cross-document neighbor finding above a threshold.
//! Metadata-free: runs purely off `chunks.embedding` via the ANN query (C2).

use anyhow::Result;
use chrono::Utc;
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::ann;
use crate::models::{Connection, ConnectionType};
use crate::store::{self, CandidatePredicates, CurrentOrBatch, SourceOpts};

#[derive(Debug, Clone)]
pub struct SemanticConfig {
    pub similarity_threshold: f64,
    pub max_results_per_chunk: i64,
    pub cross_document_only: bool,
    pub source_chunk_ids: Option<Vec<Uuid>>,
    pub target_document_ids: Option<Vec<Uuid>>,
    pub fan_out: usize,
}

impl From<&crate::config::SemanticConfig> for SemanticConfig {
    fn from(c: &crate::config::SemanticConfig) -> Self {
        Self {
            similarity_threshold: c.similarity_threshold,
            max_results_per_chunk: c.max_results_per_chunk,
            cross_document_only: c.cross_document_only,
            source_chunk_ids: None,
            target_document_ids: None,
            fan_out: c.fan_out,
        }
    }
}

/// Runs E-SEM for one document, returning `semantic_similarity` connections
/// (spec.md §4.4). Self-match is suppressed; ties in similarity are broken by
/// chunk id ascending inside the ANN query itself. Source-chunk loops run
/// concurrently up to `config.fan_out` (spec.md §5: "up to 3 for E-SEM").
pub async fn run(pool: &PgPool, document_id: Uuid, config: &SemanticConfig) -> Result<Vec<Connection>> {
    let opts = SourceOpts {
        chunk_ids: config.source_chunk_ids.clone(),
        require_embedding: true,
        current_or_batch: CurrentOrBatch::IsCurrent,
        ..Default::default()
    };

    let sources = store::fetch_source_chunks(pool, document_id, &opts).await?;
    let sources: Vec<_> = sources
        .into_iter()
        .filter(|c| c.embedding.is_some())
        .collect();

    // Scope every neighbor lookup to the source document's owner (spec.md §1,
    // §9: "cross-user leakage is a correctness bug").
    let user_id = store::document_user_id(pool, document_id).await?;

    let now = Utc::now();
    let semaphore = Arc::new(Semaphore::new(config.fan_out.max(1)));
    let mut tasks = JoinSet::new();

    for source in sources {
        let semaphore = semaphore.clone();
        let pool = pool.clone();
        let config = config.clone();

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            let embedding = source.embedding.clone().expect("filtered above");
            let predicates = CandidatePredicates {
                user_id,
                cross_document_only: if config.cross_document_only {
                    Some(source.document_id)
                } else {
                    None
                },
                excluding_chunk_id: Some(source.id),
                in_documents: config.target_document_ids.clone(),
                ..Default::default()
            };

            let neighbors = ann::neighbors(
                &pool,
                &embedding,
                &predicates,
                config.max_results_per_chunk,
                config.similarity_threshold,
            )
            .await?;

            let connections: Vec<Connection> = neighbors
                .into_iter()
                .filter(|n| n.chunk.id != source.id)
                .map(|n| {
                    let metadata = serde_json::json!({
                        "similarity": n.similarity,
                        "target_document_title": n.document_title,
                        "target_snippet": n.chunk.snippet(),
                        "explanation": format!("Near-paraphrase match (cosine {:.3})", n.similarity),
                    });
                    Connection::new(
                        source.id,
                        n.chunk.id,
                        ConnectionType::SemanticSimilarity,
                        n.similarity,
                        metadata,
                        now,
                    )
                })
                .collect();

            Ok::<Vec<Connection>, anyhow::Error>(connections)
        });
    }

    let mut all = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(mut connections)) => all.append(&mut connections),
            Ok(Err(e)) => tracing::warn!(error = %e, "E-SEM source chunk failed, skipping"),
            Err(join_err) => tracing::warn!(error = %join_err, "E-SEM task panicked, skipping"),
        }
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_carries_defaults() {
        let cfg = crate::config::SemanticConfig::default();
        let sem: SemanticConfig = (&cfg).into();
        assert_eq!(sem.similarity_threshold, 0.7);
        assert!(sem.cross_document_only);
        assert_eq!(sem.fan_out, 3);
    }
}
