//! Chunk store adapter (C1, spec.md §4.1).
//!
//! Typed reads and writes over `documents`, `chunks`, and `chunk_connections`.
//! This is the only module that issues raw SQL for those tables; engines call
//! through it rather than building queries themselves.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::metadata::{ConceptList, ContentLabel, ContentLayer, DomainTag, EmotionalTone};
use crate::models::{CandidateChunk, Chunk, Connection};

/// `current_or_batch` selector (spec.md §4.1).
#[derive(Debug, Clone)]
pub enum CurrentOrBatch {
    IsCurrent,
    ReprocessingBatch(String),
}

impl Default for CurrentOrBatch {
    fn default() -> Self {
        CurrentOrBatch::IsCurrent
    }
}

/// Options for `FetchSourceChunks` (spec.md §4.1).
#[derive(Debug, Clone, Default)]
pub struct SourceOpts {
    pub chunk_ids: Option<Vec<Uuid>>,
    pub importance_threshold: Option<f64>,
    pub require_concepts_and_polarity: bool,
    pub require_domain: bool,
    pub require_embedding: bool,
    pub limit: Option<i64>,
    pub current_or_batch: CurrentOrBatch,
}

/// Predicates for `FetchCandidateChunks` (spec.md §4.1).
///
/// `user_id` is mandatory (not optional): spec.md §1 scopes the core's job to
/// "chunks of all other documents owned by the same user", and spec.md §9
/// names the lack of this scope verbatim as "cross-user leakage is a
/// correctness bug." Every candidate/neighbor query filters on it
/// unconditionally rather than only when a caller remembers to opt in.
#[derive(Debug, Clone, Default)]
pub struct CandidatePredicates {
    pub user_id: Uuid,
    pub cross_document_only: Option<Uuid>,
    pub excluding_chunk_id: Option<Uuid>,
    pub importance_gte: Option<f64>,
    pub require_concepts: bool,
    pub require_polarity: bool,
    pub require_domain: bool,
    pub require_embedding: bool,
    pub different_domain_than: Option<String>,
    pub in_documents: Option<Vec<Uuid>>,
}

pub(crate) fn row_to_chunk(row: &PgRow) -> Result<Chunk> {
    let conceptual: Option<serde_json::Value> = row.try_get("conceptual_metadata")?;
    let emotional: Option<serde_json::Value> = row.try_get("emotional_metadata")?;
    let domain: Option<serde_json::Value> = row.try_get("domain_metadata")?;
    let content_layer: Option<String> = row.try_get("content_layer")?;
    let content_label: Option<String> = row.try_get("content_label")?;
    let embedding: Option<pgvector::Vector> = row.try_get("embedding")?;

    Ok(Chunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        chunk_index: row.try_get("chunk_index")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        embedding: embedding.map(|v| v.to_vec()),
        importance_score: row.try_get("importance_score")?,
        concepts: ConceptList::from_json(conceptual.as_ref()),
        polarity: EmotionalTone::polarity_from_json(emotional.as_ref()),
        domain: DomainTag::from_json(domain.as_ref()),
        content_layer: ContentLayer::from_db(content_layer.as_deref()),
        content_label: ContentLabel::from_db(content_label.as_deref()),
        is_current: row.try_get("is_current")?,
        reprocessing_batch: row.try_get("reprocessing_batch")?,
    })
}

/// Looks up the owning user for a document, so callers can scope
/// `CandidatePredicates`/`Neighbors` queries to that user (spec.md §1, §9).
pub async fn document_user_id(pool: &PgPool, document_id: Uuid) -> Result<Uuid> {
    let row: (Uuid,) = sqlx::query_as("SELECT user_id FROM documents WHERE id = $1")
        .bind(document_id)
        .fetch_one(pool)
        .await
        .context("failed to look up document owner")?;
    Ok(row.0)
}

/// `FetchSourceChunks(document_id, opts)` (spec.md §4.1).
pub async fn fetch_source_chunks(
    pool: &PgPool,
    document_id: Uuid,
    opts: &SourceOpts,
) -> Result<Vec<Chunk>> {
    let mut sql = String::from(
        "SELECT id, document_id, chunk_index, content, summary, embedding, \
         importance_score, conceptual_metadata, emotional_metadata, domain_metadata, \
         content_layer, content_label, is_current, reprocessing_batch \
         FROM chunks WHERE document_id = $1",
    );
    let mut arg_idx = 2;

    match &opts.current_or_batch {
        CurrentOrBatch::IsCurrent => sql.push_str(" AND is_current = true"),
        CurrentOrBatch::ReprocessingBatch(_) => {
            sql.push_str(&format!(" AND reprocessing_batch = ${}", arg_idx));
            arg_idx += 1;
        }
    }

    if opts.chunk_ids.is_some() {
        sql.push_str(&format!(" AND id = ANY(${})", arg_idx));
        arg_idx += 1;
    }
    if opts.importance_threshold.is_some() {
        sql.push_str(&format!(" AND importance_score >= ${}", arg_idx));
        arg_idx += 1;
    }
    if opts.require_concepts_and_polarity {
        sql.push_str(" AND conceptual_metadata IS NOT NULL AND emotional_metadata IS NOT NULL");
    }
    if opts.require_domain {
        sql.push_str(" AND domain_metadata IS NOT NULL");
    }
    if opts.require_embedding {
        sql.push_str(" AND embedding IS NOT NULL");
    }

    sql.push_str(" ORDER BY chunk_index ASC");

    if opts.limit.is_some() {
        sql.push_str(&format!(" LIMIT ${}", arg_idx));
    }

    let mut query = sqlx::query(&sql).bind(document_id);
    if let CurrentOrBatch::ReprocessingBatch(batch) = &opts.current_or_batch {
        query = query.bind(batch.clone());
    }
    if let Some(ids) = &opts.chunk_ids {
        query = query.bind(ids.clone());
    }
    if let Some(t) = opts.importance_threshold {
        query = query.bind(t);
    }
    if let Some(limit) = opts.limit {
        query = query.bind(limit);
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("FetchSourceChunks query failed")?;

    rows.iter().map(row_to_chunk).collect()
}

/// `FetchCandidateChunks(predicates)` (spec.md §4.1). Always joins
/// `documents` to return the target document title alongside each chunk.
pub async fn fetch_candidate_chunks(
    pool: &PgPool,
    predicates: &CandidatePredicates,
) -> Result<Vec<CandidateChunk>> {
    let mut sql = String::from(
        "SELECT c.id, c.document_id, c.chunk_index, c.content, c.summary, c.embedding, \
         c.importance_score, c.conceptual_metadata, c.emotional_metadata, c.domain_metadata, \
         c.content_layer, c.content_label, c.is_current, c.reprocessing_batch, \
         d.title AS document_title \
         FROM chunks c JOIN documents d ON d.id = c.document_id \
         WHERE c.is_current = true AND d.user_id = $1",
    );

    enum Bind {
        Uuid(Uuid),
        UuidVec(Vec<Uuid>),
        F64(f64),
        Str(String),
    }

    let mut arg_idx = 2;
    let mut binds: Vec<Bind> = vec![Bind::Uuid(predicates.user_id)];

    if let Some(doc_id) = predicates.cross_document_only {
        sql.push_str(&format!(" AND c.document_id != ${}", arg_idx));
        binds.push(Bind::Uuid(doc_id));
        arg_idx += 1;
    }
    if let Some(exclude) = predicates.excluding_chunk_id {
        sql.push_str(&format!(" AND c.id != ${}", arg_idx));
        binds.push(Bind::Uuid(exclude));
        arg_idx += 1;
    }
    if let Some(gte) = predicates.importance_gte {
        sql.push_str(&format!(" AND c.importance_score >= ${}", arg_idx));
        binds.push(Bind::F64(gte));
        arg_idx += 1;
    }
    if predicates.require_concepts {
        sql.push_str(" AND c.conceptual_metadata IS NOT NULL");
    }
    if predicates.require_polarity {
        sql.push_str(" AND c.emotional_metadata IS NOT NULL");
    }
    if predicates.require_domain {
        sql.push_str(" AND c.domain_metadata IS NOT NULL");
    }
    if predicates.require_embedding {
        sql.push_str(" AND c.embedding IS NOT NULL");
    }
    if let Some(domain) = &predicates.different_domain_than {
        sql.push_str(&format!(
            " AND (c.domain_metadata->>'primaryDomain') != ${}",
            arg_idx
        ));
        binds.push(Bind::Str(domain.clone()));
        arg_idx += 1;
    }
    if let Some(docs) = &predicates.in_documents {
        sql.push_str(&format!(" AND c.document_id = ANY(${})", arg_idx));
        binds.push(Bind::UuidVec(docs.clone()));
        #[allow(unused_assignments)]
        {
            arg_idx += 1;
        }
    }

    let mut query = sqlx::query(&sql);
    for bind in binds {
        query = match bind {
            Bind::Uuid(v) => query.bind(v),
            Bind::UuidVec(v) => query.bind(v),
            Bind::F64(v) => query.bind(v),
            Bind::Str(v) => query.bind(v),
        };
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("FetchCandidateChunks query failed")?;

    rows.iter()
        .map(|row| {
            let chunk = row_to_chunk(row)?;
            let document_title: String = row.try_get("document_title")?;
            Ok(CandidateChunk {
                chunk,
                document_title,
            })
        })
        .collect()
}

/// `SaveConnections(list)` (spec.md §4.1). Upserts by
/// `(source_chunk_id, target_chunk_id, connection_type)`; the whole batch
/// rolls back on any row error. The caller retries once before surfacing
/// (spec.md §7).
pub async fn save_connections(pool: &PgPool, connections: &[Connection]) -> Result<()> {
    if connections.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    for conn in connections {
        sqlx::query(
            r#"
            INSERT INTO chunk_connections
                (source_chunk_id, target_chunk_id, connection_type, strength,
                 auto_detected, discovered_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_chunk_id, target_chunk_id, connection_type)
            DO UPDATE SET
                strength = EXCLUDED.strength,
                auto_detected = EXCLUDED.auto_detected,
                discovered_at = EXCLUDED.discovered_at,
                metadata = EXCLUDED.metadata
            "#,
        )
        .bind(conn.source_chunk_id)
        .bind(conn.target_chunk_id)
        .bind(conn.connection_type.as_str())
        .bind(conn.strength)
        .bind(conn.auto_detected)
        .bind(conn.discovered_at)
        .bind(&conn.metadata)
        .execute(&mut *tx)
        .await
        .context("SaveConnections row insert failed")?;
    }

    tx.commit().await.context("SaveConnections commit failed")?;
    Ok(())
}

/// Retries `save_connections` once on failure before surfacing the error,
/// per spec.md §4.1/§7.
pub async fn save_connections_with_retry(pool: &PgPool, connections: &[Connection]) -> Result<()> {
    match save_connections(pool, connections).await {
        Ok(()) => Ok(()),
        Err(first_err) => {
            tracing::warn!(error = %first_err, "SaveConnections failed, retrying once");
            save_connections(pool, connections)
                .await
                .context("SaveConnections failed after retry")
        }
    }
}
