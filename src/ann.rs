//! Embedding ANN query (C2, spec.md §4.2).
//!
//! k-nearest-neighbor search over `chunks.embedding` using pgvector's `<=>`
//! cosine-distance operator. Predicates are pushed into the query so no more
//! than `k` rows are materialized per source chunk.

use anyhow::{Context, Result};
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::store::{row_to_chunk, CandidatePredicates};

/// A neighbor chunk with its cosine similarity to the query embedding.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub chunk: crate::models::Chunk,
    pub document_title: String,
    pub similarity: f64,
}

/// `Neighbors(embedding, predicates, k, similarity_threshold)` (spec.md §4.2).
///
/// pgvector's `<=>` operator returns cosine *distance* (`1 - cosine_similarity`
/// for normalized vectors); we convert back to similarity and filter/sort in
/// SQL so the database does the truncation, not this function.
pub async fn neighbors(
    pool: &PgPool,
    embedding: &[f32],
    predicates: &CandidatePredicates,
    k: i64,
    similarity_threshold: f64,
) -> Result<Vec<Neighbor>> {
    let query_vec = pgvector::Vector::from(embedding.to_vec());
    let max_distance = 1.0 - similarity_threshold;

    let mut sql = String::from(
        "SELECT c.id, c.document_id, c.chunk_index, c.content, c.summary, c.embedding, \
         c.importance_score, c.conceptual_metadata, c.emotional_metadata, c.domain_metadata, \
         c.content_layer, c.content_label, c.is_current, c.reprocessing_batch, \
         d.title AS document_title, \
         (c.embedding <=> $1) AS distance \
         FROM chunks c JOIN documents d ON d.id = c.document_id \
         WHERE c.is_current = true AND c.embedding IS NOT NULL \
         AND (c.embedding <=> $1) <= $2 AND d.user_id = $3",
    );

    let mut arg_idx = 4;
    let mut binds_uuid: Vec<Uuid> = vec![predicates.user_id];

    if let Some(doc_id) = predicates.cross_document_only {
        sql.push_str(&format!(" AND c.document_id != ${}", arg_idx));
        binds_uuid.push(doc_id);
        arg_idx += 1;
    }
    if let Some(exclude) = predicates.excluding_chunk_id {
        sql.push_str(&format!(" AND c.id != ${}", arg_idx));
        binds_uuid.push(exclude);
        arg_idx += 1;
    }
    let mut docs_bind: Option<Vec<Uuid>> = None;
    if let Some(docs) = &predicates.in_documents {
        sql.push_str(&format!(" AND c.document_id = ANY(${})", arg_idx));
        docs_bind = Some(docs.clone());
        #[allow(unused_assignments)]
        {
            arg_idx += 1;
        }
    }

    // Order by ascending distance (descending similarity), ties broken by
    // chunk id ascending (spec.md §4.4 "ties broken by chunk id ascending").
    sql.push_str(" ORDER BY distance ASC, c.id ASC LIMIT $");
    let limit_idx = arg_idx;
    sql.push_str(&limit_idx.to_string());

    let mut query = sqlx::query(&sql).bind(query_vec).bind(max_distance);
    for v in binds_uuid {
        query = query.bind(v);
    }
    if let Some(docs) = docs_bind {
        query = query.bind(docs);
    }
    query = query.bind(k);

    let rows = query.fetch_all(pool).await.context("Neighbors query failed")?;

    rows.iter()
        .map(|row| {
            let chunk = row_to_chunk(row)?;
            let document_title: String = row.try_get("document_title")?;
            let distance: f64 = row.try_get("distance")?;
            Ok(Neighbor {
                chunk,
                document_title,
                similarity: (1.0 - distance).clamp(0.0, 1.0),
            })
        })
        .collect()
}
