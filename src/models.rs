//! Core data models used throughout the connection engine.
//!
//! These types represent the documents, chunks, connections, and jobs that
//! flow through cross-document detection. Chunks and documents are produced
//! by an external ingestion pipeline; the engine only reads them. Connections
//! and job-lifecycle fields are owned and written by this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::{ConceptList, ContentLabel, ContentLayer, DomainTag};

/// A document owned by a user. Opaque to the engine except as a scope
/// predicate (`id`, `user_id`); the engine never creates or deletes these.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
}

/// A positioned text segment of a document, enriched with semantic metadata
/// by an external pipeline. Only `is_current = true` chunks are visible to
/// detection.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i64,
    pub content: String,
    pub summary: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub importance_score: Option<f64>,
    pub concepts: ConceptList,
    pub polarity: Option<f64>,
    pub domain: Option<DomainTag>,
    pub content_layer: ContentLayer,
    pub content_label: Option<ContentLabel>,
    pub is_current: bool,
    pub reprocessing_batch: Option<String>,
}

impl Chunk {
    /// First ~200 chars of `summary` if present, else of `content`. Used as
    /// `target_snippet` in connection metadata (spec.md §4.4).
    pub fn snippet(&self) -> String {
        let source = self.summary.as_deref().unwrap_or(&self.content);
        truncate_chars(source, 200)
    }

    /// First ~200 chars of `content`, used in E-BRI prompts (spec.md §4.6).
    pub fn content_excerpt(&self) -> String {
        truncate_chars(&self.content, 200)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// A candidate chunk returned alongside its parent document's title, as
/// required by `FetchCandidateChunks` (spec.md §4.1).
#[derive(Debug, Clone)]
pub struct CandidateChunk {
    pub chunk: Chunk,
    pub document_title: String,
}

/// The three connection types the engine can emit (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    SemanticSimilarity,
    ContradictionDetection,
    ThematicBridge,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::SemanticSimilarity => "semantic_similarity",
            ConnectionType::ContradictionDetection => "contradiction_detection",
            ConnectionType::ThematicBridge => "thematic_bridge",
        }
    }

    /// Parses one of the three wire strings (spec.md §3); unknown names are
    /// a configuration error (spec.md §7 "unknown engine name").
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "semantic_similarity" => Some(ConnectionType::SemanticSimilarity),
            "contradiction_detection" => Some(ConnectionType::ContradictionDetection),
            "thematic_bridge" => Some(ConnectionType::ThematicBridge),
            _ => None,
        }
    }
}

/// A typed, scored, directed edge from `source_chunk_id` to `target_chunk_id`
/// (spec.md §3). `(source_chunk_id, target_chunk_id, connection_type)` must
/// be unique after save; a second detection overwrites.
#[derive(Debug, Clone)]
pub struct Connection {
    pub source_chunk_id: Uuid,
    pub target_chunk_id: Uuid,
    pub connection_type: ConnectionType,
    pub strength: f64,
    pub auto_detected: bool,
    pub discovered_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl Connection {
    /// Construct a connection with `auto_detected = true`, per spec.md §3.
    /// `strength` is clamped to `[0, 1]`.
    pub fn new(
        source_chunk_id: Uuid,
        target_chunk_id: Uuid,
        connection_type: ConnectionType,
        strength: f64,
        metadata: serde_json::Value,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_chunk_id,
            target_chunk_id,
            connection_type,
            strength: strength.clamp(0.0, 1.0),
            auto_detected: true,
            discovered_at,
            metadata,
        }
    }
}

/// Lifecycle status of a detection job (spec.md §3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A background-job record (external queue, spec.md §3). The engine reads
/// `input_data` and writes the mutable lifecycle fields; it does not define
/// the queue itself.
#[derive(Debug, Clone)]
pub struct DetectionJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub input: DetectionJobInput,
}

/// Parsed `input_data` for a detect-connections job (spec.md §3, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionJobInput {
    pub document_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub chunk_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub trigger: Option<String>,
    /// Per-engine override (spec.md §6 "per-engine overrides optional"):
    /// scopes every engine's candidate search to these documents, critical
    /// for bounding E-BRI's LLM-call volume (spec.md §4.7).
    #[serde(default)]
    pub target_document_ids: Option<Vec<Uuid>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_chunk(content: &str, summary: Option<&str>) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            chunk_index: 0,
            content: content.to_string(),
            summary: summary.map(|s| s.to_string()),
            embedding: None,
            importance_score: None,
            concepts: ConceptList::default(),
            polarity: None,
            domain: None,
            content_layer: ContentLayer::Body,
            content_label: None,
            is_current: true,
            reprocessing_batch: None,
        }
    }

    #[test]
    fn snippet_truncates_to_200_chars() {
        let chunk = empty_chunk(&"a".repeat(500), None);
        assert_eq!(chunk.snippet().chars().count(), 200);
    }

    #[test]
    fn snippet_prefers_summary_over_content() {
        let chunk = empty_chunk("full content here", Some("short summary"));
        assert_eq!(chunk.snippet(), "short summary");
    }

    #[test]
    fn connection_strength_is_clamped() {
        let now = Utc::now();
        let c = Connection::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ConnectionType::SemanticSimilarity,
            1.5,
            serde_json::json!({}),
            now,
        );
        assert_eq!(c.strength, 1.0);

        let c2 = Connection::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ConnectionType::SemanticSimilarity,
            -0.5,
            serde_json::json!({}),
            now,
        );
        assert_eq!(c2.strength, 0.0);
    }

    #[test]
    fn job_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn connection_type_round_trips_through_str() {
        for ty in [
            ConnectionType::SemanticSimilarity,
            ConnectionType::ContradictionDetection,
            ConnectionType::ThematicBridge,
        ] {
            assert_eq!(ConnectionType::from_str(ty.as_str()), Some(ty));
        }
    }

    #[test]
    fn connection_type_rejects_unknown_name() {
        assert_eq!(ConnectionType::from_str("not_a_real_engine"), None);
    }
}
