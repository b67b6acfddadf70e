//! Contradiction engine (E-CON, C5, spec.md §4.5).
//!
//! Metadata-only tension detector: same-topic chunks with opposing polarity.
//! No LLM. Optionally supplemented by a direct-negation fallback pass
//! (SPEC_FULL.md §3.1, grounded in spec.md §9's "two overlapping contradiction
//! detectors" design note).

use anyhow::Result;
use chrono::Utc;
use regex::RegexSet;
use sqlx::postgres::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::metadata::jaccard;
use crate::models::{Chunk, Connection, ConnectionType};
use crate::store::{self, CandidatePredicates, CurrentOrBatch, SourceOpts};

#[derive(Debug, Clone)]
pub struct ContradictionConfig {
    pub min_concept_overlap: f64,
    pub polarity_threshold: f64,
    pub max_results_per_chunk: usize,
    pub cross_document_only: bool,
    pub source_chunk_ids: Option<Vec<Uuid>>,
    pub target_document_ids: Option<Vec<Uuid>>,
    pub enable_negation_fallback: bool,
}

impl From<&crate::config::ContradictionConfig> for ContradictionConfig {
    fn from(c: &crate::config::ContradictionConfig) -> Self {
        Self {
            min_concept_overlap: c.min_concept_overlap,
            polarity_threshold: c.polarity_threshold,
            max_results_per_chunk: c.max_results_per_chunk,
            cross_document_only: c.cross_document_only,
            source_chunk_ids: None,
            target_document_ids: None,
            enable_negation_fallback: c.enable_negation_fallback,
        }
    }
}

/// Runs E-CON for one document, returning `contradiction_detection`
/// connections (spec.md §4.5), grouped by source and capped at
/// `max_results_per_chunk` by descending strength.
pub async fn run(pool: &PgPool, document_id: Uuid, config: &ContradictionConfig) -> Result<Vec<Connection>> {
    let source_opts = SourceOpts {
        chunk_ids: config.source_chunk_ids.clone(),
        require_concepts_and_polarity: true,
        current_or_batch: CurrentOrBatch::IsCurrent,
        ..Default::default()
    };
    let sources = store::fetch_source_chunks(pool, document_id, &source_opts).await?;

    // Scope every candidate lookup to the source document's owner (spec.md
    // §1, §9: "cross-user leakage is a correctness bug").
    let user_id = store::document_user_id(pool, document_id).await?;

    let candidate_predicates = CandidatePredicates {
        user_id,
        cross_document_only: if config.cross_document_only {
            Some(document_id)
        } else {
            None
        },
        require_concepts: true,
        require_polarity: true,
        in_documents: config.target_document_ids.clone(),
        ..Default::default()
    };
    let candidates = store::fetch_candidate_chunks(pool, &candidate_predicates).await?;

    let now = Utc::now();
    let negation_matcher = NegationMatcher::new();
    let mut all = Vec::new();

    for source in &sources {
        let polarity_s = match source.polarity {
            Some(p) if p.abs() >= 0.1 => p,
            _ => continue,
        };
        if source.concepts.is_empty() {
            continue;
        }
        let source_terms = source.concepts.normalized_terms();

        let mut matched_targets: HashSet<Uuid> = HashSet::new();
        let mut group = Vec::new();

        for candidate in &candidates {
            let c = &candidate.chunk;
            if c.id == source.id {
                continue;
            }
            let polarity_c = match c.polarity {
                Some(p) => p,
                None => continue,
            };

            let candidate_terms = c.concepts.normalized_terms();
            let overlap = jaccard(&source_terms, &candidate_terms);
            if overlap < config.min_concept_overlap {
                continue;
            }
            if polarity_s * polarity_c >= 0.0 {
                continue;
            }
            let polarity_distance = (polarity_s - polarity_c).abs();
            if polarity_distance < config.polarity_threshold {
                continue;
            }

            let importance_s = source.importance_score.unwrap_or(0.0);
            let importance_c = c.importance_score.unwrap_or(0.0);
            let strength = (0.4 * overlap
                + 0.4 * (polarity_distance / 2.0)
                + 0.2 * ((importance_s + importance_c) / 2.0))
                .clamp(0.0, 1.0);

            let mut shared_concepts: Vec<&String> =
                source_terms.intersection(&candidate_terms).collect();
            shared_concepts.sort();
            let shared_concepts: Vec<String> =
                shared_concepts.into_iter().take(10).cloned().collect();
            let top_three = shared_concepts
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");

            let metadata = serde_json::json!({
                "concept_overlap": overlap,
                "polarity_distance": polarity_distance,
                "source_polarity": polarity_s,
                "target_polarity": polarity_c,
                "shared_concepts": shared_concepts,
                "target_document_title": candidate.document_title,
                "target_snippet": c.snippet(),
                "explanation": format!(
                    "Discussing {} with opposing stances (polarity difference {:.2})",
                    top_three, polarity_distance
                ),
            });

            matched_targets.insert(c.id);
            group.push(Connection::new(
                source.id,
                c.id,
                ConnectionType::ContradictionDetection,
                strength,
                metadata,
                now,
            ));
        }

        if config.enable_negation_fallback {
            group.extend(negation_fallback_for_source(
                source,
                &candidates
                    .iter()
                    .filter(|cand| !matched_targets.contains(&cand.chunk.id))
                    .collect::<Vec<_>>(),
                &negation_matcher,
                now,
            ));
        }

        group.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
        group.truncate(config.max_results_per_chunk);
        all.extend(group);
    }

    Ok(all)
}

/// Lightweight negation scan (SPEC_FULL.md §3.1): shared concept term
/// co-occurring with a negation marker in one chunk's sentences and the bare
/// assertion in the other's.
struct NegationMatcher {
    markers: RegexSet,
}

impl NegationMatcher {
    fn new() -> Self {
        let markers = RegexSet::new([
            r"(?i)\bnot\b",
            r"(?i)\bno longer\b",
            r"(?i)\bnever\b",
            r"(?i)\bisn't\b",
            r"(?i)\bdoesn't\b",
            r"(?i)\bdon't\b",
            r"(?i)\bwon't\b",
        ])
        .expect("static negation patterns are valid regex");
        Self { markers }
    }

    fn has_negation(&self, sentence: &str) -> bool {
        self.markers.is_match(sentence)
    }
}

fn sentences(content: &str) -> Vec<&str> {
    content
        .split(['.', '!', '?'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

fn negation_fallback_for_source(
    source: &Chunk,
    candidates: &[&crate::models::CandidateChunk],
    matcher: &NegationMatcher,
    now: chrono::DateTime<Utc>,
) -> Vec<Connection> {
    let source_terms = source.concepts.normalized_terms();
    if source_terms.is_empty() {
        return Vec::new();
    }
    let source_sentences = sentences(&source.content);

    let mut out = Vec::new();
    for candidate in candidates {
        let c = &candidate.chunk;
        let candidate_terms = c.concepts.normalized_terms();
        let shared: Vec<&String> = source_terms.intersection(&candidate_terms).collect();
        if shared.is_empty() {
            continue;
        }
        let candidate_sentences = sentences(&c.content);

        let mut found_term: Option<&str> = None;
        'terms: for term in &shared {
            let term_lower = term.as_str();
            let source_has_negated = source_sentences
                .iter()
                .any(|s| s.to_lowercase().contains(term_lower) && matcher.has_negation(s));
            let candidate_has_bare = candidate_sentences
                .iter()
                .any(|s| s.to_lowercase().contains(term_lower) && !matcher.has_negation(s));
            let candidate_has_negated = candidate_sentences
                .iter()
                .any(|s| s.to_lowercase().contains(term_lower) && matcher.has_negation(s));
            let source_has_bare = source_sentences
                .iter()
                .any(|s| s.to_lowercase().contains(term_lower) && !matcher.has_negation(s));

            if (source_has_negated && candidate_has_bare) || (candidate_has_negated && source_has_bare) {
                found_term = Some(term_lower);
                break 'terms;
            }
        }

        let Some(term) = found_term else { continue };
        let overlap = 1.0 / shared.len().max(1) as f64;
        let importance_s = source.importance_score.unwrap_or(0.0);
        let importance_c = c.importance_score.unwrap_or(0.0);
        let strength = (0.4 * overlap + 0.4 * 0.5 + 0.2 * ((importance_s + importance_c) / 2.0))
            .clamp(0.0, 1.0);

        let metadata = serde_json::json!({
            "contradiction_type": "direct_negation",
            "shared_concepts": [term],
            "target_document_title": candidate.document_title,
            "target_snippet": c.snippet(),
            "explanation": format!("Direct negation of \"{}\" across documents", term),
        });

        out.push(Connection::new(
            source.id,
            c.id,
            ConnectionType::ContradictionDetection,
            strength,
            metadata,
            now,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ConceptList;

    fn chunk(content: &str, terms: &[&str], importance: Option<f64>) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            chunk_index: 0,
            content: content.to_string(),
            summary: None,
            embedding: None,
            importance_score: importance,
            concepts: ConceptList {
                concepts: terms
                    .iter()
                    .map(|t| crate::metadata::Concept {
                        term: t.to_string(),
                        importance: 0.5,
                    })
                    .collect(),
            },
            polarity: None,
            domain: None,
            content_layer: crate::metadata::ContentLayer::Body,
            content_label: None,
            is_current: true,
            reprocessing_batch: None,
        }
    }

    #[test]
    fn negation_matcher_detects_common_markers() {
        let m = NegationMatcher::new();
        assert!(m.has_negation("The policy does not apply here"));
        assert!(m.has_negation("State power no longer holds"));
        assert!(!m.has_negation("Privacy is a core right"));
    }

    #[test]
    fn negation_fallback_matches_shared_term_with_opposing_assertion() {
        let source = chunk(
            "Privacy is not guaranteed under this regime. The state may intervene.",
            &["privacy"],
            Some(0.5),
        );
        let candidate = chunk(
            "Privacy is a fundamental right in our constitution.",
            &["privacy"],
            Some(0.5),
        );
        let candidate_chunk = crate::models::CandidateChunk {
            chunk: candidate,
            document_title: "Doc B".to_string(),
        };

        let matcher = NegationMatcher::new();
        let now = Utc::now();
        let out = negation_fallback_for_source(&source, &[&candidate_chunk], &matcher, now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].metadata["contradiction_type"], "direct_negation");
    }

    #[test]
    fn negation_fallback_skips_when_no_shared_terms() {
        let source = chunk("Privacy is not guaranteed.", &["privacy"], Some(0.5));
        let candidate = chunk("Weather was fine today.", &["weather"], Some(0.5));
        let candidate_chunk = crate::models::CandidateChunk {
            chunk: candidate,
            document_title: "Doc B".to_string(),
        };
        let matcher = NegationMatcher::new();
        let out = negation_fallback_for_source(&source, &[&candidate_chunk], &matcher, Utc::now());
        assert!(out.is_empty());
    }
}
