//! Typed sub-records for chunk metadata (spec.md §9 "Dynamic metadata shapes").
//!
//! Chunk metadata arrives from the ingestion pipeline as free-form JSONB
//! blobs (`conceptual_metadata`, `emotional_metadata`, `domain_metadata`).
//! Each is parsed once, at load time (in `store::row_to_chunk`), into one of
//! these typed records. A malformed or partially-shaped blob never panics:
//! missing inner fields default out and a blob that doesn't parse at all is
//! treated as absent metadata (the engine that needed it skips the chunk).

use serde::Deserialize;

/// `conceptual_metadata.concepts` — an unordered set of weighted terms.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConceptList {
    #[serde(default)]
    pub concepts: Vec<Concept>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Concept {
    pub term: String,
    #[serde(default)]
    pub importance: f64,
}

impl ConceptList {
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Lowercased, whitespace-normalized term set, for Jaccard overlap
    /// (spec.md §4.5: "normalizes whitespace and case; no stemming").
    pub fn normalized_terms(&self) -> std::collections::HashSet<String> {
        self.concepts
            .iter()
            .map(|c| c.term.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Parse from a JSONB value, tolerating `null` and malformed shapes by
    /// returning an empty list rather than erroring.
    pub fn from_json(value: Option<&serde_json::Value>) -> Self {
        match value {
            Some(v) => serde_json::from_value(v.clone()).unwrap_or_default(),
            None => Self::default(),
        }
    }
}

/// `emotional_metadata.polarity` — a scalar in `[-1, 1]`.
#[derive(Debug, Clone, Deserialize)]
pub struct EmotionalTone {
    pub polarity: Option<f64>,
}

impl EmotionalTone {
    /// Parse from a JSONB value; absent or malformed yields `None` polarity.
    pub fn polarity_from_json(value: Option<&serde_json::Value>) -> Option<f64> {
        value
            .and_then(|v| serde_json::from_value::<EmotionalTone>(v.clone()).ok())
            .and_then(|t| t.polarity)
    }
}

/// `domain_metadata.primaryDomain` — a short string tag.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainTag {
    #[serde(rename = "primaryDomain")]
    pub primary_domain: String,
}

impl DomainTag {
    /// Parse from a JSONB value; absent or malformed yields `None`.
    pub fn from_json(value: Option<&serde_json::Value>) -> Option<Self> {
        value.and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// `content_layer` — null is treated as `BODY` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLayer {
    Body,
    Header,
    Footer,
    Other,
}

impl ContentLayer {
    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            None => ContentLayer::Body,
            Some("BODY") => ContentLayer::Body,
            Some("HEADER") => ContentLayer::Header,
            Some("FOOTER") => ContentLayer::Footer,
            Some(_) => ContentLayer::Other,
        }
    }
}

/// `content_label` — page-furniture tags filtered out by E-BRI (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentLabel {
    PageHeader,
    PageFooter,
    Footnote,
    Reference,
    Other(String),
}

impl ContentLabel {
    pub fn from_db(value: Option<&str>) -> Option<Self> {
        value.map(|s| match s {
            "PAGE_HEADER" => ContentLabel::PageHeader,
            "PAGE_FOOTER" => ContentLabel::PageFooter,
            "FOOTNOTE" => ContentLabel::Footnote,
            "REFERENCE" => ContentLabel::Reference,
            other => ContentLabel::Other(other.to_string()),
        })
    }

    /// True for the labels E-BRI's pre-filter drops (spec.md §4.6 step 2).
    pub fn is_page_furniture(&self) -> bool {
        matches!(
            self,
            ContentLabel::PageHeader
                | ContentLabel::PageFooter
                | ContentLabel::Footnote
                | ContentLabel::Reference
        )
    }
}

/// Jaccard overlap between two term sets (GLOSSARY). Returns `0.0` when both
/// sets are empty (no shared or distinguishing information).
pub fn jaccard(a: &std::collections::HashSet<String>, b: &std::collections::HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn set(terms: &[&str]) -> HashSet<String> {
        terms.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn jaccard_identical_sets_is_one() {
        let a = set(&["privacy", "state"]);
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn jaccard_disjoint_sets_is_zero() {
        let a = set(&["privacy"]);
        let b = set(&["weather"]);
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn jaccard_partial_overlap_matches_spec_example() {
        // spec.md §8 scenario 3: {privacy,state} vs {privacy,state,trust} = 2/3
        let a = set(&["privacy", "state"]);
        let b = set(&["privacy", "state", "trust"]);
        assert!((jaccard(&a, &b) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_both_empty_is_zero() {
        let a: HashSet<String> = HashSet::new();
        let b: HashSet<String> = HashSet::new();
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn concept_list_normalizes_case_and_whitespace() {
        let list = ConceptList {
            concepts: vec![
                Concept {
                    term: " Privacy ".to_string(),
                    importance: 0.5,
                },
                Concept {
                    term: "STATE".to_string(),
                    importance: 0.9,
                },
            ],
        };
        let terms = list.normalized_terms();
        assert!(terms.contains("privacy"));
        assert!(terms.contains("state"));
    }

    #[test]
    fn concept_list_from_malformed_json_is_empty() {
        let value = serde_json::json!({"concepts": "not-an-array"});
        let list = ConceptList::from_json(Some(&value));
        assert!(list.is_empty());
    }

    #[test]
    fn concept_list_from_null_is_empty() {
        assert!(ConceptList::from_json(None).is_empty());
    }

    #[test]
    fn domain_tag_missing_field_is_none() {
        let value = serde_json::json!({"unrelated": "x"});
        assert!(DomainTag::from_json(Some(&value)).is_none());
    }

    #[test]
    fn content_layer_null_maps_to_body() {
        assert_eq!(ContentLayer::from_db(None), ContentLayer::Body);
    }

    #[test]
    fn content_label_page_furniture_detection() {
        assert!(ContentLabel::from_db(Some("FOOTNOTE"))
            .unwrap()
            .is_page_furniture());
        assert!(!ContentLabel::from_db(Some("SOMETHING_ELSE"))
            .unwrap()
            .is_page_furniture());
    }
}
