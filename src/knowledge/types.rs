//! Memory graph records and search result shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A note or fact in the memory graph. The retriever never mutates these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeNode {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeNode {
    /// Text fed to the embedding backend: title, content and tags.
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}\n{}", self.title, self.content, self.tags.join(" "))
    }

    /// Most recent of creation and update time.
    pub fn latest_activity(&self) -> DateTime<Utc> {
        self.created_at.max(self.updated_at)
    }
}

/// Typed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    /// Assigned on import when empty.
    #[serde(default)]
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type", alias = "link_type")]
    pub link_type: String,
    pub created_at: DateTime<Utc>,
}

/// Which nodes a search considers.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Keep nodes carrying at least one of these tags (case-insensitive).
    pub tags: Vec<String>,
    /// Keep nodes updated at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

impl NodeFilter {
    pub fn matches(&self, node: &KnowledgeNode) -> bool {
        if let Some(since) = self.since {
            if node.latest_activity() < since {
                return false;
            }
        }
        if self.tags.is_empty() {
            return true;
        }
        node.tags
            .iter()
            .any(|t| self.tags.iter().any(|f| f.eq_ignore_ascii_case(t)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Semantic,
    Keyword,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    /// Final score after re-ranking (equal to `base_score` when disabled).
    pub score: f64,
    /// Cosine similarity or keyword score before re-ranking.
    pub base_score: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    pub reranked: bool,
    pub results: Vec<SearchHit>,
    /// Candidates that passed scoring before the result limit was applied.
    pub total_matched: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn node(tags: &[&str], age_days: i64) -> KnowledgeNode {
        let ts = Utc::now() - Duration::days(age_days);
        KnowledgeNode {
            id: "n1".into(),
            title: "Title".into(),
            content: "Body".into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            metadata: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(NodeFilter::default().matches(&node(&[], 400)));
    }

    #[test]
    fn tag_filter_is_case_insensitive() {
        let filter = NodeFilter {
            tags: vec!["Rust".into()],
            since: None,
        };
        assert!(filter.matches(&node(&["rust", "async"], 0)));
        assert!(!filter.matches(&node(&["python"], 0)));
    }

    #[test]
    fn since_filter_drops_stale_nodes() {
        let filter = NodeFilter {
            tags: vec![],
            since: Some(Utc::now() - Duration::days(7)),
        };
        assert!(filter.matches(&node(&[], 1)));
        assert!(!filter.matches(&node(&[], 30)));
    }

    #[test]
    fn link_accepts_type_alias() {
        let link: Link = serde_json::from_str(
            r#"{"id":"l1","source_id":"a","target_id":"b","link_type":"cites",
                "created_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(link.link_type, "cites");
    }
}
