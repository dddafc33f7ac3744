//! Read access to the memory graph.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::types::{KnowledgeNode, Link, NodeFilter};
use crate::db;

/// Read-only view of a memory graph, as used by the retriever.
pub trait MemoryGraph: Send + Sync {
    /// Nodes passing `filter`.
    fn nodes(&self, filter: &NodeFilter) -> Result<Vec<KnowledgeNode>>;

    /// Links touching each of `ids`, counted in both directions.
    fn edge_counts(&self, ids: &[&str]) -> Result<HashMap<String, usize>>;
}

/// Graph held entirely in memory; used for JSON exports and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryGraph {
    nodes: Vec<KnowledgeNode>,
    links: Vec<Link>,
}

impl InMemoryGraph {
    pub fn new(nodes: Vec<KnowledgeNode>, links: Vec<Link>) -> Self {
        Self { nodes, links }
    }

    /// Load a `{"nodes": [...], "links": [...]}` document.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let doc: db::GraphDocument = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse graph document {}", path.display()))?;
        Ok(Self::new(doc.nodes, doc.links))
    }
}

impl MemoryGraph for InMemoryGraph {
    fn nodes(&self, filter: &NodeFilter) -> Result<Vec<KnowledgeNode>> {
        Ok(self
            .nodes
            .iter()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect())
    }

    fn edge_counts(&self, ids: &[&str]) -> Result<HashMap<String, usize>> {
        Ok(ids
            .iter()
            .map(|id| {
                let count = self
                    .links
                    .iter()
                    .filter(|l| l.source_id == *id || l.target_id == *id)
                    .count();
                (id.to_string(), count)
            })
            .collect())
    }
}

/// Graph backed by the SQLite store.
#[derive(Clone)]
pub struct SqliteGraph {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGraph {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))
    }
}

impl MemoryGraph for SqliteGraph {
    fn nodes(&self, filter: &NodeFilter) -> Result<Vec<KnowledgeNode>> {
        let conn = self.lock()?;
        let mut nodes = db::load_nodes(&conn)?;
        nodes.retain(|n| filter.matches(n));
        Ok(nodes)
    }

    fn edge_counts(&self, ids: &[&str]) -> Result<HashMap<String, usize>> {
        let conn = self.lock()?;
        db::edge_counts(&conn, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: &str, tags: &[&str]) -> KnowledgeNode {
        KnowledgeNode {
            id: id.into(),
            title: id.into(),
            content: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            metadata: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn in_memory_graph_filters_and_counts() {
        let graph = InMemoryGraph::new(
            vec![node("a", &["x"]), node("b", &["y"])],
            vec![Link {
                id: "l".into(),
                source_id: "a".into(),
                target_id: "b".into(),
                link_type: "related".into(),
                created_at: Utc::now(),
            }],
        );
        let filter = NodeFilter {
            tags: vec!["x".into()],
            since: None,
        };
        let nodes = graph.nodes(&filter).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "a");

        let counts = graph.edge_counts(&["a", "b", "z"]).unwrap();
        assert_eq!(counts["a"], 1);
        assert_eq!(counts["b"], 1);
        assert_eq!(counts["z"], 0);
    }

    #[test]
    fn sqlite_graph_reads_imported_nodes() {
        let mut conn = db::open_memory_database().unwrap();
        db::import_graph(
            &mut conn,
            &db::GraphDocument {
                nodes: vec![node("a", &["x"]), node("b", &[])],
                links: vec![],
            },
        )
        .unwrap();
        let graph = SqliteGraph::new(Arc::new(Mutex::new(conn)));
        assert_eq!(graph.nodes(&NodeFilter::default()).unwrap().len(), 2);
        assert_eq!(graph.edge_counts(&["a"]).unwrap()["a"], 0);
    }

    #[test]
    fn unreadable_documents_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        let err = InMemoryGraph::from_json_file(&missing).err().unwrap();
        assert!(format!("{err:#}").contains("absent.json"));

        let garbled = dir.path().join("garbled.json");
        std::fs::write(&garbled, "{not json").unwrap();
        let err = InMemoryGraph::from_json_file(&garbled).err().unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("failed to parse graph document"), "{message}");
    }
}
