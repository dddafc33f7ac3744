//! SQLite store backing the memory graph.

pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::knowledge::types::{KnowledgeNode, Link};

/// Open (or create) the graph database with schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    schema::init_schema(&conn).context("failed to initialize schema")?;

    tracing::info!(path = %path.display(), "graph database initialized");
    Ok(conn)
}

/// Open an in-memory graph database.
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    Ok(conn)
}

/// Import/export document: `{"nodes": [...], "links": [...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<KnowledgeNode>,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    pub nodes_imported: usize,
    pub nodes_skipped: usize,
    pub links_imported: usize,
    pub links_skipped: usize,
}

/// Insert nodes and links in one transaction.
///
/// Nodes whose ID already exists are skipped. Links are skipped when their ID
/// exists or either endpoint is missing. A link without an ID gets a fresh
/// UUIDv7 unless an identical edge (same endpoints and type) is stored.
pub fn import_graph(conn: &mut Connection, doc: &GraphDocument) -> Result<ImportReport> {
    let tx = conn.transaction()?;
    let mut report = ImportReport::default();

    for node in &doc.nodes {
        let tags = serde_json::to_string(&node.tags)?;
        let metadata = node
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO nodes (id, title, content, tags, metadata, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                node.id,
                node.title,
                node.content,
                tags,
                metadata,
                node.created_at.to_rfc3339(),
                node.updated_at.to_rfc3339(),
            ],
        )?;
        if inserted == 1 {
            report.nodes_imported += 1;
        } else {
            report.nodes_skipped += 1;
        }
    }

    for link in &doc.links {
        let endpoints: i64 = tx.query_row(
            "SELECT COUNT(*) FROM nodes WHERE id IN (?1, ?2)",
            params![link.source_id, link.target_id],
            |row| row.get(0),
        )?;
        let expected = if link.source_id == link.target_id { 1 } else { 2 };
        if endpoints < expected {
            tracing::debug!(link = %link.id, "skipping link with missing endpoint");
            report.links_skipped += 1;
            continue;
        }

        let id = if link.id.is_empty() {
            let duplicate: Option<String> = tx
                .query_row(
                    "SELECT id FROM links WHERE source_id = ?1 AND target_id = ?2 AND link_type = ?3",
                    params![link.source_id, link.target_id, link.link_type],
                    |row| row.get(0),
                )
                .optional()?;
            if duplicate.is_some() {
                report.links_skipped += 1;
                continue;
            }
            uuid::Uuid::now_v7().to_string()
        } else {
            link.id.clone()
        };

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO links (id, source_id, target_id, link_type, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                link.source_id,
                link.target_id,
                link.link_type,
                link.created_at.to_rfc3339(),
            ],
        )?;
        if inserted == 1 {
            report.links_imported += 1;
        } else {
            report.links_skipped += 1;
        }
    }

    tx.commit()?;
    Ok(report)
}

/// All nodes, newest first.
pub fn load_nodes(conn: &Connection) -> Result<Vec<KnowledgeNode>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, content, tags, metadata, created_at, updated_at \
         FROM nodes ORDER BY updated_at DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, title, content, tags, metadata, created_at, updated_at)| {
            Ok(KnowledgeNode {
                tags: serde_json::from_str(&tags)
                    .with_context(|| format!("corrupt tags on node {id}"))?,
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
                id,
                title,
                content,
            })
        })
        .collect()
}

/// Number of links touching each of `ids` (either direction).
pub fn edge_counts(conn: &Connection, ids: &[&str]) -> Result<HashMap<String, usize>> {
    let mut stmt = conn.prepare(
        "SELECT COUNT(*) FROM links WHERE source_id = ?1 OR target_id = ?1",
    )?;
    let mut counts = HashMap::with_capacity(ids.len());
    for id in ids {
        let count: i64 = stmt.query_row(params![id], |row| row.get(0))?;
        counts.insert(id.to_string(), count as usize);
    }
    Ok(counts)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

/// Row counts without the integrity scan.
#[derive(Debug, Serialize)]
pub struct GraphCounts {
    pub node_count: u64,
    pub link_count: u64,
    pub newest_node: Option<String>,
}

pub fn graph_counts(conn: &Connection) -> Result<GraphCounts> {
    let node_count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
    let link_count: i64 = conn.query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
    let newest_node: Option<String> = conn
        .query_row(
            "SELECT updated_at FROM nodes ORDER BY updated_at DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(GraphCounts {
        node_count: node_count as u64,
        link_count: link_count as u64,
        newest_node,
    })
}

/// Result of [`check_graph_health`].
#[derive(Debug, Serialize)]
pub struct GraphHealth {
    pub schema_version: u32,
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub node_count: u64,
    pub link_count: u64,
    pub newest_node: Option<String>,
}

/// Full check including `PRAGMA integrity_check`, which scans every page.
pub fn check_graph_health(conn: &Connection) -> Result<GraphHealth> {
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    let counts = graph_counts(conn)?;

    Ok(GraphHealth {
        schema_version: schema::get_schema_version(conn)?,
        integrity_ok: integrity == "ok",
        integrity_details: integrity,
        node_count: counts.node_count,
        link_count: counts.link_count,
        newest_node: counts.newest_node,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn node(id: &str, age_days: i64) -> KnowledgeNode {
        let ts = Utc::now() - Duration::days(age_days);
        KnowledgeNode {
            id: id.into(),
            title: format!("Node {id}"),
            content: "content".into(),
            tags: vec!["t".into()],
            metadata: Some(serde_json::json!({"source": "test"})),
            created_at: ts,
            updated_at: ts,
        }
    }

    fn link(id: &str, source: &str, target: &str) -> Link {
        Link {
            id: id.into(),
            source_id: source.into(),
            target_id: target.into(),
            link_type: "related".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn import_round_trips_nodes() {
        let mut conn = open_memory_database().unwrap();
        let doc = GraphDocument {
            nodes: vec![node("a", 3), node("b", 1)],
            links: vec![link("l1", "a", "b")],
        };
        let report = import_graph(&mut conn, &doc).unwrap();
        assert_eq!(report.nodes_imported, 2);
        assert_eq!(report.links_imported, 1);

        let nodes = load_nodes(&conn).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "b", "newest first");
        assert_eq!(nodes[1].metadata.as_ref().unwrap()["source"], "test");
    }

    #[test]
    fn reimport_skips_existing() {
        let mut conn = open_memory_database().unwrap();
        let doc = GraphDocument {
            nodes: vec![node("a", 0)],
            links: vec![],
        };
        import_graph(&mut conn, &doc).unwrap();
        let second = import_graph(&mut conn, &doc).unwrap();
        assert_eq!(second.nodes_imported, 0);
        assert_eq!(second.nodes_skipped, 1);
    }

    #[test]
    fn dangling_links_are_skipped() {
        let mut conn = open_memory_database().unwrap();
        let doc = GraphDocument {
            nodes: vec![node("a", 0)],
            links: vec![link("l1", "a", "ghost")],
        };
        let report = import_graph(&mut conn, &doc).unwrap();
        assert_eq!(report.links_imported, 0);
        assert_eq!(report.links_skipped, 1);
    }

    #[test]
    fn links_without_id_are_assigned_once() {
        let mut conn = open_memory_database().unwrap();
        let doc = GraphDocument {
            nodes: vec![node("a", 0), node("b", 0)],
            links: vec![link("", "a", "b")],
        };
        let first = import_graph(&mut conn, &doc).unwrap();
        assert_eq!(first.links_imported, 1);

        let second = import_graph(&mut conn, &doc).unwrap();
        assert_eq!(second.links_imported, 0);
        assert_eq!(second.links_skipped, 1);

        let id: String = conn
            .query_row("SELECT id FROM links", [], |row| row.get(0))
            .unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn edge_counts_cover_both_directions() {
        let mut conn = open_memory_database().unwrap();
        let doc = GraphDocument {
            nodes: vec![node("a", 0), node("b", 0), node("c", 0)],
            links: vec![link("l1", "a", "b"), link("l2", "c", "a")],
        };
        import_graph(&mut conn, &doc).unwrap();

        let counts = edge_counts(&conn, &["a", "b", "c"]).unwrap();
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["b"], 1);
        assert_eq!(counts["c"], 1);
    }

    #[test]
    fn health_check_on_fresh_db() {
        let conn = open_memory_database().unwrap();
        let health = check_graph_health(&conn).unwrap();
        assert!(health.integrity_ok);
        assert_eq!(health.schema_version, schema::SCHEMA_VERSION);
        assert_eq!(health.node_count, 0);
        assert!(health.newest_node.is_none());
    }

    #[test]
    fn counts_track_imported_rows() {
        let mut conn = open_memory_database().unwrap();
        let doc = GraphDocument {
            nodes: vec![node("a", 3), node("b", 1)],
            links: vec![link("l1", "a", "b")],
        };
        import_graph(&mut conn, &doc).unwrap();
        let counts = graph_counts(&conn).unwrap();
        assert_eq!(counts.node_count, 2);
        assert_eq!(counts.link_count, 1);
        assert!(counts.newest_node.is_some());
    }
}
