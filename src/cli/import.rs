use anyhow::{Context, Result};
use std::path::Path;

use trilogy_brain::config::TrilogyConfig;
use trilogy_brain::db::{self, GraphDocument};

/// Import nodes and links from a `{"nodes": [...], "links": [...]}` file.
///
/// Nodes whose ID already exists are skipped; links are only created when
/// both endpoints exist.
pub fn import(config: &TrilogyConfig, file: &Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read import file: {}", file.display()))?;
    let doc: GraphDocument = serde_json::from_str(&json).context("failed to parse import JSON")?;

    let db_path = config.resolved_db_path();
    let mut conn = db::open_database(&db_path)?;

    println!(
        "Importing {} nodes and {} links...",
        doc.nodes.len(),
        doc.links.len()
    );
    let report = db::import_graph(&mut conn, &doc)?;

    println!("Import complete:");
    println!("  Nodes imported: {}", report.nodes_imported);
    println!("  Nodes skipped:  {} (already exist)", report.nodes_skipped);
    println!("  Links imported: {}", report.links_imported);
    if report.links_skipped > 0 {
        println!(
            "  Links skipped:  {} (duplicate or missing endpoint)",
            report.links_skipped
        );
    }
    Ok(())
}
