use anyhow::Result;
use std::collections::BTreeMap;

use trilogy_brain::config::TrilogyConfig;
use trilogy_brain::db;

/// Display memory graph statistics in the terminal.
pub fn stats(config: &TrilogyConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;
    let health = db::check_graph_health(&conn)?;

    println!("Memory Graph Statistics");
    println!("{}", "=".repeat(40));
    println!("  Database:            {}", db_path.display());
    println!("  Schema version:      {}", health.schema_version);
    println!("  Integrity:           {}", health.integrity_details);
    println!("  Nodes:               {}", health.node_count);
    println!("  Links:               {}", health.link_count);
    if let Some(ref newest) = health.newest_node {
        println!("  Last update:         {newest}");
    }

    let mut tags: BTreeMap<String, usize> = BTreeMap::new();
    for node in db::load_nodes(&conn)? {
        for tag in node.tags {
            *tags.entry(tag.to_lowercase()).or_default() += 1;
        }
    }
    if !tags.is_empty() {
        let mut by_count: Vec<_> = tags.into_iter().collect();
        by_count.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        println!();
        println!("Top tags:");
        for (tag, count) in by_count.iter().take(10) {
            println!("  {tag:<20} {count}");
        }
    }
    Ok(())
}
