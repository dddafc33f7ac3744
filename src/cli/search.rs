use anyhow::Result;
use std::sync::{Arc, Mutex};

use trilogy_brain::config::TrilogyConfig;
use trilogy_brain::knowledge::{KnowledgeRetriever, NodeFilter, SqliteGraph};
use trilogy_brain::{db, embedding};

const PREVIEW_CHARS: usize = 120;

/// `--limit` values: a positive integer.
pub fn parse_limit(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("limit must be at least 1".into()),
        Ok(limit) => Ok(limit),
        Err(e) => Err(format!("invalid limit {raw:?}: {e}")),
    }
}

/// Run a knowledge search from the terminal.
pub async fn search(
    config: &TrilogyConfig,
    query: &str,
    tags: Vec<String>,
    limit: Option<usize>,
    keyword_only: bool,
) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let graph = Arc::new(SqliteGraph::new(Arc::new(Mutex::new(conn))));
    let embedder = embedding::create_provider(&config.embedding);
    let retriever = KnowledgeRetriever::new(graph, embedder, config.retrieval.clone())?;

    let filter = NodeFilter { tags, since: None };
    let query_text = query.to_string();
    let response = tokio::task::spawn_blocking(move || {
        if keyword_only {
            retriever.search_keywords(&query_text, &filter, limit)
        } else {
            retriever.search(&query_text, &filter, limit)
        }
    })
    .await??;

    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Found {} result(s) ({} mode{})\n",
        response.total_matched,
        response.mode,
        if response.reranked { ", re-ranked" } else { "" }
    );

    for (i, hit) in response.results.iter().enumerate() {
        let preview = match hit.content.char_indices().nth(PREVIEW_CHARS) {
            Some((idx, _)) => format!("{}...", &hit.content[..idx]),
            None => hit.content.clone(),
        };
        println!(
            "  {}. {} [{}] (score: {:.4}, base: {:.4})",
            i + 1,
            hit.title,
            hit.id,
            hit.score,
            hit.base_score,
        );
        if !hit.tags.is_empty() {
            println!("     tags: {}", hit.tags.join(", "));
        }
        println!("     {preview}");
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_must_be_positive() {
        assert_eq!(parse_limit("3"), Ok(3));
        assert!(parse_limit("0").unwrap_err().contains("at least 1"));
        assert!(parse_limit("-2").is_err());
    }
}
