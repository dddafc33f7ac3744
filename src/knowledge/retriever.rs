use anyhow::Result;
use chrono::Utc;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use super::cache::{CacheStats, Embedding, EmbeddingCache};
use super::graph::MemoryGraph;
use super::scoring;
use super::types::{KnowledgeNode, NodeFilter, SearchHit, SearchMode, SearchResponse};
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;

/// Ranks memory graph nodes against free-text queries.
///
/// Semantic mode needs an available embedding provider and `use_embeddings`;
/// any failure inside it falls back to keyword mode. Settings can be swapped
/// at runtime through [`KnowledgeRetriever::update_settings`].
pub struct KnowledgeRetriever {
    graph: Arc<dyn MemoryGraph>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: RwLock<RetrievalConfig>,
    cache: Mutex<EmbeddingCache>,
}

/// Scored candidate: index into the node list plus base score.
type Scored = (usize, f64);

impl KnowledgeRetriever {
    pub fn new(
        graph: Arc<dyn MemoryGraph>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: RetrievalConfig,
    ) -> Result<Self> {
        settings.validate()?;
        if !embedder.is_available() {
            tracing::warn!("no embedding backend; knowledge search runs in keyword mode");
        }
        let cache = EmbeddingCache::new(
            settings.cache_size,
            Duration::from_secs(settings.cache_expiry_secs),
        );
        Ok(Self {
            graph,
            embedder,
            settings: RwLock::new(settings),
            cache: Mutex::new(cache),
        })
    }

    pub fn settings(&self) -> RetrievalConfig {
        self.settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Validate and apply new settings; the cache is resized in place.
    pub fn update_settings(&self, new: RetrievalConfig) -> Result<()> {
        new.validate()?;
        self.lock_cache()?
            .reconfigure(new.cache_size, Duration::from_secs(new.cache_expiry_secs));
        let mut settings = self
            .settings
            .write()
            .map_err(|e| anyhow::anyhow!("settings lock poisoned: {e}"))?;
        *settings = new;
        tracing::info!(?settings, "retrieval settings updated");
        Ok(())
    }

    pub fn embedding_backend(&self) -> &str {
        self.embedder.name()
    }

    pub fn semantic_available(&self) -> bool {
        self.embedder.is_available()
    }

    /// Embedding for `text`, served from the cache while fresh.
    pub fn get_embedding(&self, text: &str) -> Result<Embedding> {
        if let Some(hit) = self.lock_cache()?.get(text) {
            return Ok(hit);
        }
        // Compute outside the lock; a concurrent miss on the same text just
        // overwrites with an equal vector.
        let embedding: Embedding = Arc::new(self.embedder.embed(text)?);
        self.lock_cache()?
            .insert(text.to_string(), Arc::clone(&embedding));
        Ok(embedding)
    }

    pub fn cache_stats(&self) -> CacheStats {
        match self.cache.lock() {
            Ok(cache) => cache.stats(),
            Err(poisoned) => poisoned.into_inner().stats(),
        }
    }

    /// Drop all cached embeddings; returns how many were removed.
    pub fn clear_cache(&self) -> Result<usize> {
        let dropped = self.lock_cache()?.clear();
        tracing::info!(dropped, "embedding cache cleared");
        Ok(dropped)
    }

    /// Search the graph. `limit` defaults to `max_results`; zero is rejected.
    pub fn search(
        &self,
        query: &str,
        filter: &NodeFilter,
        limit: Option<usize>,
    ) -> Result<SearchResponse> {
        self.run_search(query, filter, limit, true)
    }

    /// Keyword-only search, regardless of `use_embeddings`.
    pub fn search_keywords(
        &self,
        query: &str,
        filter: &NodeFilter,
        limit: Option<usize>,
    ) -> Result<SearchResponse> {
        self.run_search(query, filter, limit, false)
    }

    fn run_search(
        &self,
        query: &str,
        filter: &NodeFilter,
        limit: Option<usize>,
        allow_semantic: bool,
    ) -> Result<SearchResponse> {
        let settings = self.settings();
        let limit = limit.unwrap_or(settings.max_results);
        anyhow::ensure!(limit > 0, "limit must be at least 1");
        let nodes = self.graph.nodes(filter)?;

        let semantic = allow_semantic && settings.use_embeddings && self.embedder.is_available();
        let (mode, mut scored) = if semantic {
            match self.semantic_search(query, &nodes, settings.minimum_similarity) {
                Ok(scored) => (SearchMode::Semantic, scored),
                Err(e) => {
                    tracing::warn!(error = %e, "semantic search failed, falling back to keywords");
                    (SearchMode::Keyword, keyword_search(query, &nodes))
                }
            }
        } else {
            (SearchMode::Keyword, keyword_search(query, &nodes))
        };
        sort_desc(&mut scored);

        let mut hits: Vec<(usize, f64, f64)> =
            scored.iter().map(|&(idx, base)| (idx, base, base)).collect();

        let reranked = settings.rerank_enabled && !hits.is_empty();
        if reranked {
            let normalize = mode == SearchMode::Keyword;
            hits = self.rerank(&scored, &nodes, &settings, normalize)?;
        }

        let total_matched = hits.len();
        hits.truncate(limit);

        tracing::debug!(
            query = %query,
            mode = %mode,
            candidates = nodes.len(),
            matched = total_matched,
            "knowledge search"
        );

        Ok(SearchResponse {
            query: query.to_string(),
            mode,
            reranked,
            total_matched,
            results: hits
                .into_iter()
                .map(|(idx, base, score)| to_hit(&nodes[idx], base, score))
                .collect(),
        })
    }

    /// Cosine similarity of the query against every node, thresholded.
    fn semantic_search(
        &self,
        query: &str,
        nodes: &[KnowledgeNode],
        minimum_similarity: f64,
    ) -> Result<Vec<Scored>> {
        let query_embedding = self.get_embedding(query)?;
        let mut scored = Vec::new();
        for (idx, node) in nodes.iter().enumerate() {
            let node_embedding = self.get_embedding(&node.embedding_text())?;
            let similarity = scoring::cosine_similarity(&query_embedding, &node_embedding);
            if similarity >= minimum_similarity {
                scored.push((idx, similarity));
            }
        }
        Ok(scored)
    }

    /// Blend base scores with recency and connectivity; returns
    /// `(index, base, final)` sorted by final score.
    fn rerank(
        &self,
        scored: &[Scored],
        nodes: &[KnowledgeNode],
        settings: &RetrievalConfig,
        normalize: bool,
    ) -> Result<Vec<(usize, f64, f64)>> {
        let ids: Vec<&str> = scored.iter().map(|&(idx, _)| nodes[idx].id.as_str()).collect();
        let edge_counts = self.graph.edge_counts(&ids)?;
        let connectivity = scoring::connectivity_scores(&ids, &edge_counts);

        let max_base = scored.iter().map(|&(_, s)| s).fold(0.0f64, f64::max);
        let now = Utc::now();

        let mut out: Vec<(usize, f64, f64)> = scored
            .iter()
            .map(|&(idx, base)| {
                let node = &nodes[idx];
                let normalized = if normalize && max_base > 0.0 {
                    base / max_base
                } else {
                    base
                };
                let recency = scoring::recency_score(node.latest_activity(), now);
                let conn = connectivity.get(&node.id).copied().unwrap_or(0.0);
                let score = scoring::blend(
                    normalized,
                    recency,
                    conn,
                    settings.recency_weight,
                    settings.connectivity_weight,
                );
                (idx, base, score)
            })
            .collect();

        out.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal))
        });
        Ok(out)
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, EmbeddingCache>> {
        self.cache
            .lock()
            .map_err(|e| anyhow::anyhow!("embedding cache lock poisoned: {e}"))
    }
}

/// Weighted term counting over every node; keeps scores above zero.
fn keyword_search(query: &str, nodes: &[KnowledgeNode]) -> Vec<Scored> {
    let terms = scoring::query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }
    nodes
        .iter()
        .enumerate()
        .filter_map(|(idx, node)| {
            let score = scoring::keyword_score(node, &terms);
            (score > 0.0).then_some((idx, score))
        })
        .collect()
}

fn sort_desc(scored: &mut [Scored]) {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
}

fn to_hit(node: &KnowledgeNode, base: f64, score: f64) -> SearchHit {
    SearchHit {
        id: node.id.clone(),
        title: node.title.clone(),
        content: node.content.clone(),
        tags: node.tags.clone(),
        score,
        base_score: base,
        updated_at: node.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NullEmbeddingProvider;
    use crate::knowledge::graph::InMemoryGraph;
    use crate::knowledge::types::Link;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// One dimension per vocabulary word; counts calls.
    struct VocabEmbedder {
        vocab: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl VocabEmbedder {
        fn new(vocab: &[&'static str]) -> Self {
            Self {
                vocab: vocab.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingProvider for VocabEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let lower = text.to_lowercase();
            Ok(self
                .vocab
                .iter()
                .map(|w| lower.matches(w).count() as f32)
                .collect())
        }

        fn name(&self) -> &str {
            "vocab"
        }
    }

    struct BrokenEmbedder;

    impl EmbeddingProvider for BrokenEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            anyhow::bail!("model crashed")
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn node(id: &str, title: &str, content: &str, age_days: i64) -> KnowledgeNode {
        let ts = Utc::now() - ChronoDuration::days(age_days);
        KnowledgeNode {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            tags: vec![],
            metadata: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn no_rerank() -> RetrievalConfig {
        RetrievalConfig {
            rerank_enabled: false,
            ..Default::default()
        }
    }

    fn retriever(
        nodes: Vec<KnowledgeNode>,
        links: Vec<Link>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: RetrievalConfig,
    ) -> KnowledgeRetriever {
        KnowledgeRetriever::new(Arc::new(InMemoryGraph::new(nodes, links)), embedder, settings)
            .unwrap()
    }

    #[test]
    fn keyword_mode_without_backend() {
        let r = retriever(
            vec![
                node("a", "Rust ownership", "borrow checker rules", 0),
                node("b", "Cooking", "pasta recipes", 0),
            ],
            vec![],
            Arc::new(NullEmbeddingProvider),
            no_rerank(),
        );
        let response = r.search("rust borrow", &NodeFilter::default(), None).unwrap();
        assert_eq!(response.mode, SearchMode::Keyword);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, "a");
        assert_eq!(response.results[0].base_score, 4.0);
    }

    #[test]
    fn semantic_mode_thresholds_and_sorts() {
        let embedder = Arc::new(VocabEmbedder::new(&["rust", "async", "pasta"]));
        let r = retriever(
            vec![
                node("a", "rust", "async rust", 0),
                node("b", "pasta", "pasta", 0),
                node("c", "rust", "rust rust", 0),
            ],
            vec![],
            embedder,
            no_rerank(),
        );
        let response = r.search("rust", &NodeFilter::default(), None).unwrap();
        assert_eq!(response.mode, SearchMode::Semantic);
        let ids: Vec<&str> = response.results.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"], "pasta falls under the threshold");
        assert!(response.results[0].score > response.results[1].score);
    }

    #[test]
    fn semantic_failure_falls_back_to_keywords() {
        let r = retriever(
            vec![node("a", "Rust", "systems", 0)],
            vec![],
            Arc::new(BrokenEmbedder),
            no_rerank(),
        );
        let response = r.search("rust", &NodeFilter::default(), None).unwrap();
        assert_eq!(response.mode, SearchMode::Keyword);
        assert_eq!(response.results.len(), 1);
    }

    #[test]
    fn use_embeddings_false_forces_keywords() {
        let r = retriever(
            vec![node("a", "Rust", "systems", 0)],
            vec![],
            Arc::new(VocabEmbedder::new(&["rust"])),
            RetrievalConfig {
                use_embeddings: false,
                rerank_enabled: false,
                ..Default::default()
            },
        );
        let response = r.search("rust", &NodeFilter::default(), None).unwrap();
        assert_eq!(response.mode, SearchMode::Keyword);
    }

    #[test]
    fn keyword_search_skips_embeddings() {
        let embedder = Arc::new(VocabEmbedder::new(&["rust"]));
        let r = retriever(
            vec![node("a", "Rust", "systems", 0)],
            vec![],
            embedder.clone(),
            no_rerank(),
        );
        let response = r.search_keywords("rust", &NodeFilter::default(), None).unwrap();
        assert_eq!(response.mode, SearchMode::Keyword);
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn embeddings_are_cached() {
        let embedder = Arc::new(VocabEmbedder::new(&["rust"]));
        let r = retriever(vec![], vec![], embedder.clone(), no_rerank());

        let first = r.get_embedding("rust").unwrap();
        let second = r.get_embedding("rust").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(r.cache_stats().hits, 1);
        assert_eq!(r.cache_stats().misses, 1);
    }

    #[test]
    fn expired_embeddings_are_recomputed() {
        let embedder = Arc::new(VocabEmbedder::new(&["rust"]));
        let settings = RetrievalConfig {
            cache_expiry_secs: 1,
            ..no_rerank()
        };
        let r = retriever(vec![], vec![], embedder.clone(), settings);

        let first = r.get_embedding("rust").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = r.get_embedding("rust").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(r.cache_stats().misses, 2);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let r = retriever(
            vec![node("a", "Rust", "systems", 0)],
            vec![],
            Arc::new(NullEmbeddingProvider),
            no_rerank(),
        );
        let err = r.search("rust", &NodeFilter::default(), Some(0)).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
        let response = r.search("rust", &NodeFilter::default(), Some(1)).unwrap();
        assert_eq!(response.results.len(), 1);
    }

    #[test]
    fn rerank_prefers_recent_and_connected_nodes() {
        let nodes = vec![
            node("old", "rust", "", 60),
            node("new", "rust", "", 0),
        ];
        let links = vec![Link {
            id: "l".into(),
            source_id: "new".into(),
            target_id: "other".into(),
            link_type: "related".into(),
            created_at: Utc::now(),
        }];
        let r = retriever(
            nodes,
            links,
            Arc::new(NullEmbeddingProvider),
            RetrievalConfig {
                recency_weight: 0.3,
                connectivity_weight: 0.2,
                ..Default::default()
            },
        );
        let response = r.search("rust", &NodeFilter::default(), None).unwrap();
        assert!(response.reranked);
        assert_eq!(response.results[0].id, "new");
        // normalized base 1.0 * 0.5 + recency 1.0 * 0.3 + connectivity 1.0 * 0.2
        assert!((response.results[0].score - 1.0).abs() < 1e-3);
        assert!(response.results[1].score < 0.6);
    }

    #[test]
    fn limit_truncates_but_reports_total() {
        let nodes = (0..5)
            .map(|i| node(&format!("n{i}"), "rust", "", 0))
            .collect();
        let r = retriever(nodes, vec![], Arc::new(NullEmbeddingProvider), no_rerank());
        let response = r.search("rust", &NodeFilter::default(), Some(2)).unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.total_matched, 5);
    }

    #[test]
    fn blank_query_matches_nothing() {
        let r = retriever(
            vec![node("a", "rust", "", 0)],
            vec![],
            Arc::new(NullEmbeddingProvider),
            no_rerank(),
        );
        let response = r.search("   ", &NodeFilter::default(), None).unwrap();
        assert!(response.results.is_empty());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let r = retriever(vec![], vec![], Arc::new(NullEmbeddingProvider), no_rerank());
        let bad = RetrievalConfig {
            recency_weight: 0.9,
            connectivity_weight: 0.9,
            ..Default::default()
        };
        assert!(r.update_settings(bad).is_err());
        assert!(!r.settings().rerank_enabled, "old settings kept");
    }
}
