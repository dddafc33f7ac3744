//! Knowledge retrieval over the memory graph.
//!
//! [`KnowledgeRetriever`] ranks nodes from a [`MemoryGraph`] either by
//! embedding similarity or by weighted keyword counts, optionally re-ranked
//! by recency and connectivity.

pub mod cache;
pub mod graph;
pub mod retriever;
pub mod scoring;
pub mod types;

pub use cache::{CacheStats, EmbeddingCache};
pub use graph::{InMemoryGraph, MemoryGraph, SqliteGraph};
pub use retriever::KnowledgeRetriever;
pub use types::{KnowledgeNode, Link, NodeFilter, SearchHit, SearchMode, SearchResponse};
