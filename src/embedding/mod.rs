//! Embedding backends for the knowledge retriever.
//!
//! The retriever only depends on the [`EmbeddingProvider`] capability. When no
//! backend can be created, [`create_provider`] hands back a
//! [`NullEmbeddingProvider`], which reports itself unavailable so callers run
//! keyword search instead.

#[cfg(feature = "local-embeddings")]
pub mod local;

use anyhow::Result;
use std::sync::Arc;

use crate::config::EmbeddingConfig;

/// Number of dimensions produced by all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Text-to-vector capability.
///
/// All methods are synchronous; async callers should go through
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    /// `false` means every `embed` call fails; retrieval skips semantic mode.
    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}

/// Provider used when no embedding backend is installed or configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEmbeddingProvider;

impl EmbeddingProvider for NullEmbeddingProvider {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("no embedding backend available")
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn is_available(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Create the configured embedding provider, degrading to
/// [`NullEmbeddingProvider`] with a warning instead of failing.
pub fn create_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match config.provider.as_str() {
        "none" | "" => Arc::new(NullEmbeddingProvider),
        "local" => local_provider(config),
        other => {
            tracing::warn!(provider = %other, "unknown embedding provider, using keyword search");
            Arc::new(NullEmbeddingProvider)
        }
    }
}

#[cfg(feature = "local-embeddings")]
fn local_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match local::LocalEmbeddingProvider::new(config) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            tracing::warn!(error = %e, "local embedding model unavailable, using keyword search");
            Arc::new(NullEmbeddingProvider)
        }
    }
}

#[cfg(not(feature = "local-embeddings"))]
fn local_provider(_config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    tracing::warn!("built without `local-embeddings`; knowledge search will use keywords");
    Arc::new(NullEmbeddingProvider)
}
