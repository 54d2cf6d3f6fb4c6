// Embeddings module
// Turns document text into fixed-size windows and windows into vectors

pub mod chunking;
pub mod ollama;

pub use chunking::{Chunk, ChunkingConfig, chunk_documents};
pub use ollama::OllamaClient;

/// Number of texts sent to an embedder per request unless it says otherwise
pub const DEFAULT_EMBEDDING_BATCH: usize = 16;

/// Something that maps text to vectors of a fixed dimension.
///
/// Implementations must be deterministic for a given model: the same text
/// always yields the same vector.
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors, recorded in the index manifest
    fn model_name(&self) -> &str;

    /// Embed every text, preserving order. The result has one vector per input.
    fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;

    /// Preferred number of texts per `embed_batch` call
    #[inline]
    fn batch_size(&self) -> usize {
        DEFAULT_EMBEDDING_BATCH
    }

    #[inline]
    fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| {
                crate::RagError::EmbeddingUnavailable("embedder returned no vector".to_string())
            })
    }
}
