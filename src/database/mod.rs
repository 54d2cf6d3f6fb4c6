// Database module
// Vector storage for chunk embeddings (LanceDB)

pub mod lancedb;

pub use self::lancedb::{ChunkMetadata, EmbeddingRecord, SearchResult, VectorStore};
