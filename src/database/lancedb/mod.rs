// LanceDB vector database module
// Handles vector storage and similarity search for chunk embeddings


pub mod vector_store;

use serde::{Deserialize, Serialize};

use crate::embeddings::chunking::Chunk;

pub use vector_store::{SearchResult, VectorStore};

/// Embedding record stored in LanceDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Unique identifier for this embedding
    pub id: String,
    /// The vector embedding; every record of a table has the same dimension
    pub vector: Vec<f32>,
    /// Metadata about the chunk this embedding represents
    pub metadata: ChunkMetadata,
}

/// Metadata for a chunk stored alongside its embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Path of the file the chunk was cut from
    pub source: String,
    /// The actual text content of the chunk
    pub content: String,
    /// Index of this chunk within its document
    pub chunk_index: u32,
    /// Character offset of the chunk within its document
    pub start_offset: u32,
    /// Global insertion order, used to break similarity ties
    pub sequence: u32,
    /// Timestamp when this embedding was created
    pub created_at: String,
}

impl EmbeddingRecord {
    /// Pair a chunk with its vector; `sequence` is the chunk's global insertion position
    #[inline]
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>, sequence: u32, created_at: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            vector,
            metadata: ChunkMetadata {
                source: chunk.source.display().to_string(),
                content: chunk.text.clone(),
                chunk_index: u32::try_from(chunk.chunk_index).unwrap_or(u32::MAX),
                start_offset: u32::try_from(chunk.start_offset).unwrap_or(u32::MAX),
                sequence,
                created_at: created_at.to_string(),
            },
        }
    }
}

impl ChunkMetadata {
    /// Rebuild the chunk this metadata describes
    #[inline]
    pub fn to_chunk(&self) -> Chunk {
        Chunk {
            text: self.content.clone(),
            source: self.source.clone().into(),
            chunk_index: self.chunk_index as usize,
            start_offset: self.start_offset as usize,
        }
    }
}
