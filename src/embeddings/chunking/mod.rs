
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::loader::Document;

/// Represents a chunk of a document ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text
    pub text: String,
    /// File the chunk was cut from
    pub source: PathBuf,
    /// The index of this chunk within its document
    pub chunk_index: usize,
    /// Character offset of the first character within the document text
    pub start_offset: usize,
}

/// Configuration for content chunking, measured in characters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum window length
    pub chunk_size: usize,
    /// Characters shared by two consecutive windows
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    /// Bounds accepted in a configuration file
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(50..=8192).contains(&self.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        self.validate_window()
    }

    /// Any window the chunker can cut: overlap strictly below size
    #[inline]
    pub fn validate_window(&self) -> Result<(), ConfigError> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunkOverlap(
                self.chunk_overlap,
                self.chunk_size,
            ));
        }

        Ok(())
    }

    /// Distance between the starts of two consecutive windows
    #[inline]
    pub fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Number of windows a text of `len` characters is cut into
    #[inline]
    pub fn expected_chunks(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else if len <= self.chunk_size {
            1
        } else {
            (len - self.chunk_overlap).div_ceil(self.step())
        }
    }
}

/// Split every document into overlapping fixed-size windows.
///
/// Output order follows input order, then position within the document.
#[inline]
pub fn chunk_documents(
    documents: &[Document],
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, ConfigError> {
    config.validate_window()?;

    let mut chunks = Vec::new();
    for document in documents {
        chunks.extend(chunk_text(&document.text, &document.source, config));
    }

    debug!(
        "Chunked {} documents into {} chunks (avg {} chars)",
        documents.len(),
        chunks.len(),
        chunks.iter().map(|c| c.text.chars().count()).sum::<usize>() / chunks.len().max(1)
    );

    Ok(chunks)
}

/// Split one text into windows; `config` must already be valid
fn chunk_text(text: &str, source: &Path, config: &ChunkingConfig) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let step = config.step();

    let mut chunks = Vec::with_capacity(config.expected_chunks(len));
    let mut start = 0;

    while start < len {
        let end = (start + config.chunk_size).min(len);
        chunks.push(Chunk {
            text: chars[start..end].iter().collect(),
            source: source.to_path_buf(),
            chunk_index: chunks.len(),
            start_offset: start,
        });

        if end == len {
            break;
        }
        start += step;
    }

    chunks
}
