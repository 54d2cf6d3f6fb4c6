use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("No documents found in {0}")]
    NoDocumentsFound(PathBuf),

    #[error("Nothing to index: the chunk list is empty")]
    NoInput,

    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Generation backend unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Index at {path} cannot be opened: {message}")]
    IndexCorrupt { path: PathBuf, message: String },

    #[error("Permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("Another process is rebuilding the index (lock file: {})", .0.display())]
    IndexLocked(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Map an IO failure on `path` to `PermissionDenied` when that is what it is.
    #[inline]
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::ReadOnlyFilesystem => {
                Self::PermissionDenied { path: path.into() }
            }
            _ => Self::Io(err),
        }
    }

    /// The concrete step a user can take to recover, if there is one.
    #[inline]
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::NoDocumentsFound(dir) => Some(format!(
                "Add PDF or TXT files to {} (or run `rag-chat add <files>`)",
                dir.display()
            )),
            Self::NoInput => Some("Add documents with extractable text, then re-index".to_string()),
            Self::EmbeddingUnavailable(_) => Some(
                "Start Ollama with `ollama serve` and pull the embedding model (e.g. `ollama pull mxbai-embed-large`)"
                    .to_string(),
            ),
            Self::GenerationUnavailable(_) => Some(
                "Start Ollama with `ollama serve` and pull the chat model (e.g. `ollama pull llama3.2`)"
                    .to_string(),
            ),
            Self::IndexCorrupt { .. } => {
                Some("Rebuild the knowledge base with `rag-chat index`".to_string())
            }
            Self::PermissionDenied { path } => Some(format!(
                "Grant write permission, e.g. `chmod -R u+rw {}`",
                path.display()
            )),
            Self::IndexLocked(path) => Some(format!(
                "Wait for the other rebuild to finish, or remove {} if no other process is running",
                path.display()
            )),
            Self::Config(_) => Some("Fix the configuration with `rag-chat config`".to_string()),
            Self::Cancelled | Self::Database(_) | Self::Io(_) | Self::Other(_) => None,
        }
    }
}

pub mod cancel;
pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod index;
pub mod llm;
pub mod loader;
pub mod retriever;

#[cfg(test)]
mod test_support;

pub use cancel::CancellationFlag;
pub use chat::{Answer, ChatSession};
pub use config::Config;
