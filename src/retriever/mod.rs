
use std::sync::Arc;

use tracing::debug;

use crate::Result;
use crate::embeddings::Embedder;
use crate::index::{KnowledgeBase, RetrievedChunk};

/// Top-k lookup over the active knowledge base
#[derive(Clone)]
pub struct Retriever {
    knowledge_base: Arc<KnowledgeBase>,
    embedder: Arc<dyn Embedder>,
    k: usize,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("location", self.knowledge_base.location())
            .field("embedder", &self.embedder.model_name())
            .field("k", &self.k)
            .finish()
    }
}

impl Retriever {
    #[inline]
    pub fn new(knowledge_base: Arc<KnowledgeBase>, embedder: Arc<dyn Embedder>, k: usize) -> Self {
        Self {
            knowledge_base,
            embedder,
            k,
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Texts of the `k` chunks nearest to `query_text`; empty when there is no index
    #[inline]
    pub async fn retrieve(&self, query_text: &str) -> Result<Vec<String>> {
        Ok(self
            .retrieve_scored(query_text)
            .await?
            .into_iter()
            .map(|hit| hit.chunk.text)
            .collect())
    }

    /// Like `retrieve`, keeping scores and source metadata
    #[inline]
    pub async fn retrieve_scored(&self, query_text: &str) -> Result<Vec<RetrievedChunk>> {
        let hits = self
            .knowledge_base
            .query(query_text, self.k, self.embedder.as_ref())
            .await?;
        debug!("Retrieved {} chunks for query", hits.len());
        Ok(hits)
    }
}
