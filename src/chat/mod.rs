//! One conversation over the knowledge base


use std::path::{Path, PathBuf};
use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, info};

use crate::config::Config;
use crate::embeddings::{ChunkingConfig, Embedder};
use crate::index::{IndexLocation, IndexManifest, KnowledgeBase};
use crate::llm::{AnswerGenerator, Conversation, LanguageModel, TokenSink};
use crate::loader::ClearReport;
use crate::retriever::Retriever;
use crate::{CancellationFlag, Result};

pub const NO_KNOWLEDGE_BASE_MESSAGE: &str =
    "No documents found. Please add some PDF or TXT files to get started.";

/// What `ask` produced
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// Nothing is indexed; no backend was contacted
    NoKnowledgeBase,
    Generated {
        text: String,
        /// Files the retrieved context came from, in rank order
        sources: Vec<PathBuf>,
    },
}

impl Answer {
    #[inline]
    pub fn text(&self) -> &str {
        match self {
            Self::NoKnowledgeBase => NO_KNOWLEDGE_BASE_MESSAGE,
            Self::Generated { text, .. } => text,
        }
    }
}

pub struct ChatSession {
    data_dir: PathBuf,
    chunking: ChunkingConfig,
    knowledge_base: Arc<KnowledgeBase>,
    embedder: Arc<dyn Embedder>,
    retriever: Retriever,
    generator: AnswerGenerator,
    history: Conversation,
    seen_generation: Option<u64>,
    cancel: CancellationFlag,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("data_dir", &self.data_dir)
            .field("retriever", &self.retriever)
            .field("generator", &self.generator)
            .field("turns", &self.history.len())
            .field("seen_generation", &self.seen_generation)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Open the configured knowledge base with the given backends
    #[inline]
    pub async fn open(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let knowledge_base = Arc::new(KnowledgeBase::open(IndexLocation::from_config(config)).await?);
        let seen_generation = knowledge_base.generation().await;

        match seen_generation {
            Some(generation) => info!("Knowledge base ready at generation {}", generation),
            None => info!("No knowledge base yet"),
        }

        Ok(Self {
            data_dir: config.data_dir(),
            chunking: config.chunking.clone(),
            retriever: Retriever::new(
                Arc::clone(&knowledge_base),
                Arc::clone(&embedder),
                config.retrieval.k,
            ),
            generator: AnswerGenerator::new(model),
            knowledge_base,
            embedder,
            history: Conversation::new(),
            seen_generation,
            cancel: CancellationFlag::new(),
        })
    }

    #[inline]
    pub fn history(&self) -> &Conversation {
        &self.history
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[inline]
    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.knowledge_base
    }

    /// Flag that aborts the running `ask` or `refresh` when set
    #[inline]
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Answer `question`, streaming fragments into `sink`.
    ///
    /// History grows by one exchange only when an answer was generated.
    #[inline]
    pub async fn ask(&mut self, question: &str, sink: &mut dyn TokenSink) -> Result<Answer> {
        self.cancel.reset();
        self.knowledge_base.sync_with_disk().await?;
        self.observe_generation().await;

        if self.seen_generation.is_none() {
            debug!("Question asked without a knowledge base");
            return Ok(Answer::NoKnowledgeBase);
        }

        let hits = self.retriever.retrieve_scored(question).await?;
        let sources = hits
            .iter()
            .map(|hit| hit.chunk.source.clone())
            .unique()
            .collect();
        let context: Vec<String> = hits.into_iter().map(|hit| hit.chunk.text).collect();

        let text = self.generator.answer_stream(
            question,
            &context,
            &self.history,
            sink,
            &self.cancel,
        )?;

        self.history.push_exchange(question, text.clone());
        Ok(Answer::Generated { text, sources })
    }

    /// Rebuild the knowledge base from the data directory
    #[inline]
    pub async fn refresh(&mut self) -> Result<IndexManifest> {
        self.cancel.reset();
        let manifest = self
            .knowledge_base
            .rebuild(
                &self.data_dir,
                &self.chunking,
                self.embedder.as_ref(),
                &self.cancel,
            )
            .await?;
        self.observe_generation().await;
        Ok(manifest)
    }

    /// Delete the index and every document; nothing is deleted when another process holds the index
    #[inline]
    pub async fn clear_documents(&mut self) -> Result<ClearReport> {
        let report = self
            .knowledge_base
            .clear_with_documents(&self.data_dir)
            .await?;
        self.observe_generation().await;
        info!(
            "Cleared {} entries from {} ({} failures)",
            report.removed,
            self.data_dir.display(),
            report.failures.len()
        );
        Ok(report)
    }

    #[inline]
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    async fn observe_generation(&mut self) {
        let current = self.knowledge_base.generation().await;
        if current != self.seen_generation {
            info!(
                "Knowledge base generation changed: {:?} -> {:?}",
                self.seen_generation, current
            );
            self.seen_generation = current;
        }
    }
}
