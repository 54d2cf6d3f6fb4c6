//! Deterministic in-process backends shared by unit tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embeddings::Embedder;
use crate::llm::{LanguageModel, TokenSink};
use crate::{CancellationFlag, RagError, Result};

const DIMENSION: usize = 256;

/// Bag-of-words embedder: each lowercase word bumps one hashed bucket.
///
/// The last component is a constant so no text maps to the zero vector.
#[derive(Debug, Default)]
pub(crate) struct HashEmbedder {
    calls: AtomicUsize,
    fail_from_call: Option<usize>,
    batch_size: Option<usize>,
}

impl HashEmbedder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail every `embed_batch` call from the `call`-th (1-based) onwards
    pub(crate) fn failing_from(call: usize) -> Self {
        Self {
            fail_from_call: Some(call),
            ..Self::default()
        }
    }

    pub(crate) fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                    (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
                });
            vector[(hash % (DIMENSION as u64 - 1)) as usize] += 1.0;
        }
        vector[DIMENSION - 1] = 0.5;
        vector
    }
}

impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(crate::embeddings::DEFAULT_EMBEDDING_BATCH)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_from_call.is_some_and(|from| call >= from) {
            return Err(RagError::EmbeddingUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Language model that answers with fixed fragments and records its prompts
#[derive(Debug, Default)]
pub(crate) struct ScriptedModel {
    fragments: Vec<String>,
    fail: bool,
    pub(crate) prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub(crate) fn answering(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| (*f).to_string()).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn generate_stream(
        &self,
        prompt: &str,
        sink: &mut dyn TokenSink,
        cancel: &CancellationFlag,
    ) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if self.fail {
            return Err(RagError::GenerationUnavailable(
                "connection refused".to_string(),
            ));
        }

        let mut answer = String::new();
        for fragment in &self.fragments {
            cancel.check()?;
            sink.on_token(fragment);
            answer.push_str(fragment);
        }
        Ok(answer)
    }
}
