// Answer generation
// Builds the RAG prompt and runs it through a language model


pub mod ollama;
pub mod prompt;

use std::sync::Arc;

use tracing::debug;

use crate::{CancellationFlag, Result};

pub use ollama::OllamaGenerator;
pub use prompt::{Conversation, Role, Turn, build_prompt, format_history};

/// Receives answer fragments in arrival order
pub trait TokenSink: Send {
    fn on_token(&mut self, token: &str);
}

impl<F: FnMut(&str) + Send> TokenSink for F {
    #[inline]
    fn on_token(&mut self, token: &str) {
        self(token);
    }
}

/// A text-completion backend
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Stream the completion of `prompt` into `sink` and return the full text.
    ///
    /// Fragments already delivered stay delivered if the stream fails later.
    fn generate_stream(
        &self,
        prompt: &str,
        sink: &mut dyn TokenSink,
        cancel: &CancellationFlag,
    ) -> Result<String>;

    #[inline]
    fn generate(&self, prompt: &str, cancel: &CancellationFlag) -> Result<String> {
        self.generate_stream(prompt, &mut |_: &str| {}, cancel)
    }
}

/// Turns a question, retrieved context and history into an answer
#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn LanguageModel>,
}

impl std::fmt::Debug for AnswerGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerGenerator")
            .field("model", &self.model.model_name())
            .finish()
    }
}

impl AnswerGenerator {
    #[inline]
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    #[inline]
    pub fn answer(
        &self,
        question: &str,
        context: &[String],
        history: &Conversation,
        cancel: &CancellationFlag,
    ) -> Result<String> {
        let prompt = build_prompt(question, context, history);
        debug!(
            "Generating answer with {} context chunks ({} prompt chars)",
            context.len(),
            prompt.len()
        );
        self.model.generate(&prompt, cancel)
    }

    #[inline]
    pub fn answer_stream(
        &self,
        question: &str,
        context: &[String],
        history: &Conversation,
        sink: &mut dyn TokenSink,
        cancel: &CancellationFlag,
    ) -> Result<String> {
        let prompt = build_prompt(question, context, history);
        debug!(
            "Streaming answer with {} context chunks ({} prompt chars)",
            context.len(),
            prompt.len()
        );
        self.model.generate_stream(&prompt, sink, cancel)
    }
}
