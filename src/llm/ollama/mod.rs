
use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::{LanguageModel, TokenSink};
use crate::config::Config;
use crate::embeddings::ollama::{
    DEFAULT_RETRY_ATTEMPTS, ModelInfo, ensure_model_listed, list_models, request_with_retry,
};
use crate::{CancellationFlag, RagError};

const CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Chat model served by Ollama's `/api/generate`
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One line of the newline-delimited streaming response
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.ollama.llm_model.clone(),
            agent: Self::build_agent(Duration::from_secs(config.ollama.timeout_seconds)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    /// Generation streams for a long time, so only connecting and the
    /// first response byte are bounded
    fn build_agent(response_timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_connect(Some(Duration::from_secs(CONNECT_TIMEOUT_SECONDS)))
            .timeout_recv_response(Some(response_timeout))
            .build()
            .into()
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = Self::build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Verify the server answers and the chat model is pulled
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;
        ensure_model_listed(&self.model, &models)?;
        info!(
            "Health check passed for Ollama at {} with chat model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        list_models(&self.agent, &self.base_url, self.retry_attempts)
    }

    fn stream(
        &self,
        prompt: &str,
        sink: &mut dyn TokenSink,
        cancel: &CancellationFlag,
    ) -> crate::Result<String> {
        let unavailable = |e: anyhow::Error| {
            RagError::GenerationUnavailable(format!("{} ({}): {e:#}", self.base_url, self.model))
        };

        let url = self
            .base_url
            .join("/api/generate")
            .context("Failed to build generate URL")
            .map_err(unavailable)?;
        let request_json = serde_json::to_string(&GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        })
        .context("Failed to serialize generate request")
        .map_err(unavailable)?;

        cancel.check()?;
        debug!("Requesting completion from {}", url);

        let response = request_with_retry(self.retry_attempts, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
        })
        .context("Failed to start generation")
        .map_err(unavailable)?;

        let reader = BufReader::new(response.into_body().into_reader());
        let mut answer = String::new();

        for line in reader.lines() {
            cancel.check()?;

            let line = line
                .context("Generation stream interrupted")
                .map_err(unavailable)?;
            if line.trim().is_empty() {
                continue;
            }

            let chunk: GenerateChunk = serde_json::from_str(&line)
                .context("Failed to parse generation stream")
                .map_err(unavailable)?;

            if let Some(error) = chunk.error {
                warn!("Ollama reported an error mid-stream: {}", error);
                return Err(RagError::GenerationUnavailable(error));
            }
            if !chunk.response.is_empty() {
                sink.on_token(&chunk.response);
                answer.push_str(&chunk.response);
            }
            if chunk.done {
                debug!("Generation finished ({} chars)", answer.len());
                return Ok(answer);
            }
        }

        Err(RagError::GenerationUnavailable(
            "generation stream ended before completion".to_string(),
        ))
    }
}

impl LanguageModel for OllamaGenerator {
    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }

    #[inline]
    fn generate_stream(
        &self,
        prompt: &str,
        sink: &mut dyn TokenSink,
        cancel: &CancellationFlag,
    ) -> crate::Result<String> {
        self.stream(prompt, sink, cancel)
    }
}
