//! Text generator client.
//!
//! Wraps a text-generation-inference style HTTP endpoint behind the
//! `TextGenerator` trait so the server can inject a mock in tests. The
//! prompt embeds the combined symptom description; the completion comes
//! back with the prompt echoed, so the echo and a leading "Answer:" are
//! stripped before the response formatter sees it.
//!
//! Generation is NOT retried here — a failed turn surfaces to the
//! orchestrator, which apologizes to the user and resets the session.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ConversationTurn;

/// Canned reply when the model produces an empty completion.
pub const EMPTY_COMPLETION_FALLBACK: &str = "I am sorry, but I could not determine a response. \
Could you please rephrase your question?";

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing generated text in response")]
    MissingCompletion,
}

/// The raw (prompt-stripped, unformatted) completion plus timing.
#[derive(Debug, Clone)]
pub struct Generation {
    pub raw_text: String,
    pub elapsed_seconds: f64,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce a diagnosis draft for the combined symptom text.
    /// `recent_turns` is the phone number's persisted history, newest first;
    /// implementations may use it for conversational context.
    async fn generate(
        &self,
        combined_symptoms: &str,
        recent_turns: &[ConversationTurn],
    ) -> Result<Generation, GenerationError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Inference API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct InferenceRequest {
    inputs: String,
    parameters: InferenceParameters,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    generated_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InferenceErrorResponse {
    error: Option<String>,
}

// ============================================================================
// InferenceTextGenerator
// ============================================================================

/// Client for a text-generation-inference compatible server.
#[derive(Debug, Clone)]
pub struct InferenceTextGenerator {
    client: Client,
    base_url: String,
    max_new_tokens: u32,
}

impl InferenceTextGenerator {
    pub fn new(
        base_url: impl Into<String>,
        max_new_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            max_new_tokens,
        })
    }

    /// Prompt template carried over from the original assistant.
    fn build_prompt(combined_symptoms: &str) -> String {
        format!(
            "Question: A patient presents with the following symptoms: {}. \
             What is the likely diagnosis and what are the first aid steps?\n\nAnswer:",
            combined_symptoms
        )
    }

    /// Causal LMs echo the prompt back; keep only the completion.
    fn strip_completion(prompt: &str, raw: &str) -> String {
        let completion = match raw.split_once(prompt) {
            Some((_, rest)) => rest,
            None => raw,
        };
        completion
            .trim()
            .strip_prefix("Answer:")
            .unwrap_or(completion.trim())
            .trim()
            .to_string()
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/generate", self.base_url);
        let request = InferenceRequest {
            inputs: prompt.to_string(),
            parameters: InferenceParameters {
                max_new_tokens: self.max_new_tokens,
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<InferenceErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Generator API error");

            return Err(GenerationError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let inference: InferenceResponse = response.json().await?;
        inference
            .generated_text
            .ok_or(GenerationError::MissingCompletion)
    }
}

#[async_trait]
impl TextGenerator for InferenceTextGenerator {
    async fn generate(
        &self,
        combined_symptoms: &str,
        _recent_turns: &[ConversationTurn],
    ) -> Result<Generation, GenerationError> {
        let start = Instant::now();
        let prompt = Self::build_prompt(combined_symptoms);

        tracing::info!(symptoms = %combined_symptoms, "Generating diagnosis draft");

        let raw = self.generate_once(&prompt).await?;
        let completion = Self::strip_completion(&prompt, &raw);

        let elapsed_seconds = start.elapsed().as_secs_f64();

        let raw_text = if completion.is_empty() {
            EMPTY_COMPLETION_FALLBACK.to_string()
        } else {
            completion
        };

        tracing::info!(
            elapsed_seconds = elapsed_seconds,
            chars = raw_text.len(),
            "Generation complete"
        );

        Ok(Generation {
            raw_text,
            elapsed_seconds,
        })
    }

    fn name(&self) -> &str {
        "inference-http"
    }
}

// ============================================================================
// TESTS
// ============================================================================
