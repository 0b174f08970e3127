//! Speech services — transcription of inbound voice notes and synthesis of
//! outbound audio replies.
//!
//! Both wrappers degrade gracefully: any provider failure is logged and
//! reported as `Ok(None)`, so a voice note that cannot be transcribed turns
//! into an input prompt and a reply that cannot be voiced still goes out as
//! text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },
}

/// Synthesized audio returned by the synthesizer backend.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    /// Transcribe a voice note. `None` means the audio could not be
    /// understood or the backend is unavailable.
    async fn transcribe(
        &self,
        audio: &[u8],
        content_type: &str,
    ) -> Result<Option<String>, SpeechError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize speech for a reply. `None` means synthesis is unavailable;
    /// the reply is still delivered as text.
    async fn synthesize(&self, text: &str) -> Result<Option<SynthesizedAudio>, SpeechError>;
}

// ============================================================================
// HTTP implementations
// ============================================================================

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
}

/// Client for a speech-to-text HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSpeechTranscriber {
    client: Client,
    url: String,
}

impl HttpSpeechTranscriber {
    pub fn new(url: impl Into<String>) -> Result<Self, SpeechError> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn transcribe_once(
        &self,
        audio: &[u8],
        content_type: &str,
    ) -> Result<Option<String>, SpeechError> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", content_type)
            .body(audio.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SpeechError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }
}

#[async_trait]
impl SpeechTranscriber for HttpSpeechTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        content_type: &str,
    ) -> Result<Option<String>, SpeechError> {
        match self.transcribe_once(audio, content_type).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::warn!(error = %e, "Transcription failed — treating voice note as unreadable");
                Ok(None)
            }
        }
    }
}

/// Client for a text-to-speech HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSpeechSynthesizer {
    client: Client,
    url: String,
}

impl HttpSpeechSynthesizer {
    pub fn new(url: impl Into<String>) -> Result<Self, SpeechError> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn synthesize_once(&self, text: &str) -> Result<SynthesizedAudio, SpeechError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SpeechError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();

        let bytes = response.bytes().await?.to_vec();
        Ok(SynthesizedAudio {
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Option<SynthesizedAudio>, SpeechError> {
        match self.synthesize_once(text).await {
            Ok(audio) if audio.bytes.is_empty() => {
                tracing::warn!("Synthesizer returned empty audio — skipping attachment");
                Ok(None)
            }
            Ok(audio) => Ok(Some(audio)),
            Err(e) => {
                tracing::warn!(error = %e, "Speech synthesis failed — reply goes out as text only");
                Ok(None)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
