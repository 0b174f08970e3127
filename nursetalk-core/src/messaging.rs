//! Delivery adapter for the messaging provider.
//!
//! Long bodies are split into provider-deliverable segments before sending.
//! Transient provider errors (429, 5xx, transport) are retried a bounded
//! number of times with exponential backoff; permanent errors surface to the
//! caller immediately. Audio attachments ride after the text segments and
//! never roll back already-sent text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::phone::whatsapp_address;

/// Provider hard limit on one message body.
pub const MAX_SEGMENT_CHARS: usize = 1600;

const CONTINUATION_MARKER: &str = "..";
const CONTINUATION_PREFIX: &str = "(cont.) ";

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider rejected message ({code}): {message}")]
    Provider { code: u16, message: String },

    #[error("Provider unavailable ({code}): {message}")]
    Transient { code: u16, message: String },

    #[error("All {attempts} delivery attempts failed")]
    RetryExhausted { attempts: usize },
}

impl DeliveryError {
    /// Transient errors are worth another attempt; permanent rejections are
    /// not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeliveryError::Http(_) | DeliveryError::Transient { .. }
        )
    }
}

/// Result of a successful delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Provider message id of the last sent segment.
    pub message_sid: Option<String>,
    pub segments: usize,
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver a text body, segmenting as needed.
    async fn deliver(&self, to: &str, body: &str) -> Result<DeliveryReceipt, DeliveryError>;

    /// Deliver an audio attachment by public URL.
    async fn deliver_media(&self, to: &str, media_url: &str) -> Result<(), DeliveryError>;
}

// ============================================================================
// Segmentation
// ============================================================================

/// Split a body into segments of at most `MAX_SEGMENT_CHARS` characters.
///
/// Splits happen at the last sentence-ending punctuation or newline that
/// fits; every segment except the last carries a trailing ".." marker and
/// every segment after the first a "(cont.) " prefix. Limits are counted in
/// characters including marker and prefix.
pub fn segment_body(body: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut rest = body.trim();
    let mut first = true;

    loop {
        let prefix = if first { "" } else { CONTINUATION_PREFIX };
        let prefix_chars = prefix.chars().count();

        if prefix_chars + rest.chars().count() <= MAX_SEGMENT_CHARS {
            segments.push(format!("{}{}", prefix, rest));
            break;
        }

        let budget = MAX_SEGMENT_CHARS - prefix_chars - CONTINUATION_MARKER.chars().count();
        let cut = split_point(rest, budget);
        let (head, tail) = rest.split_at(cut);
        segments.push(format!(
            "{}{}{}",
            prefix,
            head.trim_end(),
            CONTINUATION_MARKER
        ));
        rest = tail.trim_start();
        first = false;
    }

    segments
}

/// Byte offset of the best split point within the first `budget_chars`
/// characters: just after the last `.`, `!`, `?` or newline, falling back to
/// a hard cut at the budget.
fn split_point(text: &str, budget_chars: usize) -> usize {
    let mut limit = text.len();
    let mut count = 0;
    for (i, _) in text.char_indices() {
        if count == budget_chars {
            limit = i;
            break;
        }
        count += 1;
    }

    let mut best = None;
    for (i, c) in text[..limit].char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            best = Some(i + c.len_utf8());
        }
    }

    best.unwrap_or(limit)
}

// ============================================================================
// Provider API structs (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProviderMessageResponse {
    sid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    code: Option<u32>,
    message: Option<String>,
}

// ============================================================================
// TwilioMessageSender
// ============================================================================

/// Twilio WhatsApp messaging client configuration.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl TwilioConfig {
    /// Build from explicit values, falling back to the conventional
    /// environment variables for the credentials.
    pub fn new(
        account_sid: Option<String>,
        auth_token: Option<String>,
        from_number: String,
    ) -> Self {
        let account_sid = account_sid
            .or_else(|| std::env::var("TWILIO_ACCOUNT_SID").ok())
            .unwrap_or_default();
        let auth_token = auth_token
            .or_else(|| std::env::var("TWILIO_AUTH_TOKEN").ok())
            .unwrap_or_default();

        Self {
            account_sid,
            auth_token,
            from_number,
            max_retries: 2,
            retry_delay_ms: 1000,
        }
    }
}

/// Twilio REST client for WhatsApp message delivery.
#[derive(Debug, Clone)]
pub struct TwilioMessageSender {
    client: Client,
    config: TwilioConfig,
    base_url: String,
}

#[derive(Error, Debug)]
pub enum SenderInitError {
    #[error("Missing Twilio credentials (TWILIO_ACCOUNT_SID / TWILIO_AUTH_TOKEN)")]
    MissingCredentials,

    #[error("HTTP client build failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl TwilioMessageSender {
    pub fn new(config: TwilioConfig) -> Result<Self, SenderInitError> {
        Self::with_base_url(config, "https://api.twilio.com".to_string())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: TwilioConfig, base_url: String) -> Result<Self, SenderInitError> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(SenderInitError::MissingCredentials);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn send_once(
        &self,
        to: &str,
        body: Option<&str>,
        media_url: Option<&str>,
    ) -> Result<Option<String>, DeliveryError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.config.account_sid
        );

        let mut form = vec![
            ("From", whatsapp_address(&self.config.from_number)),
            ("To", whatsapp_address(to)),
        ];
        if let Some(body) = body {
            form.push(("Body", body.to_string()));
        }
        if let Some(media_url) = media_url {
            form.push(("MediaUrl", media_url.to_string()));
        }

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ProviderErrorResponse>(&error_body).ok();
            let message = detail
                .as_ref()
                .and_then(|d| d.message.clone())
                .unwrap_or(error_body);
            let code = detail
                .and_then(|d| d.code)
                .map(|c| c as u16)
                .unwrap_or(status.as_u16());

            // 429 and 5xx are worth retrying; anything else is a hard reject
            if status.as_u16() == 429 || status.is_server_error() {
                tracing::warn!(code = code, message = %message, "Transient provider error");
                return Err(DeliveryError::Transient { code, message });
            }

            tracing::error!(code = code, message = %message, "Provider rejected message");
            return Err(DeliveryError::Provider { code, message });
        }

        let parsed: ProviderMessageResponse = response.json().await?;
        Ok(parsed.sid)
    }

    async fn send_with_retry(
        &self,
        to: &str,
        body: Option<&str>,
        media_url: Option<&str>,
    ) -> Result<Option<String>, DeliveryError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.send_once(to, body, media_url),
            |e: &DeliveryError| e.is_transient(),
        )
        .await;

        match result {
            Ok(sid) => Ok(sid),
            Err(e) if e.is_transient() => {
                tracing::error!(
                    attempts = self.config.max_retries + 1,
                    error = %e,
                    "All delivery attempts failed"
                );
                Err(DeliveryError::RetryExhausted {
                    attempts: self.config.max_retries + 1,
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MessageSender for TwilioMessageSender {
    async fn deliver(&self, to: &str, body: &str) -> Result<DeliveryReceipt, DeliveryError> {
        let segments = segment_body(body);
        let mut last_sid = None;

        for (idx, segment) in segments.iter().enumerate() {
            let sid = self.send_with_retry(to, Some(segment), None).await?;
            tracing::info!(
                to = %to,
                segment = idx + 1,
                total = segments.len(),
                sid = sid.as_deref().unwrap_or("-"),
                "Delivered message segment"
            );
            last_sid = sid;
        }

        Ok(DeliveryReceipt {
            message_sid: last_sid,
            segments: segments.len(),
        })
    }

    async fn deliver_media(&self, to: &str, media_url: &str) -> Result<(), DeliveryError> {
        self.send_with_retry(to, None, Some(media_url)).await?;
        tracing::info!(to = %to, media_url = %media_url, "Delivered audio attachment");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
