use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct NurseTalkConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub generation: GenerationConfig,
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
    /// Base URL under which this server is reachable from the messaging
    /// provider (used to build public media links).
    pub public_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub max_new_tokens: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessagingConfig {
    pub base_url: String,
    pub from_number: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub idle_timeout_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub transcribe_url: String,
    pub synthesize_url: String,
    pub media_dir: String,
    pub max_audio_age_hours: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            transcribe_url: String::new(),
            synthesize_url: String::new(),
            media_dir: "media/audio".to_string(),
            max_audio_age_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8770,
        }
    }
}

impl NurseTalkConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
