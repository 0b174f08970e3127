use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nursetalk_core::generation::InferenceTextGenerator;
use nursetalk_core::messaging::{TwilioConfig, TwilioMessageSender};
use nursetalk_core::session::InMemorySessionStore;
use nursetalk_core::speech::{HttpSpeechSynthesizer, HttpSpeechTranscriber};
use nursetalk_core::NurseTalkConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use nursetalk_server::subsystems::media::MediaStore;
use nursetalk_server::subsystems::triage::{SpeechServices, TriageDeps};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "nursetalk.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match NurseTalkConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB and make sure the conversation table exists
    let pool = match nursetalk_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };
    nursetalk_core::db::init_schema(&pool).await?;

    if args.health {
        match nursetalk_core::db::health_check(&pool).await {
            Ok(v) => println!("SQLite connected: {}", v),
            Err(e) => {
                println!("SQLite connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("NurseTalk DB health check passed");
        return Ok(());
    }

    let deps = build_deps(&config).await?;

    // Shutdown signal
    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    nursetalk_server::http::start_http_server(pool, config, deps, tx.subscribe()).await?;

    Ok(())
}

/// Construct every external dependency once, at startup, and hand the bundle
/// to the handlers. No lazy globals.
async fn build_deps(config: &NurseTalkConfig) -> anyhow::Result<Arc<TriageDeps>> {
    let sessions = Arc::new(InMemorySessionStore::new(Duration::from_secs(
        config.session.idle_timeout_minutes * 60,
    )));

    let generator = InferenceTextGenerator::new(
        config.generation.base_url.clone(),
        config.generation.max_new_tokens,
        Duration::from_secs(config.generation.timeout_seconds),
    )?;

    let mut twilio = TwilioConfig::new(None, None, config.messaging.from_number.clone());
    twilio.max_retries = config.messaging.max_retries;
    twilio.retry_delay_ms = config.messaging.retry_delay_ms;
    let sender =
        TwilioMessageSender::with_base_url(twilio, config.messaging.base_url.clone())?;

    let speech = if config.speech.enabled {
        let media = MediaStore::new(
            config.speech.media_dir.clone(),
            config.service.public_base_url.clone(),
        );
        media.ensure_dir().await?;
        Some(SpeechServices {
            transcriber: Arc::new(HttpSpeechTranscriber::new(
                config.speech.transcribe_url.clone(),
            )?),
            synthesizer: Arc::new(HttpSpeechSynthesizer::new(
                config.speech.synthesize_url.clone(),
            )?),
            media,
            max_audio_age: Duration::from_secs(config.speech.max_audio_age_hours * 3600),
        })
    } else {
        None
    };

    Ok(Arc::new(TriageDeps {
        sessions,
        generator: Arc::new(generator),
        sender: Arc::new(sender),
        speech,
        http_client: reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?,
    }))
}
