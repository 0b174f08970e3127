//! nursetalk-cli — operator frontend for a running NurseTalk server
//!
//! Inspects the conversation log and server health over the HTTP API.
//!
//! # Subcommands
//! - `history <phone> [-n <limit>] [--json]` — a phone number's stored turns
//! - `status`                                — show server health

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8770";
const DEFAULT_LIMIT: usize = 20;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "nursetalk-cli",
    version,
    about = "NurseTalk conversation log and status inspector"
)]
struct Cli {
    /// NurseTalk HTTP server URL (overrides NURSETALK_HTTP_URL env var)
    #[arg(long, env = "NURSETALK_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show a phone number's conversation history, newest first
    History {
        /// Phone number (with or without the whatsapp: prefix)
        phone: String,

        /// Maximum number of turns to return
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Output the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Show NurseTalk server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// One conversation turn as returned by GET /conversations/{phone}
#[derive(Debug, Deserialize)]
pub struct TurnRow {
    pub timestamp: String,
    pub user_input: String,
    pub bot_response: String,
    pub response_time: Option<f64>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub phone_number: String,
    pub count: usize,
    pub turns: Vec<TurnRow>,
}

/// Render one turn for the human-readable listing.
pub fn render_turn(turn: &TurnRow) -> String {
    let timing = match turn.response_time {
        Some(t) => format!(" ({:.2}s)", t),
        None => String::new(),
    };
    format!(
        "[{}] {}{}\n  user: {}\n  bot:  {}",
        turn.timestamp,
        turn.status,
        timing,
        turn.user_input,
        first_line(&turn.bot_response)
    )
}

/// First line of a possibly multi-line reply, capped at 100 characters.
fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > 100 {
        let truncated: String = line.chars().take(97).collect();
        format!("{}...", truncated)
    } else {
        line.to_string()
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn do_history(server: &str, phone: &str, limit: usize, json_output: bool) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let url = format!("{}/conversations/{}?limit={}", server, phone, limit);
    let resp = match client.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("nursetalk-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("nursetalk-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    if json_output {
        let raw: serde_json::Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&raw)?);
        return Ok(());
    }

    let history: HistoryResponse = match resp.json() {
        Ok(h) => h,
        Err(e) => {
            eprintln!("nursetalk-cli: failed to parse history response: {}", e);
            std::process::exit(1);
        }
    };

    if history.turns.is_empty() {
        eprintln!("No conversations recorded for: {}", history.phone_number);
        return Ok(());
    }

    println!(
        "{} turn(s) for {}\n",
        history.count, history.phone_number
    );
    for turn in &history.turns {
        println!("{}\n", render_turn(turn));
    }

    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("NurseTalk server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:          {}", body["version"].as_str().unwrap_or("?"));
            println!("SQLite:           {}", body["sqlite"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("nursetalk-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("nursetalk-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::History { phone, limit, json } => do_history(&server, &phone, limit, json),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("nursetalk-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
