//! taskspeak
//!
//! Reads one free-text command per line on stdin and writes one JSON
//! response per line on stdout. The transport stays thin; all behavior
//! lives in the processor.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use taskspeak::config::Config;
use taskspeak::db::Database;
use taskspeak::generate::SessionState;
use taskspeak::llm::OpenAiClient;
use taskspeak::processor::Processor;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskspeak", version, about = "Natural-language task manager")]
struct Cli {
    /// Path to the config file (YAML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database file path (overrides the config).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Process a single command and exit instead of reading stdin.
    #[arg(long)]
    once: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Responses go to stdout, logs to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let db_path = cli.db.unwrap_or_else(|| config.database.resolved_path());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db = Database::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    info!(path = %db_path.display(), "database ready");

    let default_user = db.ensure_default_user(
        &config.default_user.username,
        &config.default_user.email,
    )?;

    let llm = Arc::new(OpenAiClient::new(&config.llm)?);
    let processor = Processor::new(
        db,
        llm,
        config.import.retention,
        std::time::Duration::from_secs(config.llm.timeout_secs),
        default_user.user_id,
    );

    let mut state = SessionState::new();

    if let Some(command) = cli.once {
        let response = processor.process(&command, &mut state).await;
        println!("{}", serde_json::to_string(&response)?);
        return Ok(());
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        // Conversation reset is a transport-level signal, not a command.
        if command.eq_ignore_ascii_case("reset") {
            state.reset();
            let ack = taskspeak::types::QueryResponse::ok_message("Conversation reset.");
            writeln!(stdout, "{}", serde_json::to_string(&ack)?)?;
            stdout.flush()?;
            continue;
        }

        let response = processor.process(command, &mut state).await;
        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    Ok(())
}
