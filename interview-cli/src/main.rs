//! interview-cli: operator command line for the interview bot
//!
//! Talks to a running `interview-server` over HTTP, and runs speech
//! recognition locally against recorded audio.
//!
//! # Subcommands
//! - `show <id> [--json]`                       : print a stored interview
//! - `summary <id>`                             : fetch (or generate) the summary
//! - `score <id> [--simple]`                    : fetch (or generate) the score
//! - `status`                                   : show server health
//! - `say <text> --output <file.wav>`           : download synthesized speech
//! - `transcribe <wav> [--backend] [--command]` : recognize speech in a WAV file

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use interview_core::recognition::capture_and_recognize;
use interview_core::{
    InterviewConfig, InterviewRecord, RecognitionBackend, ScoreResponse, SimpleScore,
    SummaryResponse,
};
use serde::de::DeserializeOwned;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "interview-cli", version, about = "Interview bot operator CLI")]
struct Cli {
    /// Interview server URL (overrides INTERVIEW_HTTP_URL env var)
    #[arg(long, env = "INTERVIEW_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a stored interview record
    Show {
        id: String,

        /// Print the raw record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch the interview summary, generating it on first request
    Summary { id: String },

    /// Fetch the interview score, generating it on first request
    Score {
        id: String,

        /// Only the overall score
        #[arg(long)]
        simple: bool,
    },

    /// Show server health
    Status,

    /// Synthesize speech through the server and save it as WAV
    Say {
        text: String,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Recognize speech in a recorded WAV file
    Transcribe {
        audio: PathBuf,

        /// `http` or `command` (defaults to [recognition] backend)
        #[arg(long)]
        backend: Option<String>,

        /// Program for the command backend
        #[arg(long)]
        command: Option<String>,

        /// Config file providing the [recognition] section
        #[arg(short, long, default_value = "interview.toml")]
        config: String,
    },
}

// ============================================================================
// Output formatting
// ============================================================================

pub fn format_record(record: &InterviewRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("Interview:  {}\n", record.id));
    out.push_str(&format!("Candidate:  {}\n", record.candidate_name));
    out.push_str(&format!("Role:       {}\n", record.job_description));
    out.push_str(&format!("Experience: ~{} years\n", record.experience_required));
    out.push_str(&format!("Created:    {}\n", record.created_at.to_rfc3339()));
    if let Some(score) = record.score {
        out.push_str(&format!("Score:      {}/10\n", score));
    }
    out.push('\n');

    if record.messages.is_empty() {
        out.push_str("(no messages)\n");
    }
    for m in &record.messages {
        out.push_str(&format!("{:>9}: {}\n", m.speaker.as_str(), m.text));
    }
    out
}

pub fn format_breakdown(score: &ScoreResponse) -> String {
    let b = &score.breakdown;
    let mut out = String::new();
    for (label, bucket) in [
        ("Overall", &b.overall),
        ("Communication", &b.communication),
        ("Relevance", &b.relevance),
        ("Technical", &b.technical),
        ("Confidence", &b.confidence),
    ] {
        out.push_str(&format!("{:<14} {:>2}/{}\n", label, bucket.value, bucket.scale));
    }
    if !b.next_steps.is_empty() {
        out.push_str("\nNext steps:\n");
        for step in &b.next_steps {
            out.push_str(&format!("  - {}\n", step));
        }
    }
    out
}

pub fn format_simple(score: &SimpleScore) -> String {
    format!("{}/{}", score.score, score.scale)
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Error message from an `{"error": ...}` body, or the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

fn get_json<T: DeserializeOwned>(url: &str, timeout_secs: u64) -> anyhow::Result<T> {
    let resp = client(timeout_secs)?
        .get(url)
        .send()
        .with_context(|| format!("connection failed to {}", url))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        bail!("server returned {}: {}", status, error_message(&body));
    }

    resp.json().context("failed to parse server response")
}

fn do_show(server: &str, id: &str, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/interviews/{}", server, id);
    if json {
        let value: serde_json::Value = get_json(&url, 10)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let record: InterviewRecord = get_json(&url, 10)?;
        print!("{}", format_record(&record));
    }
    Ok(())
}

fn do_summary(server: &str, id: &str) -> anyhow::Result<()> {
    let resp: SummaryResponse = get_json(&format!("{}/interviews/{}/summary", server, id), 120)?;
    println!("{}", resp.summary);
    Ok(())
}

fn do_score(server: &str, id: &str, simple: bool) -> anyhow::Result<()> {
    if simple {
        let resp: SimpleScore = get_json(&format!("{}/interviews/{}/score_simple", server, id), 120)?;
        println!("{}", format_simple(&resp));
    } else {
        let resp: ScoreResponse = get_json(&format!("{}/interviews/{}/score", server, id), 120)?;
        print!("{}", format_breakdown(&resp));
    }
    Ok(())
}

/// Show the server status by calling GET /health and GET /health/tts.
fn do_status(server: &str) -> anyhow::Result<()> {
    let health: serde_json::Value = get_json(&format!("{}/health", server), 10)?;
    let tts: serde_json::Value = get_json(&format!("{}/health/tts", server), 10)?;

    let yes_no = |v: &serde_json::Value| if v.as_bool().unwrap_or(false) { "yes" } else { "no" };

    println!("Interview server: {}", health["status"].as_str().unwrap_or("unknown"));
    println!("Version:          {}", health["version"].as_str().unwrap_or("?"));
    println!("Completion:       {}", yes_no(&health["completion_configured"]));
    println!("TTS configured:   {}", yes_no(&health["tts_configured"]));
    println!("TTS ready:        {}", yes_no(&tts["ready"]));
    if let Some(binary) = tts["binary"].as_str() {
        println!("TTS binary:       {}", binary);
    }
    Ok(())
}

fn do_say(server: &str, text: &str, output: &Path) -> anyhow::Result<()> {
    let url = format!("{}/tts", server);
    let resp = client(120)?
        .get(&url)
        .query(&[("text", text)])
        .send()
        .with_context(|| format!("connection failed to {}", url))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        bail!("server returned {}: {}", status, error_message(&body));
    }

    let bytes = resp.bytes()?;
    std::fs::write(output, &bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;
    eprintln!("Wrote {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

fn do_transcribe(
    audio: &Path,
    backend: Option<String>,
    command: Option<String>,
    config_path: &str,
) -> anyhow::Result<()> {
    let mut settings = InterviewConfig::load(config_path)?.recognition;
    if command.is_some() {
        settings.command = command;
    }
    let backend: RecognitionBackend = backend.as_deref().unwrap_or(&settings.backend).parse()?;
    let timeout = Duration::from_secs(settings.timeout_seconds);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let text = runtime.block_on(capture_and_recognize(backend, &settings, audio, timeout))?;

    match text {
        Some(t) => {
            println!("{}", t);
            Ok(())
        }
        None => bail!("no speech recognized in {}", audio.display()),
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Show { id, json } => do_show(&server, &id, json),
        Commands::Summary { id } => do_summary(&server, &id),
        Commands::Score { id, simple } => do_score(&server, &id, simple),
        Commands::Status => do_status(&server),
        Commands::Say { text, output } => do_say(&server, &text, &output),
        Commands::Transcribe {
            audio,
            backend,
            command,
            config,
        } => do_transcribe(&audio, backend, command, &config),
    };

    if let Err(e) = result {
        eprintln!("interview-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
