use clap::Parser;
use interview_core::InterviewConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use interview_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "interview.toml")]
    config: String,

    /// Report which integrations are configured and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience: production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match InterviewConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    if args.health {
        let state = HttpState::from_config(config);
        let (_, body) = http::health_inner(&state);
        let (_, tts) = http::tts_health_inner(state.synthesizer.as_deref());

        let mark = |ok: bool| if ok { "✅" } else { "❌" };
        let completion_ok = body["completion_configured"].as_bool().unwrap_or(false);
        let tts_ok = tts["ready"].as_bool().unwrap_or(false);

        println!("{} Completion client configured", mark(completion_ok));
        println!("{} Speech synthesis ready ({})", mark(tts_ok), tts["binary"]);
        println!("   Session store: {}", state.store.path().display());

        if !completion_ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(config, tx.subscribe()).await?;

    Ok(())
}
