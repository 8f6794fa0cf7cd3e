//! Reel CLI - Headless Player Shell
//!
//! Features:
//! - Stream selection against a capability set
//! - Ad-break dry runs over a simulated timeline
//! - DRM license and certificate checks

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Reel CLI - Player shell toolkit
#[derive(Parser)]
#[command(name = "reel")]
#[command(author = "Reel Player Developers")]
#[command(version)]
#[command(about = "Player shell diagnostics: streams, ads and DRM", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank a document's streams for a runtime
    Select {
        /// Path or URL of the player document
        document: String,

        /// Capability tokens (e.g. hls,dash,widevine); overrides --browser
        #[arg(short, long, value_delimiter = ',')]
        caps: Vec<String>,

        /// Runtime preset to probe (chrome, firefox, safari, edge)
        #[arg(short, long, default_value = "chrome")]
        browser: String,

        /// Priority keys that worked before (e.g. DASH:widevine)
        #[arg(long, value_delimiter = ',')]
        history: Vec<String>,
    },

    /// Simulate ad breaks along a content timeline
    Schedule {
        /// Path or URL of the player document
        document: String,

        /// Timeline length in seconds
        #[arg(short, long, default_value = "3600")]
        duration: f64,

        /// Time update interval in seconds
        #[arg(short, long, default_value = "0.25")]
        step: f64,

        /// Scripted candidate outcome, as id=outcome
        /// (play, load_error, preload_error, pod_error, start_then_pod_error)
        #[arg(long = "outcome")]
        outcomes: Vec<String>,
    },

    /// Request a license with a recorded key message
    License {
        /// License server URL
        url: String,

        /// DRM system (widevine, playready, fairplay)
        #[arg(short, long)]
        drm: String,

        /// File holding the key message (challenge or SPC)
        #[arg(short, long)]
        challenge: PathBuf,

        /// FairPlay content id
        #[arg(long)]
        content_id: Option<String>,

        /// Write the license to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch the FairPlay certificate for a license server
    Certificate {
        /// FairPlay license server URL
        url: String,

        /// Write the certificate to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    reel_core::init();

    match cli.command {
        Commands::Select { document, caps, browser, history } => {
            commands::select(&document, &caps, &browser, &history, &cli.format).await?;
        }
        Commands::Schedule { document, duration, step, outcomes } => {
            commands::schedule(&document, duration, step, &outcomes, &cli.format).await?;
        }
        Commands::License { url, drm, challenge, content_id, output } => {
            commands::license(&url, &drm, &challenge, content_id.as_deref(), output, &cli.format).await?;
        }
        Commands::Certificate { url, output } => {
            commands::certificate(&url, output, &cli.format).await?;
        }
    }

    Ok(())
}
