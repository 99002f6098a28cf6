use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dwell_core::store::DEFAULT_MATCH_THRESHOLD;
use dwell_core::tracker::DEFAULT_SESSION_THRESHOLD_MS;
use dwell_core::StoredProfile;
use std::path::PathBuf;

mod replay;

// `#[zbus::proxy]` generates `TrackerProxy` (async) and `TrackerProxyBlocking`.
#[zbus::proxy(
    interface = "org.dwell.Tracker1",
    default_service = "org.dwell.Tracker1",
    default_path = "/org/dwell/Tracker1"
)]
trait Tracker {
    async fn status(&self) -> zbus::Result<String>;
    async fn recent_logs(&self) -> zbus::Result<Vec<String>>;
    async fn list_profiles(&self) -> zbus::Result<String>;
    async fn reset(&self) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "dwell", about = "Face-dwell tracker CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show presence and capture state
    Status,
    /// Show the operator log, most recent first
    Logs,
    /// List stored visitor profiles
    Profiles,
    /// Close any open session
    Reset,
    /// Replay a recorded detection trace offline
    Replay {
        /// JSON-lines trace, one detection frame per line
        trace: PathBuf,
        /// Profile database to match against (created if missing)
        #[arg(long)]
        db: PathBuf,
        /// Directory for temporary snapshots
        #[arg(long)]
        captures: Option<PathBuf>,
        /// Minimum dwell before a capture, in milliseconds
        #[arg(long, default_value_t = DEFAULT_SESSION_THRESHOLD_MS)]
        threshold_ms: i64,
        /// Similarity at or above which a capture matches a stored profile
        #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        match_threshold: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            trace,
            db,
            captures,
            threshold_ms,
            match_threshold,
        } => {
            let options = replay::ReplayOptions {
                trace,
                db,
                capture_dir: captures.unwrap_or_else(|| std::env::temp_dir().join("dwell-replay")),
                threshold_ms,
                match_threshold,
            };
            let summary = tokio::task::spawn_blocking(move || replay::run(&options)).await??;
            for entry in &summary.log {
                println!("{entry}");
            }
            println!();
            println!(
                "{} frames replayed, {} malformed lines skipped, {} profiles stored",
                summary.frames,
                summary.skipped_lines,
                summary.profiles.len()
            );
        }
        command => {
            let conn = zbus::Connection::session()
                .await
                .context("connecting to the session bus")?;
            let proxy = TrackerProxy::new(&conn).await?;
            run_remote(&proxy, command)
                .await
                .context("is dwelld running?")?;
        }
    }

    Ok(())
}

async fn run_remote(proxy: &TrackerProxy<'_>, command: Commands) -> Result<()> {
    match command {
        Commands::Status => {
            let raw = proxy.status().await?;
            let status: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", status["status"].as_str().unwrap_or("unknown"));
            if let Some(last) = status["last_duration"].as_str() {
                println!("Last detection: {last}");
            }
            println!("Mode: {}", status["mode"].as_str().unwrap_or("unknown"));
            if status["capture_in_flight"].as_bool() == Some(true) {
                println!("Capture in flight");
            }
        }
        Commands::Logs => {
            for line in proxy.recent_logs().await? {
                println!("{line}");
            }
        }
        Commands::Profiles => {
            let profiles: Vec<StoredProfile> = serde_json::from_str(&proxy.list_profiles().await?)?;
            if profiles.is_empty() {
                println!("No profiles stored");
            }
            for p in &profiles {
                println!("{}  visits={}  last seen {}", p.id, p.visits, p.last_seen_at);
            }
        }
        Commands::Reset => {
            proxy.reset().await?;
            println!("Session reset");
        }
        Commands::Replay { .. } => unreachable!("replay runs locally"),
    }
    Ok(())
}
