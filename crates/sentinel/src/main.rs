use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sentinel::replay::{self, ReplayClock};
use sentinel::{SentinelConfig, SentinelService};
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tourist-safety escalation monitor", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the ingestion rate limit (seconds)
    #[arg(long, global = true)]
    min_interval_secs: Option<u64>,

    /// Append audit events to this JSON-lines file
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed `{subject_id, snapshot}` JSON lines through the service
    Replay {
        input: PathBuf,

        /// Evaluate each record at its own snapshot time instead of now
        #[arg(long, default_value_t = false)]
        now_from_snapshot: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = SentinelConfig::load(args.config.as_deref())?;
    if let Some(secs) = args.min_interval_secs {
        config.ingestion.min_interval_secs = secs;
    }
    if let Some(path) = args.audit_log {
        config.audit_log = Some(path);
    }
    config.validate()?;

    match args.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Replay {
            input,
            now_from_snapshot,
        } => run_replay(&config, &input, now_from_snapshot).await,
    }
}

async fn run_replay(config: &SentinelConfig, input: &Path, now_from_snapshot: bool) -> Result<()> {
    let service = SentinelService::from_config(config)?;
    let file = std::fs::File::open(input)
        .with_context(|| format!("Failed to open replay file {}", input.display()))?;
    let clock = if now_from_snapshot {
        ReplayClock::SnapshotTime
    } else {
        ReplayClock::WallClock
    };
    replay::run(&service, BufReader::new(file), std::io::stdout().lock(), clock).await?;
    Ok(())
}
