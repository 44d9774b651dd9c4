//! CLI for solardash: publishes the dashboard's JSON snapshots from the power log.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use solardash_core::config::GeneratorConfig;
use solardash_core::generator::Generator;
use solardash_core::telemetry::demo::{backfill, DemoCollector};

const ENV_LOG: &str = "SOLARDASH_LOG";

#[derive(Parser)]
#[command(name = "solardash")]
#[command(version = solardash_core::VERSION, about = "Solar telemetry snapshot generator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config file (JSON)
    #[arg(long, short = 'c', global = true, env = "SOLARDASH_CONFIG")]
    config: Option<PathBuf>,

    /// Telemetry log to read
    #[arg(long, global = true, env = "SOLARDASH_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Directory snapshots are written to
    #[arg(long, global = true, env = "SOLARDASH_API_DIR")]
    api_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute every range and publish its snapshot (default)
    Generate,

    /// Compute one range and print the result without writing
    Inspect {
        /// Range key, e.g. 24h
        range: String,
    },

    /// Print the latest valid record
    Latest,

    /// Append synthetic records ending now
    Demo {
        /// Number of records
        #[arg(long, default_value = "288")]
        count: usize,

        /// Seconds between records
        #[arg(long, default_value = "300")]
        interval_secs: u64,

        /// RNG seed for reproducible data
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn init_logging() {
    let filter = std::env::var(ENV_LOG)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .compact()
        .with_env_filter(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<GeneratorConfig> {
    let mut config = match &cli.config {
        Some(path) => GeneratorConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => GeneratorConfig::default(),
    };
    if let Some(log_file) = &cli.log_file {
        config.log_path = log_file.clone();
    }
    if let Some(api_dir) = &cli.api_dir {
        config.output_dir = api_dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Generate) {
        Commands::Generate => {
            let generator = Generator::new(config).context("invalid configuration")?;
            let report = generator.run().await;
            tracing::info!(
                written = report.written.len(),
                failed = report.failures.len(),
                latest_entry_ms = ?report.latest_entry_ms,
                "generation finished"
            );
            if report.is_total_failure() {
                bail!("no snapshot could be published");
            }
        }
        Commands::Inspect { range } => {
            let generator = Generator::new(config).context("invalid configuration")?;
            let now_ms = chrono::Utc::now().timestamp_millis();
            let Some(result) = generator.inspect(&range, now_ms).await else {
                bail!("range '{}' is not configured", range);
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Latest => {
            let generator = Generator::new(config).context("invalid configuration")?;
            let latest = generator.latest().await;
            if let Some(error) = &latest.error {
                bail!("failed to read {}: {}", generator.config().log_path.display(), error);
            }
            println!("{}", serde_json::to_string_pretty(&latest.record)?);
        }
        Commands::Demo {
            count,
            interval_secs,
            seed,
        } => {
            let mut collector = match seed {
                Some(seed) => DemoCollector::seeded(seed),
                None => DemoCollector::new(),
            };
            let interval_ms = i64::try_from(interval_secs.saturating_mul(1000))
                .context("interval is too large")?;
            let end_ms = chrono::Utc::now().timestamp_millis();
            backfill(&config.log_path, &mut collector, count, interval_ms, end_ms)
                .await
                .with_context(|| format!("failed to append to {}", config.log_path.display()))?;
            tracing::info!(path = %config.log_path.display(), count, "demo records appended");
        }
    }

    Ok(())
}
