use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

use topicgen_rs::{
    fetch_and_report, logging, BatchDriver, BatchJob, Config, ConfigManager, FailurePolicy,
    GeminiGenerator, TokioPacer, YtDlpDownloader,
};

#[derive(Parser)]
#[command(name = "topicgen")]
#[command(about = "Generate one Markdown file per topic via Gemini, or download a video")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more batches (all configured batches when none are named)
    Run(RunArgs),

    /// List configured batches
    List,

    /// Download a video by URL or YouTube id
    Download(DownloadArgs),

    /// Write the default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Batch names to run, in order
    batches: Vec<String>,

    /// Directory for generated files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Seconds to wait after each request (overrides every batch)
    #[arg(long)]
    delay_secs: Option<u64>,

    /// What to do when a request fails
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Retries per topic when --policy retry is used
    #[arg(long)]
    max_retries: Option<u32>,

    /// Print the composed prompts without calling the service
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct DownloadArgs {
    /// Video URL or bare YouTube video id
    target: String,

    /// Destination directory
    #[arg(short, long)]
    dir: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    FailFast,
    Skip,
    Retry,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { force } => {
            let path = match cli.config {
                Some(path) => path,
                None => ConfigManager::default_path()?,
            };
            ConfigManager::write_default(&path, force)
        }
        Commands::List => list_batches(&load_config(cli.config)?),
        Commands::Download(args) => download(load_config(cli.config)?, args).await,
        Commands::Run(args) => run_batches(load_config(cli.config)?, args).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let manager = match path {
        Some(path) => ConfigManager::load_from(path)?,
        None => ConfigManager::load()?,
    };
    Ok(manager.get())
}

fn list_batches(config: &Config) -> Result<()> {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_header(vec!["Batch", "Topics", "Delay (s)", "First topic"]);

    for batch in &config.batches {
        table.add_row(vec![
            batch.name.clone(),
            batch.topics.len().to_string(),
            batch.delay(&config.pacing).as_secs().to_string(),
            batch.topics.first().cloned().unwrap_or_default(),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
        for batch in &mut config.batches {
            batch.output_dir = None;
        }
    }

    if let Some(delay) = args.delay_secs {
        config.pacing.delay_secs = delay;
        for batch in &mut config.batches {
            batch.delay_secs = None;
        }
    }

    if let Some(policy) = args.policy {
        config.failure_policy = match policy {
            PolicyArg::FailFast => FailurePolicy::FailFast,
            PolicyArg::Skip => FailurePolicy::Skip,
            PolicyArg::Retry => FailurePolicy::retry(),
        };
    }

    if let (Some(retries), FailurePolicy::Retry { max_retries, .. }) =
        (args.max_retries, &mut config.failure_policy)
    {
        *max_retries = retries;
    }
}

fn select_jobs(config: &Config, names: &[String]) -> Result<Vec<BatchJob>> {
    if names.is_empty() {
        return Ok(config
            .batches
            .iter()
            .map(|batch| BatchJob::from_config(batch, config))
            .collect());
    }

    names
        .iter()
        .map(|name| {
            config
                .batch(name)
                .map(|batch| BatchJob::from_config(batch, config))
                .with_context(|| format!("Unknown batch '{}'", name))
        })
        .collect()
}

async fn run_batches(mut config: Config, args: RunArgs) -> Result<()> {
    apply_overrides(&mut config, &args);
    let jobs = select_jobs(&config, &args.batches)?;

    if jobs.is_empty() {
        bail!("No batches configured");
    }

    if args.dry_run {
        for job in &jobs {
            info!("Batch '{}' -> {}", job.name, job.writer.dir().display());
            for (topic, prompt) in job.prompts() {
                let path = job.writer.path_for(topic)?;
                println!("=== {} -> {}\n{}\n", topic, path.display(), prompt);
            }
        }
        return Ok(());
    }

    let generator = GeminiGenerator::from_config(&config.generation)
        .context("Failed to set up the Gemini client")?;
    let pacer = TokioPacer;
    let driver = BatchDriver::new(&generator, &pacer, config.failure_policy);

    let work = async {
        for job in &jobs {
            driver.run(job).await?;
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = work => result,
        _ = signal::ctrl_c() => {
            warn!("Received SIGINT (Ctrl+C), stopping before the remaining topics");
            bail!("Interrupted")
        }
    }
}

async fn download(config: Config, args: DownloadArgs) -> Result<()> {
    let target_dir = args.dir.unwrap_or_else(|| config.download.output_dir.clone());
    let downloader = YtDlpDownloader::from_config(&config.download);

    // Download failures are reported, not propagated.
    fetch_and_report(&downloader, &args.target, &target_dir).await;
    Ok(())
}
