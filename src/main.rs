use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use batchpilot::analyze::{analyze_profiles, inspect_batches};
use batchpilot::budget::{counter_for_model, TokenCounter};
use batchpilot::config::AppConfig;
use batchpilot::execute::{
    select_documents, CompletionBackend, ExecuteOptions, ProfileExecutor, SimulatedBackend,
};
use batchpilot::limiter::{CancelFlag, UsageWindow};
use batchpilot::partition::{load_batches, write_batches, BatchPartitioner, PartitionReport, PreparedBatch};
use batchpilot::records::prompt::description_messages;
use batchpilot::records::{scan, Discovery, ProfileDocument, ScanOutcome};
use batchpilot::sink::ResultSink;
use batchpilot::submit::{OpenAiBatchClient, SubmissionOrchestrator};
use batchpilot::telemetry::init_logging;

/// Plan, estimate, and submit description jobs for profile records.
#[derive(Parser, Debug)]
#[command(name = "batchpilot", version, about)]
struct Cli {
    /// Configuration file (defaults to ./batchpilot.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log what would be written or submitted instead of doing it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Override paths.profiles_dir
    #[arg(long, global = true)]
    profiles_dir: Option<PathBuf>,

    /// Override paths.results_dir
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate tokens and cost for every indexed profile
    Analyze,
    /// Partition indexed profiles into batch files
    Prepare,
    /// Compare prepared batch files with the queue limit
    Inspect,
    /// Submit prepared batch files
    Deploy,
    /// Generate descriptions profile by profile
    Execute {
        /// Process only this document, relative to the profiles directory
        #[arg(long)]
        sample: Option<PathBuf>,

        /// Process at most this many documents
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let dry_run = config.dry_run || cli.dry_run;
    config = config.with_dry_run(dry_run);
    if let Some(dir) = cli.profiles_dir {
        config = config.with_profiles_dir(dir);
    }
    if let Some(dir) = cli.results_dir {
        config = config.with_results_dir(dir);
    }

    match cli.command {
        Command::Analyze => analyze(&config),
        Command::Prepare => prepare(&config),
        Command::Inspect => inspect(&config),
        Command::Deploy => deploy(&config).await,
        Command::Execute { sample, limit } => execute(&config, sample.as_deref(), limit).await,
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn sink(config: &AppConfig) -> ResultSink {
    ResultSink::new(&config.paths.results_dir, config.dry_run)
}

fn report_skipped(outcome: &ScanOutcome) {
    if !outcome.skipped.is_empty() {
        tracing::warn!(skipped = outcome.skipped.len(), "some documents or profiles could not be read");
    }
}

fn analyze(config: &AppConfig) -> Result<()> {
    let outcome = scan(&config.paths.profiles_dir, Discovery::IndexFiles)?;
    report_skipped(&outcome);

    let counter = counter_for_model(&config.model.name);
    let prices = config.token_prices()?;
    let summary = analyze_profiles(
        outcome.documents.iter().flat_map(|d| d.profiles.iter()),
        counter.as_ref(),
        &prices,
    );

    sink(config).write_analysis(&summary)?;
    print!("{}", summary.format());
    Ok(())
}

fn prepare(config: &AppConfig) -> Result<()> {
    let outcome = scan(&config.paths.profiles_dir, Discovery::IndexFiles)?;
    report_skipped(&outcome);
    if outcome.profile_count() == 0 {
        bail!("no profiles found under {}", config.paths.profiles_dir.display());
    }

    let partitioner = BatchPartitioner::new(config.partition_config())?;
    let counter = counter_for_model(&config.model.batch_model);
    let fixed = config.partition.tokens_per_record;
    let batches = partitioner.partition_groups(outcome.into_groups(), |profile| {
        if fixed > 0 {
            fixed
        } else {
            counter.count_chat(&description_messages(profile))
        }
    })?;

    let report = PartitionReport::from_batches(&batches);
    let written = write_batches(
        &config.paths.results_dir,
        batches,
        &config.model.batch_model,
        config.model.batch_max_tokens,
        config.dry_run,
    )?;

    tracing::info!(
        files = written.len(),
        dir = %config.paths.results_dir.display(),
        "prepared batch files"
    );
    print!("{}", report.format(&config.batch_prices()?));
    Ok(())
}

fn load_prepared(config: &AppConfig) -> Result<Vec<PreparedBatch>> {
    let counter = counter_for_model(&config.model.batch_model);
    let dir = &config.paths.results_dir;
    let batches = load_batches(dir, counter.as_ref())
        .with_context(|| format!("failed to read batch files from {}", dir.display()))?;
    if batches.is_empty() {
        bail!("no batch files found in {}; run `batchpilot prepare` first", dir.display());
    }
    Ok(batches)
}

fn inspect(config: &AppConfig) -> Result<()> {
    let batches = load_prepared(config)?;
    let analysis = inspect_batches(&batches, config.limits.queue_token_limit);
    print!("{}", analysis.format());
    Ok(())
}

async fn deploy(config: &AppConfig) -> Result<()> {
    let batches = load_prepared(config)?;
    if config.dry_run {
        for batch in &batches {
            tracing::info!(file = %batch.file_name, tokens = batch.token_count, "dry run: would submit batch");
        }
        print!("{}", inspect_batches(&batches, config.limits.queue_token_limit).format());
        return Ok(());
    }

    let client = OpenAiBatchClient::new(config.openai_config())?;
    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after the current step");
            on_interrupt.cancel();
        }
    });

    let mut orchestrator = SubmissionOrchestrator::new(client, &config.limiter_config())?.with_cancel_flag(cancel);
    let report = orchestrator.submit_all(&batches).await;

    sink(config).write_submission_results(&report)?;
    print!("{}", report.format());
    Ok(())
}

async fn execute(config: &AppConfig, sample: Option<&Path>, limit: Option<usize>) -> Result<()> {
    let outcome = select_documents(&config.paths.profiles_dir, sample, limit)?;
    report_skipped(&outcome);

    if config.dry_run {
        run_executor(config, SimulatedBackend::default(), outcome.documents).await
    } else {
        let client = OpenAiBatchClient::new(config.openai_config())?;
        run_executor(config, client, outcome.documents).await
    }
}

async fn run_executor<C: CompletionBackend>(
    config: &AppConfig,
    backend: C,
    documents: Vec<ProfileDocument>,
) -> Result<()> {
    let counter: Arc<dyn TokenCounter> = counter_for_model(&config.model.name);
    let options = ExecuteOptions {
        model: config.model.name.clone(),
        max_completion_tokens: config.model.max_completion_tokens,
    };
    let mut executor = ProfileExecutor::new(
        backend,
        counter,
        config.token_prices()?,
        UsageWindow::new(&config.limiter_config()),
        sink(config),
        options,
    );

    let summary = executor.run(documents).await?;
    print!("{}", summary.format());
    Ok(())
}
