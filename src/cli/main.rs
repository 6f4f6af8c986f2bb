//! Background cleaning CLI
//!
//! `run` cleans a folder synchronously with console progress lines,
//! `interactive` runs batches on a worker thread behind a progress bar, and
//! `models` manages the model cache.

use super::config::CliConfigBuilder;
use crate::{
    batch::{run_batch, BatchEvent, BatchHandle, BatchProgress, BatchSummary},
    cache::{format_size, ModelCache, CACHE_DIR_ENV},
    config::CleanOptions,
    download::ModelDownloader,
    models::{ModelPreset, ModelSource, ModelSpec},
    pipeline::BackgroundCleaner,
    segmenter::ModelSegmenter,
    services::{ConsoleProgressReporter, NoOpProgressReporter, ProgressReporter},
    session::InteractiveSession,
    tracing_config::init_cli_tracing,
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Batch object-preserving background cleaner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "imgly-bgclean")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Model preset (u2net, u2netp, silueta, isnet-general-use) or path to an .onnx file,
    /// optionally suffixed with :<preset> to pick its preprocessing
    #[arg(short, long, global = true, default_value = "u2net")]
    pub model: String,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:coreml, tract:cpu)
    #[arg(short, long, global = true, default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, global = true, default_value_t = 0)]
    pub threads: usize,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format: console, compact or json (json needs feature tracing-json)
    #[arg(long, global = true, default_value = "console")]
    pub log_format: String,

    /// Also write logs to this file (needs feature tracing-files)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clean every matching image of a folder, stopping at the first failure
    Run(RunArgs),
    /// Pick folders, then clean them in the background with a progress bar
    Interactive(InteractiveArgs),
    /// Manage segmentation models
    #[command(subcommand)]
    Models(ModelsCommand),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(short, long, default_value = "InputImages")]
    pub input: PathBuf,

    #[arg(short, long, default_value = "OutputImages")]
    pub output: PathBuf,

    /// File name suffix to process, compared case-sensitively
    #[arg(long, default_value = crate::config::NON_INTERACTIVE_SUFFIX)]
    pub extension: String,

    /// Print the batch summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InteractiveArgs {
    /// Input folder (prompted for when omitted)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output folder (prompted for when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only process file names matching this glob (e.g. "IMG_*")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Stop the batch at the first failed image
    #[arg(long)]
    pub stop_on_error: bool,
}

#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    /// List presets and cached models
    List,
    /// Download a preset into the cache
    Download {
        /// Preset to download [default: the --model preset]
        preset: Option<String>,
        /// Expected SHA-256 of the model file
        #[arg(long)]
        sha256: Option<String>,
    },
    /// Remove one cached model, or all of them
    Clear {
        /// Model id to remove [default: all]
        model_id: Option<String>,
    },
    /// Show the cache directory
    CacheDir,
    /// Show backend and execution provider availability
    Providers,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing = init_cli_tracing(cli.verbose, &cli.log_format, cli.log_file.as_deref())
        .context("Failed to initialize tracing")?;

    match &cli.command {
        Command::Models(command) => run_models_command(&cli, command).await,
        Command::Run(args) => run_non_interactive(&cli, args).await,
        Command::Interactive(args) => run_interactive(&cli, args).await,
    }
}

/// Download the preset behind `spec` when it is not cached yet
async fn ensure_model_available(spec: &ModelSpec) -> Result<()> {
    match &spec.source {
        ModelSource::Preset(preset) => {
            let cache = ModelCache::new().context("Failed to create model cache")?;
            if !cache.is_model_cached(preset.id()) {
                info!("Model {} is not cached, downloading it", preset);
                ModelDownloader::with_cache(cache)
                    .context("Failed to create model downloader")?
                    .download_preset(*preset, true)
                    .await
                    .with_context(|| format!("Failed to download model {preset}"))?;
            }
        },
        ModelSource::External(path) => {
            if !path.is_file() {
                anyhow::bail!("Model file not found: {}", path.display());
            }
        },
    }
    Ok(())
}

/// Load the model once and wrap it in a cleaner
async fn create_cleaner(
    cli: &Cli,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<BackgroundCleaner> {
    CliConfigBuilder::validate_cli(cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::segmenter_config(cli)?;
    info!(
        model = %config.model_spec.source.display_name(),
        backend = %config.backend_type,
        provider = %config.execution_provider,
        "Preparing segmentation model"
    );

    ensure_model_available(&config.model_spec)
        .await
        .context("Failed to ensure model is available")?;

    let mut segmenter =
        ModelSegmenter::new(config).context("Failed to create segmentation model")?;
    if let Some(load_time) = segmenter
        .initialize()
        .context("Failed to load segmentation model")?
    {
        info!("Model loaded in {:.2}s", load_time.as_secs_f64());
    }

    Ok(BackgroundCleaner::new(Box::new(segmenter), CleanOptions::default()).with_reporter(reporter))
}

async fn run_non_interactive(cli: &Cli, args: &RunArgs) -> Result<()> {
    let config = CliConfigBuilder::run_batch_config(args)?;
    // check the folders before spending time on the model
    config.validate().context("Invalid batch configuration")?;

    let reporter = Arc::new(ConsoleProgressReporter::new(cli.verbose > 0));
    let mut cleaner = create_cleaner(cli, reporter).await?;

    let summary = run_batch(&mut cleaner, &config)
        .with_context(|| format!("Cleaning {} failed", config.input_dir.display()))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
    } else {
        print_summary(&summary);
    }
    Ok(())
}

async fn run_interactive(cli: &Cli, args: &InteractiveArgs) -> Result<()> {
    let mut session = InteractiveSession::new()
        .with_pattern(args.pattern.clone())
        .with_continue_on_error(!args.stop_on_error);
    let prompted = args.input.is_none() || args.output.is_none();

    if let Some(input) = &args.input {
        session
            .select_input(input.clone())
            .context("Invalid input folder")?;
    }
    if let Some(output) = &args.output {
        session
            .select_output(output.clone())
            .context("Invalid output folder")?;
    }

    let mut cleaner = Some(create_cleaner(cli, Arc::new(NoOpProgressReporter)).await?);

    loop {
        if session.input_dir().is_none() {
            prompt_input_folder(&mut session)?;
        }
        if session.output_dir().is_none() {
            prompt_output_folder(&mut session)?;
        }

        let runner = match session.start() {
            Ok(runner) => runner,
            Err(e) if prompted => {
                eprintln!("{e}");
                session.clear()?;
                continue;
            },
            Err(e) => return Err(e).context("Cannot start the batch"),
        };

        println!(
            "Cleaning {} image(s) from {} into {}",
            runner.inputs().len(),
            runner.config().input_dir.display(),
            runner.config().output_dir.display()
        );

        let worker_cleaner = cleaner
            .take()
            .context("Cleaner was not returned by the previous batch")?;
        let (handle, events) = runner.spawn(worker_cleaner)?;
        let summary = show_progress(&handle, events).await;
        cleaner = Some(handle.join().context("Batch worker failed")?);
        session.finish();

        match summary {
            Some(summary) => print_summary(&summary),
            None => warn!("Batch ended without a summary"),
        }

        if !prompted || !confirm("Clean another folder? [y/N]")? {
            return Ok(());
        }
        session.clear()?;
    }
}

/// Drive the progress bar from worker events until the channel closes
///
/// Ctrl-C cancels the batch after the image in flight.
async fn show_progress(
    handle: &BatchHandle,
    mut events: UnboundedReceiver<BatchEvent>,
) -> Option<BatchSummary> {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }

    let cancel = handle.cancellation_token();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ctrl_c_done = false;
    let mut summary = None;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(BatchEvent::Started { total }) => bar.set_length(total as u64),
                Some(BatchEvent::ItemStarted { file, .. }) => {
                    bar.set_message(format!("cleaning {}", display_name(&file)));
                },
                Some(BatchEvent::ItemCompleted { progress, .. }) => {
                    update_bar(&bar, &progress);
                },
                Some(BatchEvent::ItemFailed { file, phase, message, progress }) => {
                    let phase = phase.map_or_else(String::new, |p| format!(" during {p}"));
                    bar.println(format!("Failed {}{phase}: {message}", display_name(&file)));
                    update_bar(&bar, &progress);
                },
                Some(BatchEvent::Finished(finished)) => summary = Some(finished),
                None => break,
            },
            result = &mut ctrl_c, if !ctrl_c_done => {
                ctrl_c_done = true;
                if cancel_on_ctrl_c(result, &cancel) {
                    bar.println("Cancelling after the current image...");
                }
            },
        }
    }

    bar.finish_and_clear();
    summary
}

/// Cancel the batch once Ctrl-C is delivered
///
/// A listener that could not be installed cancels nothing.
fn cancel_on_ctrl_c(signal: io::Result<()>, cancel: &CancellationToken) -> bool {
    match signal {
        Ok(()) => {
            cancel.cancel();
            true
        },
        Err(e) => {
            warn!("Cannot listen for Ctrl-C, the batch runs to the end: {e}");
            false
        },
    }
}

fn update_bar(bar: &ProgressBar, progress: &BatchProgress) {
    bar.set_position(progress.completed as u64);
    bar.set_message(format!(
        "{}/{} done, {:.1}s per image, ETA {}",
        progress.completed,
        progress.total,
        progress.average().as_secs_f64(),
        HumanDuration(progress.eta())
    ));
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "Cleaned {}/{} image(s) in {}",
        summary.processed,
        summary.total,
        HumanDuration(summary.elapsed)
    );
    if summary.cancelled {
        println!("Batch cancelled, {} image(s) not started", summary.skipped);
    }
    if !summary.failures.is_empty() {
        println!("{} image(s) failed:", summary.failures.len());
        for failure in &summary.failures {
            match failure.phase {
                Some(phase) => println!(
                    "  {} ({phase}): {}",
                    failure.file.display(),
                    failure.message
                ),
                None => println!("  {}: {}", failure.file.display(), failure.message),
            }
        }
    }
}

fn prompt(label: &str) -> Result<Option<String>> {
    print!("{label}: ");
    io::stdout().flush().context("Failed to write prompt")?;
    let mut line = String::new();
    if io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?
        == 0
    {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn confirm(label: &str) -> Result<bool> {
    Ok(prompt(label)?.is_some_and(|answer| {
        answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
    }))
}

fn prompt_input_folder(session: &mut InteractiveSession) -> Result<()> {
    loop {
        let Some(answer) = prompt("Input folder")? else {
            anyhow::bail!("No input folder given");
        };
        if answer.is_empty() {
            continue;
        }
        match session.select_input(answer) {
            Ok(_) => return Ok(()),
            Err(e) => eprintln!("{e}"),
        }
    }
}

fn prompt_output_folder(session: &mut InteractiveSession) -> Result<()> {
    loop {
        let Some(answer) = prompt("Output folder")? else {
            anyhow::bail!("No output folder given");
        };
        if answer.is_empty() {
            continue;
        }
        session.select_output(answer)?;
        return Ok(());
    }
}

async fn run_models_command(cli: &Cli, command: &ModelsCommand) -> Result<()> {
    match command {
        ModelsCommand::List => list_models(),
        ModelsCommand::Download { preset, sha256 } => {
            let name = preset.as_deref().unwrap_or(&cli.model);
            let preset: ModelPreset = name.parse().context("Only presets can be downloaded")?;
            download_model(preset, sha256.as_deref()).await
        },
        ModelsCommand::Clear { model_id } => clear_models(model_id.as_deref()),
        ModelsCommand::CacheDir => show_cache_dir(),
        ModelsCommand::Providers => {
            show_provider_diagnostics();
            Ok(())
        },
    }
}

fn list_models() -> Result<()> {
    let cache = ModelCache::new().context("Failed to initialize model cache")?;

    println!("Presets");
    for preset in ModelPreset::ALL {
        let status = if cache.is_model_cached(preset.id()) {
            "cached"
        } else {
            "not downloaded"
        };
        let [width, height] = preset.preprocessing().target_size;
        println!(
            "  {:<18} {:<15} {}x{}  {}",
            preset.id(),
            status,
            width,
            height,
            preset.description()
        );
    }

    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;
    println!("\nCached files in {}", cache.get_current_cache_dir().display());
    if models.is_empty() {
        println!("  none (download one with: imgly-bgclean models download u2net)");
    }
    for model in models {
        println!(
            "  {:<18} {:>10}  {}",
            model.model_id,
            format_size(model.size_bytes),
            model.path.display()
        );
    }
    Ok(())
}

async fn download_model(preset: ModelPreset, sha256: Option<&str>) -> Result<()> {
    let downloader = ModelDownloader::new().context("Failed to create model downloader")?;
    println!("Downloading {} from {}", preset, preset.url());

    let path = downloader
        .download_model(&preset.url(), preset.id(), sha256, true)
        .await
        .with_context(|| format!("Failed to download model {preset}"))?;

    println!("Model {} is cached at {}", preset, path.display());
    Ok(())
}

fn clear_models(model_id: Option<&str>) -> Result<()> {
    let cache = ModelCache::new().context("Failed to create model cache")?;

    if let Some(model_id) = model_id {
        if cache
            .clear_specific_model(model_id)
            .with_context(|| format!("Failed to clear model '{model_id}'"))?
        {
            println!("Removed model {model_id}");
        } else {
            println!("Model '{model_id}' is not cached (see: imgly-bgclean models list)");
        }
        return Ok(());
    }

    let removed = cache.clear_all_models().context("Failed to clear cache")?;
    if removed.is_empty() {
        println!("Cache was already empty");
    } else {
        println!("Removed {} model(s): {}", removed.len(), removed.join(", "));
    }
    Ok(())
}

fn show_cache_dir() -> Result<()> {
    let cache = ModelCache::new().context("Failed to access cache directory")?;
    println!("{}", cache.get_current_cache_dir().display());
    if std::env::var(CACHE_DIR_ENV).is_ok() {
        println!("(from {CACHE_DIR_ENV})");
    } else {
        println!("(platform cache directory; set {CACHE_DIR_ENV} to override)");
    }
    Ok(())
}

fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected\n");

    println!("Execution providers");
    for provider in ExecutionProviderManager::list_all_providers() {
        let status = if provider.available {
            "available"
        } else {
            "not available"
        };
        println!("  {:<12} {:<14} {}", provider.name, status, provider.description);
    }

    println!("\nSelect one with --execution-provider, e.g. onnx:cuda or tract");
}
