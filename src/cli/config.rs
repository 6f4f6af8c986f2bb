//! Conversion of CLI arguments into library configuration

use crate::cli::main_impl::{Cli, RunArgs};
use crate::{
    config::{BatchConfig, InputFilter, SegmenterConfig},
    models::ModelSpec,
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Segmenter configuration from the global flags
    pub(crate) fn segmenter_config(cli: &Cli) -> Result<SegmenterConfig> {
        let model_spec = ModelSpec::parse(&cli.model).context("Invalid model specification")?;
        let (backend_type, execution_provider) =
            ExecutionProviderManager::parse_provider_string(&cli.execution_provider)
                .context("Invalid execution provider format")?;

        SegmenterConfig::builder()
            .model_spec(model_spec)
            .backend_type(backend_type)
            .execution_provider(execution_provider)
            // 0 lets the backend pick
            .num_threads(cli.threads)
            .debug(cli.verbose >= 2)
            .build()
            .context("Invalid configuration")
    }

    /// Batch configuration of the `run` subcommand
    pub(crate) fn run_batch_config(args: &RunArgs) -> Result<BatchConfig> {
        if args.extension.trim().is_empty() {
            anyhow::bail!("--extension must not be empty");
        }
        Ok(
            BatchConfig::non_interactive(&args.input, &args.output)
                .with_filter(InputFilter::ExactExtension(args.extension.clone())),
        )
    }

    /// Check the global flags before any model is loaded
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        ExecutionProviderManager::parse_provider_string(&cli.execution_provider)
            .context("Invalid execution provider format")?;
        ModelSpec::parse(&cli.model).context("Invalid model specification")?;
        Ok(())
    }
}
