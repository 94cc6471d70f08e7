use super::args::RunConfig;
use crate::identity::{IdentityConfig, ensure_identity};
use crate::pipeline::{PipelineContext, PipelineError, PipelineReport, ProvisioningPipeline};
use crate::recipe::load_recipe;
use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit code when there is no recipe file to run.
pub const EXIT_NO_INPUT: i32 = 2;

/// Default log filter; `RUST_LOG` takes precedence when set.
pub fn log_filter(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    format!("image_generator={}", level)
}

pub fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(debug)));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Load the recipe, make sure the client identity exists and run the pipeline.
pub async fn run_recipe(config: &RunConfig) -> anyhow::Result<PipelineReport> {
    info!("Loading recipe from {}", config.file.display());
    let recipe = load_recipe(&config.file)
        .map_err(PipelineError::from)
        .with_context(|| format!("Invalid recipe {}", config.file.display()))?;
    let ctx = PipelineContext::from_recipe(&recipe, config.dry_run)
        .map_err(PipelineError::from)
        .context("Incomplete recipe")?;

    let identity = ensure_identity(&IdentityConfig::default())
        .map_err(PipelineError::from)
        .context("Client identity unavailable")?;

    let mut pipeline = ProvisioningPipeline::connect(ctx, &identity).await?;
    let report = pipeline.run().await?;
    Ok(report)
}

/// Exit code for an error chain, `1` when no pipeline error is part of it.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map(PipelineError::exit_code)
        .unwrap_or(1)
}
