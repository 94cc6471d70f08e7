use image_generator::cli::{
    Args, EXIT_NO_INPUT, ExecutionMode, exit_code_for, init_logging, run_recipe,
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    let code = match args.mode() {
        ExecutionMode::Run(config) => match run_recipe(&config).await {
            Ok(report) => {
                info!(
                    "Finished after {} stages, produced image {}",
                    report.stages_completed.len(),
                    report.produced_fingerprint.as_deref().unwrap_or("<none>")
                );
                0
            }
            Err(e) => {
                error!("{:#}", e);
                exit_code_for(&e)
            }
        },
        ExecutionMode::ActionsUnsupported { action, params } => {
            info!("action: {:?}, params: {:?}", action, params);
            error!("actions not yet supported, pass a recipe file with -f");
            EXIT_NO_INPUT
        }
        ExecutionMode::NothingToDo => {
            error!("No recipe file given, pass one with -f");
            EXIT_NO_INPUT
        }
    };

    std::process::exit(code);
}
