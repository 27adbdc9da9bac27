use crate::cli::WeightsArgs;
use crate::config::PartialWeightsConfig;
use crate::error::Result;
use crate::utils::progress::ProgressDisplay;
use atmoflux::{core::progress::ProgressReporter, workflows};
use tracing::{info, warn};

pub fn run(args: WeightsArgs, quiet: bool) -> Result<()> {
    let partial_config = PartialWeightsConfig::from_file(&args.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let config = partial_config.merge_with_cli(&args)?;

    let display = ProgressDisplay::for_run(quiet);
    let reporter = ProgressReporter::with_callback(display.callback());

    println!(
        "Weighting events from {} file(s)...",
        config.loader.events_files.len()
    );
    let data = workflows::event_weights::run(&config, &reporter)?;
    info!("Pipeline finished with {} container(s).", data.len());

    if data.is_empty() {
        warn!("No containers survived loading; nothing to write.");
        println!("Warning: no events survived the selection.");
        return Ok(());
    }

    workflows::event_weights::write_containers_csv(&data, &args.output)?;
    for container in data.iter() {
        println!("  {:<10} {} event(s)", container.name, container.size());
    }
    println!("✓ Weighted events written to: {}", args.output.display());
    Ok(())
}
