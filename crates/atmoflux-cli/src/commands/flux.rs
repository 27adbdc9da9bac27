use crate::cli::FluxArgs;
use crate::config::PartialFluxConfig;
use crate::error::{CliError, Result};
use crate::utils::progress::ProgressDisplay;
use atmoflux::{core::progress::ProgressReporter, workflows};
use tracing::info;

pub fn run(args: FluxArgs, quiet: bool) -> Result<()> {
    let partial_config = PartialFluxConfig::from_file(&args.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let setup = partial_config.merge_with_cli(&args)?;

    let display = ProgressDisplay::for_run(quiet);
    let reporter = ProgressReporter::with_callback(display.callback());

    println!("Computing flux maps from {}...", setup.honda.flux_file.display());
    let maps = workflows::flux_maps::run(&setup.honda, &setup.params, setup.binning, &reporter)?;

    info!("Writing {} map(s) to {:?}", maps.len(), &args.output);
    maps.write_csv(&args.output).map_err(|e| CliError::FileParsing {
        path: args.output.clone(),
        source: e.into(),
    })?;

    for map in maps.iter() {
        println!("  {:<8} total {:.6e}", map.name, map.sum());
    }
    println!("✓ Flux maps written to: {}", args.output.display());
    Ok(())
}
