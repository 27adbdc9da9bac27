use super::error::WorkflowError;
use crate::core::binning::MultiDimBinning;
use crate::core::map::MapSet;
use crate::core::progress::ProgressReporter;
use crate::stages::ParamSet;
use crate::stages::config::HondaConfig;
use crate::stages::flux::honda::HondaFlux;
use tracing::{info, instrument};

/// Loads a Honda table and evaluates the four flux maps on `binning`.
#[instrument(skip_all, name = "flux_maps_workflow")]
pub fn run(
    config: &HondaConfig,
    params: &ParamSet,
    binning: MultiDimBinning,
    reporter: &ProgressReporter,
) -> Result<MapSet, WorkflowError> {
    // === Phase 1: Table loading and spline construction ===
    reporter.phase_start("Loading flux table");
    info!(
        file = %config.flux_file.display(),
        mode = %config.flux_mode,
        "Building Honda flux service"
    );
    let service = HondaFlux::new(config.clone(), binning)?;
    reporter.phase_finish();

    // === Phase 2: Map evaluation ===
    reporter.phase_start("Evaluating flux maps");
    let maps = service.compute_outputs(params)?;
    for map in maps.iter() {
        info!(map = %map.name, total = map.sum(), "Computed flux map");
    }
    reporter.phase_finish();

    Ok(maps)
}
