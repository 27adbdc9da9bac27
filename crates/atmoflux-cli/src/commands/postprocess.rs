use crate::cli::PostprocessArgs;
use crate::error::{CliError, Result};
use crate::utils::progress::ProgressDisplay;
use atmoflux::{
    core::progress::ProgressReporter,
    workflows::{self, postprocess::PostprocessConfigBuilder},
};
use tracing::info;

pub fn run(args: PostprocessArgs, quiet: bool) -> Result<()> {
    let mut builder = PostprocessConfigBuilder::new()
        .detector(args.detector)
        .selection(args.selection)
        .inj_param_units(args.inj_param_units)
        .individual_fits(args.individual_fits)
        .combined_fits(args.combined_fits)
        .extra_points_lists(args.extra_points, args.extra_points_labels)
        .outdir(args.outdir);
    for dir in args.dirs {
        builder = builder.dir(dir);
    }
    for label in args.dir_labels {
        builder = builder.dir_label(label);
    }
    let config = builder
        .build()
        .map_err(|e| CliError::Argument(e.to_string()))?;

    let display = ProgressDisplay::for_run(quiet);
    let reporter = ProgressReporter::with_callback(display.callback());

    println!("Post-processing {} scan directory(ies)...", config.dirs.len());
    let summary = workflows::postprocess::run(&config, &reporter)?;

    info!(
        "Injected parameter '{}' ({}), {} curve(s), {} plot(s).",
        summary.inj_param_name,
        summary.inj_param_units,
        summary.curves.len(),
        summary.plots.len()
    );
    for curve in &summary.curves {
        let peak = curve
            .significances
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        println!(
            "  {} vs {}: {} point(s), max significance {:.3}",
            curve.label.as_deref().unwrap_or(&curve.truth),
            curve.test_label,
            curve.x.len(),
            peak
        );
    }
    println!(
        "✓ {} plot description(s) written to: {}",
        summary.plots.len(),
        config.outdir.display()
    );
    println!("✓ Significance table written to: {}", summary.table.display());
    Ok(())
}
