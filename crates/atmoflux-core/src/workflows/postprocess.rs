use super::error::WorkflowError;
use crate::analysis::AnalysisError;
use crate::analysis::asimov::{
    AsimovData, calculate_deltachi2_significances, extract_asimov_data, extract_minim_data,
    get_inj_param_units,
};
use crate::analysis::labels::Labels;
use crate::analysis::plots::{
    ExtraPoints, PlotContext, PlotDescription, SignificanceCurve, best_fit_plots,
    minimiser_plots, parse_extra_points, significance_plots, test_label,
};
use crate::analysis::trials::{Trials, extract_trials};
use crate::core::progress::ProgressReporter;
use crate::stages::config::ConfigError;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PostprocessConfig {
    /// Log directories of Asimov injected-parameter scans.
    pub dirs: Vec<String>,
    pub dir_labels: Vec<String>,
    pub detector: String,
    pub selection: String,
    /// Units of the injected parameter; derived from the fits when absent.
    pub inj_param_units: Option<String>,
    pub individual_fits: bool,
    pub combined_fits: bool,
    /// Files or literal point lists, one per entry of `extra_points_labels`.
    pub extra_points: Vec<String>,
    pub extra_points_labels: Vec<String>,
    pub outdir: PathBuf,
}

#[derive(Default)]
pub struct PostprocessConfigBuilder {
    dirs: Vec<String>,
    dir_labels: Vec<String>,
    detector: Option<String>,
    selection: Option<String>,
    inj_param_units: Option<String>,
    individual_fits: bool,
    combined_fits: bool,
    extra_points: Vec<String>,
    extra_points_labels: Vec<String>,
    outdir: Option<PathBuf>,
}

impl PostprocessConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dirs.push(dir.into());
        self
    }
    pub fn dir_label(mut self, label: impl Into<String>) -> Self {
        self.dir_labels.push(label.into());
        self
    }
    pub fn detector(mut self, detector: impl Into<String>) -> Self {
        self.detector = Some(detector.into());
        self
    }
    pub fn selection(mut self, selection: impl Into<String>) -> Self {
        self.selection = Some(selection.into());
        self
    }
    pub fn inj_param_units(mut self, units: Option<String>) -> Self {
        self.inj_param_units = units;
        self
    }
    pub fn individual_fits(mut self, enabled: bool) -> Self {
        self.individual_fits = enabled;
        self
    }
    pub fn combined_fits(mut self, enabled: bool) -> Self {
        self.combined_fits = enabled;
        self
    }
    pub fn extra_points(mut self, points: impl Into<String>, label: impl Into<String>) -> Self {
        self.extra_points.push(points.into());
        self.extra_points_labels.push(label.into());
        self
    }
    /// Sets points and labels separately; their counts are checked at build.
    pub fn extra_points_lists(mut self, points: Vec<String>, labels: Vec<String>) -> Self {
        self.extra_points = points;
        self.extra_points_labels = labels;
        self
    }
    pub fn outdir(mut self, outdir: PathBuf) -> Self {
        self.outdir = Some(outdir);
        self
    }

    pub fn build(self) -> Result<PostprocessConfig, ConfigError> {
        if self.dirs.is_empty() {
            return Err(ConfigError::MissingParameter("dir"));
        }
        let outdir = self.outdir.ok_or(ConfigError::MissingParameter("outdir"))?;

        if self.extra_points.len() != self.extra_points_labels.len() {
            let reason = match (self.extra_points.len(), self.extra_points_labels.len()) {
                (n, 0) => format!("{n} set(s) of extra points given without labels"),
                (0, n) => format!("{n} label(s) given without any extra points"),
                (p, l) => format!("one label is needed per set of extra points, got {l} label(s) for {p} set(s)"),
            };
            return Err(ConfigError::InvalidValue {
                name: "extra_points_label",
                reason,
            });
        }

        let labels = self.dir_labels.len();
        if labels != 0 {
            if self.dirs.len() == 1 && labels != 1 {
                return Err(ConfigError::InvalidValue {
                    name: "dir_label",
                    reason: format!("a single directory takes a single label, got {labels}"),
                });
            }
            if labels != self.dirs.len() {
                return Err(ConfigError::InvalidValue {
                    name: "dir_label",
                    reason: format!(
                        "got {labels} label(s) for {} directories",
                        self.dirs.len()
                    ),
                });
            }
        }

        Ok(PostprocessConfig {
            dirs: self.dirs,
            dir_labels: self.dir_labels,
            detector: self.detector.unwrap_or_default(),
            selection: self.selection.unwrap_or_default(),
            inj_param_units: self.inj_param_units,
            individual_fits: self.individual_fits,
            combined_fits: self.combined_fits,
            extra_points: self.extra_points,
            extra_points_labels: self.extra_points_labels,
            outdir,
        })
    }
}

/// What a post-processing run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PostprocessSummary {
    pub inj_param_name: String,
    pub inj_param_units: String,
    pub curves: Vec<SignificanceCurve>,
    /// Plot descriptions, in the order they were written.
    pub plots: Vec<PathBuf>,
    pub table: PathBuf,
}

/// Trials and Asimov statistics of one scan directory.
struct Scan {
    trials: Trials,
    labels: Labels,
    asimov: AsimovData,
    significances: Vec<f64>,
}

impl Scan {
    fn load(dir: &str) -> Result<Self, WorkflowError> {
        let trials = extract_trials(dir, false, false)?;
        let labels = trials
            .labels
            .values()
            .next()
            .cloned()
            .ok_or_else(|| AnalysisError::NoTrials(PathBuf::from(dir)))?;
        let asimov = extract_asimov_data(&trials)?;
        let significances =
            calculate_deltachi2_significances(&asimov.wo_to_to_metrics, &asimov.to_to_wo_metrics)?;
        Ok(Self {
            trials,
            labels,
            asimov,
            significances,
        })
    }

    fn curve(&self, label: Option<&String>) -> SignificanceCurve {
        SignificanceCurve {
            truth: self.labels.truth().to_string(),
            label: label.cloned(),
            test_label: test_label(&self.labels, &self.asimov.bestfit),
            x: self.asimov.inj_param_vals.clone(),
            significances: self.significances.clone(),
        }
    }
}

fn load_extra_points(config: &PostprocessConfig) -> Result<Vec<ExtraPoints>, WorkflowError> {
    config
        .extra_points
        .iter()
        .zip(&config.extra_points_labels)
        .map(|(input, label)| parse_extra_points(input, label).map_err(WorkflowError::from))
        .collect()
}

fn write_plots(plots: &[PlotDescription], outdir: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
    Ok(plots
        .iter()
        .map(|plot| plot.write(outdir))
        .collect::<Result<Vec<_>, _>>()?)
}

/// Writes injected values, both fit metrics and the significance of every
/// curve as CSV.
fn write_significance_table(
    path: &Path,
    inj_param_name: &str,
    scans: &[(&Scan, SignificanceCurve)],
) -> Result<(), WorkflowError> {
    let csv_err = |source| WorkflowError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer
        .write_record([
            "curve",
            inj_param_name,
            "wo_to_to_metric",
            "to_to_wo_metric",
            "significance",
        ])
        .map_err(csv_err)?;
    for (scan, curve) in scans {
        let name = curve.label.as_deref().unwrap_or(&curve.truth);
        for (i, x) in scan.asimov.inj_param_vals.iter().enumerate() {
            writer
                .write_record([
                    name.to_string(),
                    x.to_string(),
                    scan.asimov.wo_to_to_metrics[i].to_string(),
                    scan.asimov.to_to_wo_metrics[i].to_string(),
                    scan.significances[i].to_string(),
                ])
                .map_err(csv_err)?;
        }
    }
    writer.flush().map_err(|source| WorkflowError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Turns Asimov scan logs into plot descriptions and a significance table.
///
/// A single directory yields minimiser diagnostics, significances and, when
/// requested, best-fit parameter plots. Several directories yield only the
/// overlaid significances.
#[instrument(skip_all, name = "postprocess_workflow")]
pub fn run(
    config: &PostprocessConfig,
    reporter: &ProgressReporter,
) -> Result<PostprocessSummary, WorkflowError> {
    let extra_points = load_extra_points(config)?;

    // === Phase 1: Trial extraction ===
    reporter.phase_start("Extracting trials");
    reporter.task_start(config.dirs.len() as u64);
    let mut scans = Vec::with_capacity(config.dirs.len());
    for dir in &config.dirs {
        info!(dir = %dir, "Processing scan directory");
        scans.push(Scan::load(dir)?);
        reporter.task_increment();
    }
    reporter.task_finish();
    reporter.phase_finish();

    let Some(first) = scans.first() else {
        return Err(WorkflowError::PhaseFailed {
            phase: "Extracting trials",
            reason: "no directories given".to_string(),
        });
    };
    let inj_param_name = first.asimov.inj_param_name.clone();
    if let Some(other) = scans.iter().find(|s| s.asimov.inj_param_name != inj_param_name) {
        return Err(AnalysisError::Inconsistent {
            what: "injected parameter",
            found: vec![inj_param_name, other.asimov.inj_param_name.clone()],
        }
        .into());
    }
    let inj_param_units = match &config.inj_param_units {
        Some(units) => units.clone(),
        None => get_inj_param_units(&inj_param_name, &first.asimov.wo_to_to_params)?,
    };
    let ctx = PlotContext {
        detector: &config.detector,
        selection: &config.selection,
        inj_param_name: &inj_param_name,
        inj_param_units: &inj_param_units,
    };

    // === Phase 2: Plot descriptions ===
    reporter.phase_start("Writing plot descriptions");
    let mut plots = Vec::new();
    if scans.len() == 1 {
        let minim = extract_minim_data(&first.trials)?;
        plots.extend(minimiser_plots(&ctx, &first.asimov, &minim, &first.labels));
    } else {
        info!(
            directories = scans.len(),
            "Several directories given, only the overlaid significances are produced"
        );
    }

    let curves: Vec<(&Scan, SignificanceCurve)> = scans
        .iter()
        .enumerate()
        .map(|(i, scan)| (scan, scan.curve(config.dir_labels.get(i))))
        .collect();
    let significance = significance_plots(
        &ctx,
        &curves.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>(),
        &extra_points,
    )?;
    let table_stem = significance
        .first()
        .map(|p| p.file_name.clone())
        .ok_or_else(|| WorkflowError::PhaseFailed {
            phase: "Writing plot descriptions",
            reason: "no significance plot produced".to_string(),
        })?;
    plots.extend(significance);

    if scans.len() == 1 {
        let (mut individual, mut combined) = (config.individual_fits, config.combined_fits);
        if !first.asimov.has_fitted_params() {
            if individual || combined {
                warn!(
                    "Best-fit plots were requested but the fits have no free parameters; skipping them"
                );
            }
            individual = false;
            combined = false;
        }
        if individual || combined {
            plots.extend(best_fit_plots(
                &ctx,
                &first.asimov,
                &first.labels,
                individual,
                combined,
            )?);
        }
    }

    let written = write_plots(&plots, &config.outdir)?;
    let table = config.outdir.join(format!("{table_stem}.csv"));
    write_significance_table(&table, &inj_param_name, &curves)?;
    reporter.phase_finish();

    info!(
        plots = written.len(),
        table = %table.display(),
        "Post-processing finished"
    );
    Ok(PostprocessSummary {
        inj_param_name: inj_param_name.clone(),
        inj_param_units: inj_param_units.clone(),
        curves: curves.into_iter().map(|(_, c)| c).collect(),
        plots: written,
        table,
    })
}
