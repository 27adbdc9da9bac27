//! Renderer-independent plot descriptions.
//!
//! Every plot the post-processing produces is described as JSON: panels with
//! axis labels, limits and data series (colour, marker, error bars). File
//! names are relative to the output directory and carry no extension.

use super::asimov::{AsimovData, MinimiserData, MinimiserSeries};
use super::error::AnalysisError;
use super::labels::Labels;
use super::tex::tex_axis_label;
use super::trials::write_json;
use crate::core::units::parse_quantity_string;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorBars {
    Symmetric { err: Vec<f64> },
    Asymmetric { up: Vec<f64>, down: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub label: Option<String>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_err: Option<ErrorBars>,
    pub color: String,
    pub marker: String,
    /// Whether points are joined by a line.
    pub line: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub xlabel: String,
    pub ylabel: String,
    pub xlim: Option<(f64, f64)>,
    pub ylim: Option<(f64, f64)>,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotDescription {
    pub title: String,
    pub subtitle: Option<String>,
    /// Panels per row; single-panel plots use 1.
    pub columns: usize,
    pub panels: Vec<Panel>,
    pub file_name: String,
}

impl PlotDescription {
    fn single(title: String, subtitle: Option<String>, panel: Panel, file_name: String) -> Self {
        Self {
            title,
            subtitle,
            columns: 1,
            panels: vec![panel],
            file_name,
        }
    }

    /// Writes `<outdir>/<file_name>.json`, creating directories as needed.
    pub fn write(&self, outdir: &Path) -> Result<PathBuf, AnalysisError> {
        let path = outdir.join(format!("{}.json", self.file_name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| AnalysisError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        write_json(&path, self)?;
        debug!(path = %path.display(), "Wrote plot description");
        Ok(path)
    }
}

fn is_dimensionless(units: &str) -> bool {
    units.is_empty() || units == "dimensionless"
}

/// Axis label with units appended unless dimensionless.
pub fn axis_label(name: &str, units: &str) -> String {
    let label = tex_axis_label(name);
    if is_dimensionless(units) {
        label
    } else {
        format!("{label} ({})", tex_axis_label(units))
    }
}

/// Axis label of the injected parameter.
pub fn inj_axis_label(name: &str, units: &str) -> String {
    if name == "deltam3l" {
        format!(
            r"$|${}$|$ $/$ $10^{{-3}}$ ({})",
            tex_axis_label(name),
            tex_axis_label(units)
        )
    } else {
        axis_label(name, units)
    }
}

/// Axis label of a fitted parameter; `deltam31` is shown as an absolute value.
pub fn fit_axis_label(name: &str, units: &str) -> String {
    if name != "deltam31" {
        return axis_label(name, units);
    }
    let label = format!(r"$|${}$|$", tex_axis_label(name));
    if is_dimensionless(units) {
        label
    } else {
        format!("{label} ({})", tex_axis_label(units))
    }
}

/// Mass-ordering colour scheme: normal red, inverted blue, otherwise black.
pub fn truth_color(truth: &str) -> &'static str {
    if truth.contains("no") {
        "red"
    } else if truth.contains("io") {
        "blue"
    } else {
        "black"
    }
}

pub fn significance_marker(label: &str) -> &'static str {
    let lower = label.to_lowercase();
    if (lower.contains("mo") || lower.contains("msw")) && !lower.contains("nmo") {
        "^"
    } else {
        "o"
    }
}

fn range(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    values.into_iter().fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Limits padded by 10 % of the range on both sides.
pub fn padded_limits(min: f64, max: f64) -> (f64, f64) {
    let span = max - min;
    (min - 0.1 * span, max + 0.1 * span)
}

/// Significance limits: padded, but a minimum of exactly zero is kept.
pub fn significance_limits(min: f64, max: f64) -> (f64, f64) {
    let span = max - min;
    if min == 0.0 {
        (min, max + 0.1 * span)
    } else {
        padded_limits(min, max)
    }
}

fn hypo_name<'a>(labels: &'a Labels, hypo: &str) -> &'a str {
    if hypo == "h0" { &labels.h0_name } else { &labels.h1_name }
}

fn other_hypo(hypo: &str) -> &'static str {
    if hypo == "h0" { "h1" } else { "h0" }
}

/// `"<best> from <alternative>"` in TeX labels.
pub fn test_label(labels: &Labels, bestfit: &str) -> String {
    format!(
        "{} from {}",
        tex_axis_label(hypo_name(labels, bestfit)),
        tex_axis_label(hypo_name(labels, other_hypo(bestfit)))
    )
}

/// Common context of all plots of one scan.
#[derive(Debug, Clone, Copy)]
pub struct PlotContext<'a> {
    pub detector: &'a str,
    pub selection: &'a str,
    pub inj_param_name: &'a str,
    pub inj_param_units: &'a str,
}

// --- Minimiser diagnostics ---

fn minimiser_panel(
    ctx: &PlotContext,
    xvals: &[f64],
    values: &[f64],
    ylabel: String,
    is_status: bool,
) -> Panel {
    let ylim = if is_status {
        Some((-0.5, 1.5))
    } else {
        range(values.iter().copied()).map(|(lo, hi)| padded_limits(lo, hi))
    };
    Panel {
        xlabel: axis_label(ctx.inj_param_name, ctx.inj_param_units),
        ylabel,
        xlim: None,
        ylim,
        series: vec![Series {
            label: None,
            x: xvals.to_vec(),
            y: values.to_vec(),
            y_err: None,
            color: "black".to_string(),
            marker: "o".to_string(),
            line: true,
        }],
    }
}

fn minimiser_set(
    ctx: &PlotContext,
    xvals: &[f64],
    series: &MinimiserSeries,
    title: &str,
    subtitle: String,
    stem: String,
) -> Vec<PlotDescription> {
    let items = [
        (&series.time, axis_label("Minimiser Time", &series.time_units), "times", false),
        (&series.iterations, "Minimiser Iterations".to_string(), "iterations", false),
        (&series.funcevals, "Minimiser Function Evaluations".to_string(), "funcevals", false),
        (&series.status, "Minimiser Status".to_string(), "status", true),
    ];
    items
        .into_iter()
        .map(|(values, ylabel, suffix, is_status)| {
            PlotDescription::single(
                title.to_string(),
                Some(subtitle.clone()),
                minimiser_panel(ctx, xvals, values, ylabel, is_status),
                format!("{stem}_minimiser_{suffix}"),
            )
        })
        .collect()
}

/// Time, iteration, function-evaluation and status plots for both fit
/// directions.
pub fn minimiser_plots(
    ctx: &PlotContext,
    asimov: &AsimovData,
    minim: &MinimiserData,
    labels: &Labels,
) -> Vec<PlotDescription> {
    let title = format!(
        "{} {} Event Selection Minimiser Info",
        ctx.detector, ctx.selection
    );
    let truth = labels.truth();
    let best = hypo_name(labels, &asimov.bestfit);
    let alt = hypo_name(labels, &asimov.altfit);
    let (det, sel) = (ctx.detector, ctx.selection);

    let mut plots = minimiser_set(
        ctx,
        &asimov.inj_param_vals,
        &minim.to_to_wo,
        &title,
        format!("Truth {best} Hypothesis Fit to Wrong {alt} Fiducial Data"),
        format!(
            "MinimiserInfo/TrueToWrongFits/true_{truth}_{det}_{sel}_true_{best}_fits_to_wrong_{alt}"
        ),
    );
    plots.extend(minimiser_set(
        ctx,
        &asimov.inj_param_vals,
        &minim.wo_to_to,
        &title,
        format!("Wrong {alt} Hypothesis Fit to Truth {best} Fiducial Data"),
        format!(
            "MinimiserInfo/WrongToTrueFits/true_{truth}_{det}_{sel}_wrong_{alt}_fits_to_true_{best}"
        ),
    ));
    plots
}

// --- Extra points ---

/// A labelled set of externally supplied points, e.g. log-likelihood-ratio
/// results.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraPoints {
    pub label: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub y_err: ErrorBars,
}

fn extra_err(input: &str, reason: impl Into<String>) -> AnalysisError {
    AnalysisError::ExtraPoints {
        input: input.to_string(),
        reason: reason.into(),
    }
}

fn parse_numbers<'a>(input: &str, fields: impl Iterator<Item = &'a str>) -> Result<Vec<f64>, AnalysisError> {
    fields
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| {
            f.parse::<f64>()
                .map_err(|_| extra_err(input, format!("'{f}' is not a number")))
        })
        .collect()
}

fn parse_literal(input: &str) -> Result<Vec<Vec<f64>>, AnalysisError> {
    let body = input
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| extra_err(input, "neither an existing file nor a list of tuples"))?;
    let mut rows = Vec::new();
    let mut rest = body.trim();
    while !rest.is_empty() {
        let open = rest
            .strip_prefix('(')
            .ok_or_else(|| extra_err(input, "expected '(' starting a point"))?;
        let close = open
            .find(')')
            .ok_or_else(|| extra_err(input, "unterminated point"))?;
        rows.push(parse_numbers(input, open[..close].split(','))?);
        rest = open[close + 1..].trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }
    Ok(rows)
}

fn parse_columns_file(input: &str, path: &Path) -> Result<Vec<Vec<f64>>, AnalysisError> {
    let content = fs::read_to_string(path).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| parse_numbers(input, l.split_whitespace()))
        .collect()
}

/// Parses a whitespace-column file or a literal `[(x, y), (x, y, err), ...]`
/// list. Every point has 2 (no error), 3 (symmetric) or 4 (up, down) entries.
pub fn parse_extra_points(input: &str, label: &str) -> Result<ExtraPoints, AnalysisError> {
    let path = Path::new(input);
    let rows = if path.is_file() {
        parse_columns_file(input, path)?
    } else {
        parse_literal(input)?
    };
    let width = rows.first().map_or(0, Vec::len);
    if !(2..=4).contains(&width) {
        return Err(extra_err(
            input,
            format!("points need (x, y), (x, y, err) or (x, y, up, down); got {width} entries"),
        ));
    }
    if rows.iter().any(|r| r.len() != width) {
        return Err(extra_err(input, "points have differing numbers of entries"));
    }
    let column = |i: usize| rows.iter().map(|r| r[i]).collect::<Vec<_>>();
    let y_err = match width {
        2 => ErrorBars::Symmetric {
            err: vec![0.0; rows.len()],
        },
        3 => ErrorBars::Symmetric { err: column(2) },
        _ => ErrorBars::Asymmetric {
            up: column(2),
            down: column(3),
        },
    };
    Ok(ExtraPoints {
        label: label.to_string(),
        x: column(0),
        y: column(1),
        y_err,
    })
}

impl ExtraPoints {
    /// Lowest and highest y including error bars.
    pub fn y_range(&self) -> Option<(f64, f64)> {
        let (down, up): (Vec<f64>, Vec<f64>) = match &self.y_err {
            ErrorBars::Symmetric { err } => (err.clone(), err.clone()),
            ErrorBars::Asymmetric { up, down } => (down.clone(), up.clone()),
        };
        let lows = self.y.iter().zip(&down).map(|(y, d)| y - d);
        let highs = self.y.iter().zip(&up).map(|(y, u)| y + u);
        let (lo, _) = range(lows)?;
        let (_, hi) = range(highs)?;
        Some((lo, hi))
    }

    pub fn series(&self) -> Series {
        let (color, marker, label) = if self.label.contains("no") || self.label.contains("NO") {
            ("red", self.labelled_marker(), tex_axis_label(&self.label))
        } else if self.label.contains("io") || self.label.contains("IO") {
            ("blue", self.labelled_marker(), tex_axis_label(&self.label))
        } else {
            ("black", "o", format!("True {}", tex_axis_label(&self.label)))
        };
        Series {
            label: Some(label),
            x: self.x.clone(),
            y: self.y.clone(),
            y_err: Some(self.y_err.clone()),
            color: color.to_string(),
            marker: marker.to_string(),
            line: false,
        }
    }

    fn labelled_marker(&self) -> &'static str {
        if self.label.contains("NuFit") { "D" } else { "s" }
    }
}

// --- Significances ---

/// One significance curve of an overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct SignificanceCurve {
    pub truth: String,
    pub label: Option<String>,
    pub test_label: String,
    pub x: Vec<f64>,
    pub significances: Vec<f64>,
}

impl SignificanceCurve {
    pub fn series(&self) -> Series {
        let label = self
            .label
            .clone()
            .unwrap_or_else(|| format!("True {}", tex_axis_label(&self.truth)));
        Series {
            marker: significance_marker(&label).to_string(),
            label: Some(label),
            x: self.x.clone(),
            y: self.significances.clone(),
            y_err: None,
            color: truth_color(&self.truth).to_string(),
            line: true,
        }
    }
}

fn significance_ylabel(test_label: Option<&str>) -> String {
    match test_label {
        Some(label) => format!(r"{label} Significance ($\sigma$)"),
        None => r"Significance ($\sigma$)".to_string(),
    }
}

/// Overlaid significance curves, plus a second plot with extra points when
/// any are given.
///
/// All curves must cover the same injected range.
pub fn significance_plots(
    ctx: &PlotContext,
    curves: &[SignificanceCurve],
    extra_points: &[ExtraPoints],
) -> Result<Vec<PlotDescription>, AnalysisError> {
    let first = curves
        .first()
        .ok_or_else(|| AnalysisError::InvalidRequest("no significance curves".to_string()))?;
    let (minx, maxx) = range(first.x.iter().copied())
        .ok_or_else(|| AnalysisError::InvalidRequest("empty significance curve".to_string()))?;
    for curve in &curves[1..] {
        let (lo, hi) = range(curve.x.iter().copied()).unwrap_or((f64::NAN, f64::NAN));
        if lo != minx || hi != maxx {
            return Err(AnalysisError::RangeMismatch(format!(
                "[{minx:.4}, {maxx:.4}] vs [{lo:.4}, {hi:.4}]"
            )));
        }
    }
    let test_label = if curves.iter().all(|c| c.test_label == first.test_label) {
        Some(first.test_label.as_str())
    } else {
        None
    };
    let (miny, maxy) = range(curves.iter().flat_map(|c| c.significances.iter().copied()))
        .unwrap_or((0.0, 0.0));

    let title = format!(
        "{} {} Event Selection Asimov Analysis Significances",
        ctx.detector, ctx.selection
    );
    let truths = if curves.len() == 1 {
        first.truth.clone()
    } else {
        curves.iter().map(|c| format!("and_{}", c.truth)).join("_")
    };
    let stem = format!(
        "Significances/true_{truths}_{}_{}_{}",
        ctx.detector, ctx.selection, ctx.inj_param_name
    );
    let panel = Panel {
        xlabel: inj_axis_label(ctx.inj_param_name, ctx.inj_param_units),
        ylabel: significance_ylabel(test_label),
        xlim: Some(padded_limits(minx, maxx)),
        ylim: Some(significance_limits(miny, maxy)),
        series: curves.iter().map(SignificanceCurve::series).collect(),
    };

    let mut plots = vec![PlotDescription::single(
        title.clone(),
        None,
        panel.clone(),
        format!("{stem}_asimov_significances"),
    )];
    if !extra_points.is_empty() {
        let (mut lo, mut hi) = (miny, maxy);
        for points in extra_points {
            if let Some((elo, ehi)) = points.y_range() {
                lo = lo.min(elo);
                hi = hi.max(ehi);
            }
        }
        let mut with_extra = panel;
        with_extra.ylim = Some(significance_limits(lo, hi));
        with_extra
            .series
            .extend(extra_points.iter().map(ExtraPoints::series));
        plots.push(PlotDescription::single(
            title,
            None,
            with_extra,
            format!("{stem}_w_extra_points_asimov_significances"),
        ));
    }
    Ok(plots)
}

// --- Best-fit parameters ---

fn param_values(name: &str, values: &[String]) -> Result<(Vec<f64>, String), AnalysisError> {
    let mut units = "dimensionless".to_string();
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        let parsed = parse_quantity_string(value)?;
        out.push(if name == "deltam31" { parsed.value.abs() } else { parsed.value });
        units = parsed.units;
    }
    Ok((out, units))
}

fn best_fit_panels(ctx: &PlotContext, asimov: &AsimovData, labels: &Labels) -> Result<Vec<(String, Panel)>, AnalysisError> {
    let to = hypo_name(labels, &asimov.bestfit);
    let wo = hypo_name(labels, &asimov.altfit);
    let mut panels = Vec::with_capacity(asimov.wo_to_to_params.len());
    for (param, wo_values) in &asimov.wo_to_to_params {
        let (wo_to_to, units) = param_values(param, wo_values)?;
        let to_values = asimov.to_to_wo_params.get(param).ok_or_else(|| {
            AnalysisError::InvalidRequest(format!(
                "parameter '{param}' missing from the true-to-wrong fits"
            ))
        })?;
        let (to_to_wo, _) = param_values(param, to_values)?;
        let ylim = range(wo_to_to.iter().chain(&to_to_wo).copied())
            .map(|(lo, hi)| padded_limits(lo, hi));
        let series = vec![
            Series {
                label: Some(format!("{to} fit to {wo} fid")),
                x: asimov.inj_param_vals.clone(),
                y: to_to_wo,
                y_err: None,
                color: "darkviolet".to_string(),
                marker: "o".to_string(),
                line: true,
            },
            Series {
                label: Some(format!("{wo} fit to {to} fid")),
                x: asimov.inj_param_vals.clone(),
                y: wo_to_to,
                y_err: None,
                color: "deepskyblue".to_string(),
                marker: "o".to_string(),
                line: true,
            },
        ];
        panels.push((
            param.clone(),
            Panel {
                xlabel: axis_label(ctx.inj_param_name, ctx.inj_param_units),
                ylabel: fit_axis_label(param, &units),
                xlim: None,
                ylim,
                series,
            },
        ));
    }
    Ok(panels)
}

/// Best-fit parameter values against the injected value, one plot per
/// parameter (`individual`) and/or all parameters on one canvas (`combined`).
pub fn best_fit_plots(
    ctx: &PlotContext,
    asimov: &AsimovData,
    labels: &Labels,
    individual: bool,
    combined: bool,
) -> Result<Vec<PlotDescription>, AnalysisError> {
    let panels = best_fit_panels(ctx, asimov, labels)?;
    let title = format!(
        "{} {} Event Selection Asimov Analysis",
        ctx.detector, ctx.selection
    );
    let subtitle = format!("True {} Best Fit Parameters", tex_axis_label(labels.truth()));
    let stem = format!(
        "true_{}_{}_{}_{}",
        labels.truth(),
        ctx.detector,
        ctx.selection,
        ctx.inj_param_name
    );

    let mut plots = Vec::new();
    if combined {
        plots.push(PlotDescription {
            title: title.clone(),
            subtitle: Some(subtitle.clone()),
            columns: 4,
            panels: panels.iter().map(|(_, p)| p.clone()).collect(),
            file_name: format!("CombinedBestFits/{stem}_all_best_fit_values"),
        });
    }
    if individual {
        for (param, panel) in panels {
            plots.push(PlotDescription::single(
                title.clone(),
                Some(subtitle.clone()),
                panel,
                format!("IndividualBestFits/{stem}_{param}_best_fit_values"),
            ));
        }
    }
    Ok(plots)
}
