//! Atmospheric neutrino flux from the Honda tables.
//!
//! Tables are either azimuth-averaged (file names containing `aa`, evaluated on
//! energy × cos(zenith) binnings) or resolved in azimuth (evaluated on
//! energy × cos(zenith) × azimuth binnings). Two interpolation schemes exist:
//!
//! - [`FluxMode::Bisplrep`] splines log10(flux) over (log10 E, cos zenith).
//! - [`FluxMode::IntegralPreserving`] splines the running integral of the
//!   tabulated bin averages and differentiates it, first along log10 E and
//!   then along cos zenith, so integrals over table bins are reproduced.

use crate::core::binning::{
    FluxBinningKind, MultiDimBinning, OneDimBinning, TRUE_AZIMUTH, TRUE_COSZEN, TRUE_ENERGY,
    linspace,
};
use crate::core::map::{Map, MapSet};
use crate::core::spline::{CubicSpline1D, GridSpline2D, SplineError};
use crate::core::units::{Quantity, Unit};
use crate::stages::config::{FluxMode, HondaConfig};
use crate::stages::{ParamSet, StageError};
use itertools::Itertools;
use std::f64::consts::PI;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Neutrino primaries in the column order of the Honda tables.
pub const PRIMARIES: [&str; 4] = ["numu", "numubar", "nue", "nuebar"];

pub const EXPECTED_PARAMS: [&str; 6] = [
    "atm_delta_index",
    "energy_scale",
    "nu_nubar_ratio",
    "nue_numu_ratio",
    "oversample_e",
    "oversample_cz",
];

const NUM_COSZEN_NODES: usize = 20;
const NUM_AZIMUTH_NODES: usize = 12;
const COSZEN_WIDTH: f64 = 0.1;
const LOG_ENERGY_UNIFORMITY_TOLERANCE: f64 = 0.05;

/// Parsed Honda table.
#[derive(Debug, Clone, PartialEq)]
pub struct HondaTable {
    /// Energy nodes in GeV, ascending.
    pub energy: Vec<f64>,
    /// Cos(zenith) nodes in file order (0.95 down to -0.95).
    pub coszen: Vec<f64>,
    /// Azimuth nodes in degrees; a single node for azimuth-averaged tables.
    pub azimuth: Vec<f64>,
    /// `flux[primary][azimuth][coszen][energy]`.
    pub flux: Vec<Vec<Vec<Vec<f64>>>>,
}

impl HondaTable {
    pub fn load(path: &Path, kind: FluxBinningKind) -> Result<Self, StageError> {
        info!("Loading atmospheric flux table {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| StageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, kind).map_err(|message| StageError::Table {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parses whitespace-separated `energy numu numubar nue nuebar` rows,
    /// skipping any line that is not purely numeric.
    pub fn parse(content: &str, kind: FluxBinningKind) -> Result<Self, String> {
        let mut rows: Vec<[f64; 5]> = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let values: Result<Vec<f64>, _> =
                line.split_whitespace().map(str::parse::<f64>).collect();
            let Ok(values) = values else { continue };
            if values.is_empty() {
                continue;
            }
            let row: [f64; 5] = values.as_slice().try_into().map_err(|_| {
                format!(
                    "line {} has {} columns, expected 5 (energy numu numubar nue nuebar)",
                    lineno + 1,
                    values.len()
                )
            })?;
            rows.push(row);
        }

        let num_azimuth = match kind {
            FluxBinningKind::TwoDim => 1,
            FluxBinningKind::ThreeDim => NUM_AZIMUTH_NODES,
        };
        let blocks = NUM_COSZEN_NODES * num_azimuth;
        if rows.is_empty() || rows.len() % blocks != 0 {
            return Err(format!(
                "{} data rows cannot be split into {} blocks",
                rows.len(),
                blocks
            ));
        }
        let num_energy = rows.len() / blocks;
        let energy: Vec<f64> = rows[..num_energy].iter().map(|r| r[0]).collect();

        let mut flux = vec![vec![vec![Vec::with_capacity(num_energy); NUM_COSZEN_NODES]; num_azimuth]; 4];
        for (i, row) in rows.iter().enumerate() {
            let block = i / num_energy;
            let (icz, iaz) = (block / num_azimuth, block % num_azimuth);
            for (p, per_primary) in flux.iter_mut().enumerate() {
                per_primary[iaz][icz].push(row[p + 1]);
            }
        }

        let azimuth = match kind {
            FluxBinningKind::TwoDim => vec![0.0],
            FluxBinningKind::ThreeDim => linspace(15.0, 345.0, NUM_AZIMUTH_NODES),
        };
        Ok(Self {
            energy,
            coszen: linspace(0.95, -0.95, NUM_COSZEN_NODES),
            azimuth,
            flux,
        })
    }
}

#[derive(Debug, Clone)]
enum NodeSplines {
    Bisplrep(GridSpline2D),
    /// Running-integral splines along log10 E, one per cos(zenith) node in
    /// ascending cos(zenith) order.
    IntegralPreserving(Vec<CubicSpline1D>),
}

/// Honda flux service for a fixed output binning.
#[derive(Debug, Clone)]
pub struct HondaFlux {
    config: HondaConfig,
    binning: MultiDimBinning,
    kind: FluxBinningKind,
    azimuth_nodes: Vec<f64>,
    log_energy_width: f64,
    /// `splines[primary][azimuth]`.
    splines: Vec<Vec<NodeSplines>>,
}

impl HondaFlux {
    #[instrument(skip_all, name = "honda_setup")]
    pub fn new(config: HondaConfig, binning: MultiDimBinning) -> Result<Self, StageError> {
        let kind = binning.flux_kind()?;
        validate_flux_file(&config.flux_file, kind)?;
        let table = HondaTable::load(&config.flux_file, kind)?;
        Self::from_table(config, binning, &table)
    }

    pub fn from_table(
        config: HondaConfig,
        binning: MultiDimBinning,
        table: &HondaTable,
    ) -> Result<Self, StageError> {
        let kind = binning.flux_kind()?;
        let log_energy: Vec<f64> = table.energy.iter().map(|e| e.log10()).collect();
        let log_energy_width = uniform_width(&log_energy);
        let smoothing = match kind {
            FluxBinningKind::TwoDim => config.smoothing,
            FluxBinningKind::ThreeDim => config.smoothing * 4.0,
        };

        let splines = match config.flux_mode {
            FluxMode::Bisplrep => {
                debug!(smoothing, "Building bivariate splines of log10(flux)");
                table
                    .flux
                    .iter()
                    .map(|per_az| {
                        per_az
                            .iter()
                            .map(|cz_rows| bisplrep_node(&log_energy, &table.coszen, cz_rows))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            FluxMode::IntegralPreserving => {
                let width = log_energy_width.ok_or_else(|| StageError::Table {
                    path: config.flux_file.clone(),
                    message: "integral-preserving mode requires uniformly log-spaced energies"
                        .to_string(),
                })?;
                debug!(
                    log_energy_width = width,
                    "Building integral-preserving splines"
                );
                let edges: Vec<f64> = (0..=log_energy.len())
                    .map(|i| log_energy[0] - width / 2.0 + width * i as f64)
                    .collect();
                table
                    .flux
                    .iter()
                    .map(|per_az| {
                        per_az
                            .iter()
                            .map(|cz_rows| integral_node(&edges, &table.energy, cz_rows))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(Self {
            config,
            binning,
            kind,
            azimuth_nodes: table.azimuth.clone(),
            log_energy_width: log_energy_width.unwrap_or(0.0),
            splines,
        })
    }

    pub fn config(&self) -> &HondaConfig {
        &self.config
    }

    pub fn binning(&self) -> &MultiDimBinning {
        &self.binning
    }

    /// Evaluates the flux maps for the current parameters, oversampling and
    /// systematics included.
    #[instrument(skip_all, name = "honda_compute")]
    pub fn compute_outputs(&self, params: &ParamSet) -> Result<MapSet, StageError> {
        params.require_exactly("honda", &EXPECTED_PARAMS)?;
        let oversample_e = oversampling_factor(params, "oversample_e")?;
        let oversample_cz = oversampling_factor(params, "oversample_cz")?;
        let energy_scale = params.dimensionless("energy_scale")?;
        if energy_scale != 1.0 {
            debug!(energy_scale, "energy_scale does not modify Honda flux maps");
        }

        let factors: Vec<usize> = self
            .binning
            .dims
            .iter()
            .map(|d| match d.name.as_str() {
                TRUE_ENERGY => oversample_e,
                TRUE_COSZEN => oversample_cz,
                _ => 1,
            })
            .collect();
        let eval_binning = self.binning.oversample(&factors)?;

        let mut maps = Vec::with_capacity(PRIMARIES.len());
        for (p, prim) in PRIMARIES.iter().enumerate() {
            let fine = match self.kind {
                FluxBinningKind::TwoDim => self.compute_2d(p, prim, &eval_binning)?,
                FluxBinningKind::ThreeDim => self.compute_3d(p, prim, &eval_binning)?,
            };
            let mut map = if factors.iter().all(|&f| f == 1) {
                fine
            } else {
                fine.downsample(&factors)?
            };
            map.binning = self.binning.clone();
            maps.push(map);
        }
        let mut maps = MapSet::new(maps);

        let nue_numu_ratio = params.dimensionless("nue_numu_ratio")?;
        let nu_nubar_ratio = params.dimensionless("nu_nubar_ratio")?;
        let delta_index = params.dimensionless("atm_delta_index")?;
        if nue_numu_ratio != 1.0 {
            apply_ratio_pair(&mut maps, ("nue", "numu"), nue_numu_ratio)?;
            apply_ratio_pair(&mut maps, ("nuebar", "numubar"), nue_numu_ratio)?;
        }
        if nu_nubar_ratio != 1.0 {
            apply_ratio_pair(&mut maps, ("nue", "nuebar"), nu_nubar_ratio)?;
            apply_ratio_pair(&mut maps, ("numu", "numubar"), nu_nubar_ratio)?;
        }
        if delta_index != 0.0 {
            let energies = energy_in_gev(self.binning.dim(TRUE_ENERGY)?)?.weighted_centers();
            for flav in ["numu", "numubar"] {
                apply_delta_index(maps.get_mut(flav)?, &energies, delta_index)?;
            }
        }
        Ok(maps)
    }

    /// Raw flux (per GeV sr) on the outer product of energies and cos(zenith)
    /// values, as `[energy][coszen]`.
    fn evaluate_node(
        &self,
        primary: usize,
        azimuth: usize,
        energies: &[f64],
        coszen: &[f64],
    ) -> Result<Vec<Vec<f64>>, SplineError> {
        match &self.splines[primary][azimuth] {
            NodeSplines::Bisplrep(spline) => {
                let log_e: Vec<f64> = energies.iter().map(|e| e.log10()).collect();
                let mut grid = spline.evaluate_grid(&log_e, coszen);
                grid.iter_mut()
                    .flat_map(|row| row.iter_mut())
                    .for_each(|v| *v = 10f64.powf(*v));
                Ok(grid)
            }
            NodeSplines::IntegralPreserving(rows) => {
                let cz_edges = linspace(-1.0, 1.0, NUM_COSZEN_NODES + 1);

                #[cfg(not(feature = "parallel"))]
                let iterator = energies.iter();

                #[cfg(feature = "parallel")]
                let iterator = energies.par_iter();

                iterator
                    .map(|&energy| -> Result<Vec<f64>, SplineError> {
                        let log_e = energy.log10();
                        let mut running = Vec::with_capacity(rows.len() + 1);
                        running.push(0.0);
                        let mut total = 0.0;
                        for row in rows {
                            total += row.derivative(log_e) * self.log_energy_width;
                            running.push(total);
                        }
                        let spline = CubicSpline1D::new(&cz_edges, &running)?;
                        Ok(coszen
                            .iter()
                            .map(|&cz| spline.derivative(cz) * COSZEN_WIDTH / energy)
                            .collect())
                    })
                    .collect()
            }
        }
    }

    fn compute_2d(
        &self,
        primary: usize,
        name: &str,
        binning: &MultiDimBinning,
    ) -> Result<Map, StageError> {
        let energy = energy_in_gev(binning.dim(TRUE_ENERGY)?)?;
        let coszen = binning.dim(TRUE_COSZEN)?;
        let table = self.evaluate_node(
            primary,
            0,
            &energy.weighted_centers(),
            &coszen.weighted_centers(),
        )?;

        let e_axis = binning.index_of(TRUE_ENERGY)?;
        let cz_axis = binning.index_of(TRUE_COSZEN)?;
        let e_widths = energy.bin_widths();
        let cz_widths = coszen.bin_widths();
        let hist = (0..binning.size())
            .map(|flat| {
                let idx = binning.unravel(flat);
                let (ie, icz) = (idx[e_axis], idx[cz_axis]);
                table[ie][icz] * e_widths[ie] * cz_widths[icz] * 2.0 * PI
            })
            .collect();
        Ok(Map::new(name, hist, binning.clone())?)
    }

    fn compute_3d(
        &self,
        primary: usize,
        name: &str,
        binning: &MultiDimBinning,
    ) -> Result<Map, StageError> {
        let energy = energy_in_gev(binning.dim(TRUE_ENERGY)?)?;
        let coszen = binning.dim(TRUE_COSZEN)?;
        let azimuth = converted(binning.dim(TRUE_AZIMUTH)?, Unit::radian(), &Unit::radian())?;
        let e_centers = energy.weighted_centers();
        let cz_centers = coszen.weighted_centers();

        let node_tables = (0..self.azimuth_nodes.len())
            .map(|iaz| self.evaluate_node(primary, iaz, &e_centers, &cz_centers))
            .collect::<Result<Vec<_>, _>>()?;
        let az_weights: Vec<(usize, usize, f64)> = azimuth
            .weighted_centers()
            .iter()
            .map(|rad| periodic_neighbours(&self.azimuth_nodes, rad.to_degrees()))
            .collect();

        let e_axis = binning.index_of(TRUE_ENERGY)?;
        let cz_axis = binning.index_of(TRUE_COSZEN)?;
        let az_axis = binning.index_of(TRUE_AZIMUTH)?;
        let e_widths = energy.bin_widths();
        let cz_widths = coszen.bin_widths();
        let az_widths = azimuth.bin_widths();
        let hist = (0..binning.size())
            .map(|flat| {
                let idx = binning.unravel(flat);
                let (ie, icz, iaz) = (idx[e_axis], idx[cz_axis], idx[az_axis]);
                let (lo, hi, frac) = az_weights[iaz];
                let flux = (1.0 - frac) * node_tables[lo][ie][icz] + frac * node_tables[hi][ie][icz];
                flux * e_widths[ie] * cz_widths[icz] * az_widths[iaz]
            })
            .collect();
        Ok(Map::new(name, hist, binning.clone())?)
    }
}

/// Checks that the table file fits the requested binning.
pub fn validate_flux_file(path: &Path, kind: FluxBinningKind) -> Result<(), StageError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !file_name.contains("honda") {
        return Err(StageError::InvalidConfig(format!(
            "flux file '{file_name}' is not a Honda table (name must contain 'honda')"
        )));
    }
    let azimuth_averaged = file_name.contains("aa");
    match kind {
        FluxBinningKind::TwoDim if !azimuth_averaged => Err(StageError::InvalidConfig(format!(
            "energy/coszen binning requires an azimuth-averaged ('aa') table, got '{file_name}'"
        ))),
        FluxBinningKind::ThreeDim if azimuth_averaged => Err(StageError::InvalidConfig(format!(
            "azimuth binning requires a table that is not azimuth-averaged, got '{file_name}'"
        ))),
        _ => Ok(()),
    }
}

/// Ratio systematic preserving `map1 + map2` bin by bin while scaling
/// `map1 / map2` by `ratio_scale`. Bins with an empty `map2` are untouched.
pub fn apply_ratio_scale(map1: &Map, map2: &Map, ratio_scale: f64) -> Result<(Map, Map), StageError> {
    let sum = map1.add(map2)?;
    let mut scaled1 = map1.clone();
    let mut scaled2 = map2.clone();
    for (i, (&o1, &o2)) in map1.hist.iter().zip(&map2.hist).enumerate() {
        if o2 == 0.0 {
            continue;
        }
        let ratio = o1 / o2;
        let s2 = sum.hist[i] / (1.0 + ratio_scale * ratio);
        scaled2.hist[i] = s2;
        scaled1.hist[i] = ratio_scale * ratio * s2;
    }
    Ok((scaled1, scaled2))
}

fn apply_ratio_pair(maps: &mut MapSet, pair: (&str, &str), ratio: f64) -> Result<(), StageError> {
    let (scaled1, scaled2) = apply_ratio_scale(maps.get(pair.0)?, maps.get(pair.1)?, ratio)?;
    maps.replace(scaled1)?;
    maps.replace(scaled2)?;
    Ok(())
}

/// Tilts the spectrum by `(E / E_median)^delta_index` and restores the total.
pub fn apply_delta_index(map: &mut Map, energies: &[f64], delta_index: f64) -> Result<(), StageError> {
    let Some(&median) = energies.get(energies.len() / 2) else {
        return Ok(());
    };
    let original_total = map.sum();
    let scale: Vec<f64> = energies
        .iter()
        .map(|e| (e / median).powf(delta_index))
        .collect();
    map.scale_along(TRUE_ENERGY, &scale)?;
    let scaled_total = map.sum();
    if scaled_total != 0.0 {
        let norm = original_total / scaled_total;
        map.hist.iter_mut().for_each(|v| *v *= norm);
    } else {
        warn!(map = %map.name, "Flux map sums to zero; skipping renormalisation");
    }
    Ok(())
}

fn bisplrep_node(
    log_energy: &[f64],
    coszen: &[f64],
    cz_rows: &[Vec<f64>],
) -> Result<NodeSplines, StageError> {
    let mut values = vec![vec![0.0; coszen.len()]; log_energy.len()];
    for (icz, row) in cz_rows.iter().enumerate() {
        for (ie, &flux) in row.iter().enumerate() {
            if flux <= 0.0 {
                return Err(StageError::InvalidConfig(
                    "non-positive flux cannot be splined in log space".to_string(),
                ));
            }
            values[ie][icz] = flux.log10();
        }
    }
    Ok(NodeSplines::Bisplrep(GridSpline2D::new(
        log_energy, coszen, &values,
    )?))
}

fn integral_node(
    edges: &[f64],
    energy: &[f64],
    cz_rows: &[Vec<f64>],
) -> Result<NodeSplines, StageError> {
    // File order is descending in cos(zenith).
    let splines = cz_rows
        .iter()
        .rev()
        .map(|row| {
            let mut running = Vec::with_capacity(row.len() + 1);
            let mut total = 0.0;
            running.push(total);
            for (flux, e) in row.iter().zip(energy) {
                total += flux * e;
                running.push(total);
            }
            CubicSpline1D::new(edges, &running)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(NodeSplines::IntegralPreserving(splines))
}

/// Common spacing of `nodes`, if they are (nearly) uniformly spaced.
fn uniform_width(nodes: &[f64]) -> Option<f64> {
    if nodes.len() < 2 {
        return None;
    }
    let width = (nodes[nodes.len() - 1] - nodes[0]) / (nodes.len() - 1) as f64;
    let uniform = nodes
        .iter()
        .tuple_windows()
        .all(|(a, b)| ((b - a) - width).abs() <= LOG_ENERGY_UNIFORMITY_TOLERANCE * width);
    (uniform && width > 0.0).then_some(width)
}

/// Bracketing node indices and interpolation fraction for a periodic axis of
/// evenly spaced nodes in degrees.
fn periodic_neighbours(nodes: &[f64], angle_deg: f64) -> (usize, usize, f64) {
    let n = nodes.len();
    if n < 2 {
        return (0, 0, 0.0);
    }
    let step = 360.0 / n as f64;
    let position = (angle_deg - nodes[0]).rem_euclid(360.0) / step;
    let lo = (position.floor() as usize) % n;
    (lo, (lo + 1) % n, position - position.floor())
}

fn converted(dim: &OneDimBinning, default: Unit, target: &Unit) -> Result<OneDimBinning, StageError> {
    let unit = match &dim.unit {
        Some(u) => Unit::parse(u)?,
        None => default,
    };
    let factor = Quantity::new(1.0, unit).m_as(target)?;
    let mut out = dim.clone();
    out.edges.iter_mut().for_each(|e| *e *= factor);
    out.unit = Some(target.name().to_string());
    Ok(out)
}

fn energy_in_gev(dim: &OneDimBinning) -> Result<OneDimBinning, StageError> {
    converted(dim, Unit::gev(), &Unit::gev())
}

fn oversampling_factor(params: &ParamSet, name: &'static str) -> Result<usize, StageError> {
    let value = params.dimensionless(name)?;
    if value < 1.0 || value.fract() != 0.0 {
        return Err(StageError::InvalidConfig(format!(
            "{name} must be a positive integer, got {value}"
        )));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::config::HondaConfigBuilder;
    use std::fmt::Write as _;
    use tempfile::tempdir;

    const TOLERANCE: f64 = 1e-5;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() <= TOLERANCE * a.abs().max(b.abs()).max(1e-300)
    }

    /// Per-primary normalisations of the synthetic `c / E` flux.
    const NORMS: [f64; 4] = [4.0, 3.0, 2.0, 1.0];

    fn table_energies() -> Vec<f64> {
        (0..=20).map(|k| 10f64.powf(-1.0 + 0.05 * k as f64)).collect()
    }

    fn synthetic_table(num_azimuth: usize, flux: impl Fn(usize, f64, f64) -> f64) -> String {
        let mut out = String::new();
        for cz in linspace(0.95, -0.95, NUM_COSZEN_NODES) {
            for _ in 0..num_azimuth {
                writeln!(out, "average flux in [cosZ = {:.2}]", cz).unwrap();
                writeln!(out, " Enu(GeV)   NuMu   NuMubar   NuE   NuEbar").unwrap();
                for e in table_energies() {
                    write!(out, "{e:.6e}").unwrap();
                    for p in 0..4 {
                        write!(out, " {:.10e}", flux(p, e, cz)).unwrap();
                    }
                    writeln!(out).unwrap();
                }
            }
        }
        out
    }

    fn params() -> ParamSet {
        let mut p = ParamSet::new();
        for (name, value) in [
            ("atm_delta_index", 0.0),
            ("energy_scale", 1.0),
            ("nu_nubar_ratio", 1.0),
            ("nue_numu_ratio", 1.0),
            ("oversample_e", 1.0),
            ("oversample_cz", 1.0),
        ] {
            p.set(name, Quantity::dimensionless(value));
        }
        p
    }

    fn binning_2d() -> MultiDimBinning {
        MultiDimBinning::new(vec![
            OneDimBinning::logarithmic(TRUE_ENERGY, 0.2, 5.0, 6).unwrap(),
            OneDimBinning::linear(TRUE_COSZEN, -1.0, 1.0, 8).unwrap(),
        ])
        .unwrap()
    }

    fn service(mode: FluxMode, table: &str, name: &str, binning: MultiDimBinning) -> HondaFlux {
        let dir = tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, table).unwrap();
        let config = HondaConfigBuilder::new()
            .flux_file(path)
            .flux_mode(mode)
            .build()
            .unwrap();
        HondaFlux::new(config, binning).unwrap()
    }

    #[test]
    fn parse_skips_headers_and_splits_blocks() {
        let text = synthetic_table(1, |p, e, _| NORMS[p] / e);
        let table = HondaTable::parse(&text, FluxBinningKind::TwoDim).unwrap();
        assert_eq!(table.energy.len(), 21);
        assert_eq!(table.coszen[0], 0.95);
        assert_eq!(table.flux.len(), 4);
        assert_eq!(table.flux[0][0].len(), NUM_COSZEN_NODES);
        assert!(f64_approx_equal(table.flux[2][0][3][0], 2.0 / table.energy[0]));
    }

    #[test]
    fn parse_rejects_incomplete_tables() {
        let text = "1.0 1 2 3 4\n2.0 1 2 3 4\n";
        assert!(HondaTable::parse(text, FluxBinningKind::TwoDim).is_err());
        assert!(HondaTable::parse("1.0 2.0 3.0\n", FluxBinningKind::TwoDim).is_err());
    }

    #[test]
    fn validate_flux_file_checks_name_against_binning() {
        let two = FluxBinningKind::TwoDim;
        let three = FluxBinningKind::ThreeDim;
        assert!(validate_flux_file(Path::new("honda-2015-spl-solmax-aa.d"), two).is_ok());
        assert!(validate_flux_file(Path::new("honda-2015-spl-solmax.d"), two).is_err());
        assert!(validate_flux_file(Path::new("honda-2015-spl-solmax.d"), three).is_ok());
        assert!(validate_flux_file(Path::new("honda-2015-spl-solmax-aa.d"), three).is_err());
        assert!(validate_flux_file(Path::new("bartol-aa.d"), two).is_err());
    }

    #[test]
    fn integral_preserving_reproduces_inverse_energy_flux() {
        let text = synthetic_table(1, |p, e, _| NORMS[p] / e);
        let binning = binning_2d();
        let flux = service(FluxMode::IntegralPreserving, &text, "honda-test-aa.d", binning.clone());
        let maps = flux.compute_outputs(&params()).unwrap();
        assert_eq!(maps.names(), vec!["numu", "numubar", "nue", "nuebar"]);

        let energies = binning.dims[0].weighted_centers();
        let volumes = binning.bin_volumes();
        let numu = maps.get("numu").unwrap();
        for (flat, &value) in numu.hist.iter().enumerate() {
            let ie = binning.unravel(flat)[0];
            let expected = 4.0 / energies[ie] * volumes[flat] * 2.0 * PI;
            assert!(f64_approx_equal(value, expected), "bin {flat}: {value} vs {expected}");
        }
    }

    #[test]
    fn bisplrep_interpolates_power_law() {
        let text = synthetic_table(1, |p, e, cz| NORMS[p] * e.powf(-2.7) * (1.2 + 0.1 * cz));
        let binning = binning_2d();
        let flux = service(FluxMode::Bisplrep, &text, "honda-test-aa.d", binning.clone());
        let maps = flux.compute_outputs(&params()).unwrap();

        let energies = binning.dims[0].weighted_centers();
        let coszen = binning.dims[1].weighted_centers();
        let volumes = binning.bin_volumes();
        let nuebar = maps.get("nuebar").unwrap();
        for (flat, &value) in nuebar.hist.iter().enumerate() {
            let idx = binning.unravel(flat);
            let expected = energies[idx[0]].powf(-2.7)
                * (1.2 + 0.1 * coszen[idx[1]])
                * volumes[flat]
                * 2.0
                * PI;
            assert!((value - expected).abs() < 1e-4 * expected);
        }
    }

    #[test]
    fn output_follows_binning_dimension_order() {
        let text = synthetic_table(1, |p, e, _| NORMS[p] / e);
        let swapped = MultiDimBinning::new(vec![
            OneDimBinning::linear(TRUE_COSZEN, -1.0, 1.0, 8).unwrap(),
            OneDimBinning::logarithmic(TRUE_ENERGY, 0.2, 5.0, 6).unwrap(),
        ])
        .unwrap();
        let a = service(FluxMode::IntegralPreserving, &text, "honda-x-aa.d", binning_2d())
            .compute_outputs(&params())
            .unwrap();
        let b = service(FluxMode::IntegralPreserving, &text, "honda-x-aa.d", swapped)
            .compute_outputs(&params())
            .unwrap();
        let a = &a.get("nue").unwrap().hist;
        let b = &b.get("nue").unwrap().hist;
        // a is [energy][coszen], b is [coszen][energy]
        assert!(f64_approx_equal(a[2 * 8 + 5], b[5 * 6 + 2]));
    }

    #[test]
    fn oversampling_keeps_shape_and_integral() {
        let text = synthetic_table(1, |p, e, _| NORMS[p] / e);
        let flux = service(FluxMode::IntegralPreserving, &text, "honda-t-aa.d", binning_2d());
        let nominal = flux.compute_outputs(&params()).unwrap();
        let mut p = params();
        p.set("oversample_e", Quantity::dimensionless(3.0));
        p.set("oversample_cz", Quantity::dimensionless(2.0));
        let over = flux.compute_outputs(&p).unwrap();
        let (a, b) = (nominal.get("numu").unwrap(), over.get("numu").unwrap());
        assert_eq!(a.hist.len(), b.hist.len());
        assert_eq!(a.binning, b.binning);
        // Midpoint evaluation of c / E over wide log bins is off by about 1%.
        assert!((a.sum() - b.sum()).abs() < 2e-2 * a.sum());

        p.set("oversample_e", Quantity::dimensionless(1.5));
        assert!(matches!(
            flux.compute_outputs(&p),
            Err(StageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn ratio_scale_preserves_sum_and_scales_ratio() {
        let b = binning_2d();
        let n = b.size();
        let m1 = Map::new("nue", vec![2.0; n], b.clone()).unwrap();
        let mut h2 = vec![4.0; n];
        h2[0] = 0.0;
        let m2 = Map::new("numu", h2, b).unwrap();
        let (s1, s2) = apply_ratio_scale(&m1, &m2, 1.5).unwrap();
        assert!(f64_approx_equal(s1.hist[1] + s2.hist[1], 6.0));
        assert!(f64_approx_equal(s1.hist[1] / s2.hist[1], 1.5 * 0.5));
        assert_eq!((s1.hist[0], s2.hist[0]), (2.0, 0.0));
    }

    #[test]
    fn systematics_apply_in_sequence_and_keep_names() {
        let text = synthetic_table(1, |p, e, _| NORMS[p] / e);
        let flux = service(FluxMode::IntegralPreserving, &text, "honda-s-aa.d", binning_2d());
        let nominal = flux.compute_outputs(&params()).unwrap();

        let mut p = params();
        p.set("nue_numu_ratio", Quantity::dimensionless(1.1));
        p.set("atm_delta_index", Quantity::dimensionless(0.2));
        let shifted = flux.compute_outputs(&p).unwrap();
        assert_eq!(shifted.names(), nominal.names());

        let total = |set: &MapSet| set.iter().map(Map::sum).sum::<f64>();
        assert!(f64_approx_equal(total(&nominal), total(&shifted)));

        // The delta index rescales numu after the ratio, so only nue is compared.
        assert!(shifted.get("nue").unwrap().hist[0] > nominal.get("nue").unwrap().hist[0]);

        let numu = shifted.get("numu").unwrap();
        let first = numu.hist[0];
        let last = numu.hist[numu.hist.len() - 1];
        let nominal_numu = nominal.get("numu").unwrap();
        assert!(last / first > nominal_numu.hist[nominal_numu.hist.len() - 1] / nominal_numu.hist[0]);
    }

    #[test]
    fn azimuth_resolved_tables_integrate_to_azimuth_averaged_flux() {
        let text_3d = synthetic_table(NUM_AZIMUTH_NODES, |p, e, _| NORMS[p] / e);
        let text_2d = synthetic_table(1, |p, e, _| NORMS[p] / e);
        let binning_3d = MultiDimBinning::new(vec![
            OneDimBinning::logarithmic(TRUE_ENERGY, 0.2, 5.0, 6).unwrap(),
            OneDimBinning::linear(TRUE_COSZEN, -1.0, 1.0, 8).unwrap(),
            OneDimBinning::linear(TRUE_AZIMUTH, 0.0, 2.0 * PI, 5).unwrap(),
        ])
        .unwrap();
        let flux_3d = service(FluxMode::IntegralPreserving, &text_3d, "honda-3d.d", binning_3d)
            .compute_outputs(&params())
            .unwrap();
        let flux_2d = service(FluxMode::IntegralPreserving, &text_2d, "honda-2d-aa.d", binning_2d())
            .compute_outputs(&params())
            .unwrap();
        assert!(f64_approx_equal(
            flux_3d.get("numu").unwrap().sum(),
            flux_2d.get("numu").unwrap().sum()
        ));
    }

    #[test]
    fn periodic_neighbours_wrap_around() {
        let nodes = linspace(15.0, 345.0, 12);
        assert_eq!(periodic_neighbours(&nodes, 30.0), (0, 1, 0.5));
        let (lo, hi, frac) = periodic_neighbours(&nodes, 0.0);
        assert_eq!((lo, hi), (11, 0));
        assert!(f64_approx_equal(frac, 0.5));
    }
}
