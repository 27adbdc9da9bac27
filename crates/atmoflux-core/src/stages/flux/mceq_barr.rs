//! Inclusive neutrino flux from MCEq spline tables with Barr-scheme meson
//! production uncertainties.
//!
//! The table holds, for every gradient (a Barr region and a meson sign), the
//! nominal flux splines (`numu`, `nue`, ...) and the flux gradients with
//! respect to that production parameter (`dnumu`, `dnue`, ...), all as
//! functions of (|cos zenith|, ln E/GeV). The modified flux is
//! `nominal · (E / E_pivot)^Δγ + Σ gradient · parameter`, clipped at zero.

use crate::core::container::{Container, ContainerSet, Field};
use crate::core::spline::GridSpline2D;
use crate::core::units::Unit;
use crate::stages::config::MceqBarrConfig;
use crate::stages::{ParamSet, Stage, StageError};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const BARR_PARAM_NAMES: [&str; 13] = [
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "w", "x", "y", "z",
];
/// `+` for the meson, `-` for the antimeson.
pub const BARR_PARAM_SIGNS: [&str; 2] = ["+", "-"];
const PION_PARAM_NAMES: [&str; 9] = ["a", "b", "c", "d", "e", "f", "g", "h", "i"];
const KAON_PARAM_NAMES: [&str; 4] = ["w", "x", "y", "z"];

pub const EXPECTED_PARAMS: [&str; 20] = [
    "pion_ratio",
    "barr_a_Pi",
    "barr_b_Pi",
    "barr_c_Pi",
    "barr_d_Pi",
    "barr_e_Pi",
    "barr_f_Pi",
    "barr_g_Pi",
    "barr_h_Pi",
    "barr_i_Pi",
    "barr_w_K",
    "barr_x_K",
    "barr_y_K",
    "barr_z_K",
    "barr_w_antiK",
    "barr_x_antiK",
    "barr_y_antiK",
    "barr_z_antiK",
    "delta_index",
    "energy_pivot",
];

/// Gradient names in table order: `a+`, `a-`, `b+`, ... `z-`.
pub fn gradient_param_names() -> Vec<String> {
    BARR_PARAM_NAMES
        .iter()
        .flat_map(|n| BARR_PARAM_SIGNS.iter().map(move |s| format!("{n}{s}")))
        .collect()
}

/// Antipion Barr parameter implied by the pion one and the pi+/pi- ratio
/// shift (both given as deviations from nominal).
pub fn antipion_production(barr_var: f64, pion_ratio: f64) -> f64 {
    (1.0 + barr_var) / (1.0 + pion_ratio) - 1.0
}

pub fn spectral_index_scale(true_energy: f64, energy_pivot: f64, delta_index: f64) -> f64 {
    (true_energy / energy_pivot).powf(delta_index)
}

/// Flux of one event for all flavours.
///
/// `gradients` is flavour-major: `gradients[f * n_params + c]`.
pub fn apply_sys_kernel(
    true_energy: f64,
    delta_index: f64,
    energy_pivot: f64,
    nominal: &[f64],
    gradients: &[f64],
    gradient_params: &[f64],
    out: &mut [f64],
) {
    let scale = spectral_index_scale(true_energy, energy_pivot, delta_index);
    let n_params = gradient_params.len();
    for (f, value) in out.iter_mut().enumerate() {
        let shift: f64 = gradients[f * n_params..(f + 1) * n_params]
            .iter()
            .zip(gradient_params)
            .map(|(g, p)| g * p)
            .sum();
        *value = (nominal[f] * scale + shift).max(0.0);
    }
}

#[derive(Debug, Deserialize)]
struct TableFile {
    abs_coszen: Vec<f64>,
    log_energy: Vec<f64>,
    splines: BTreeMap<String, BTreeMap<String, Vec<Vec<f64>>>>,
}

/// Splines per gradient name and flux key.
#[derive(Debug, Clone)]
pub struct MceqTable {
    splines: BTreeMap<String, BTreeMap<String, GridSpline2D>>,
}

impl MceqTable {
    /// Reads a JSON table, gunzipping it first when the name ends in `.gz`.
    pub fn load(path: &Path) -> Result<Self, StageError> {
        info!("Loading MCEq spline tables from {}", path.display());
        let file = File::open(path).map_err(|source| StageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let gzipped = path.extension().is_some_and(|ext| ext == "gz");
        let reader: Box<dyn Read> = if gzipped {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let raw: TableFile = serde_json::from_reader(reader).map_err(|source| StageError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw).map_err(|message| StageError::Table {
            path: path.to_path_buf(),
            message,
        })
    }

    fn from_raw(raw: TableFile) -> Result<Self, String> {
        let missing: Vec<String> = gradient_param_names()
            .into_iter()
            .filter(|n| !raw.splines.contains_key(n))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing gradient entries {missing:?}"));
        }
        let mut splines = BTreeMap::new();
        for (gradient, grids) in raw.splines {
            let mut per_key = BTreeMap::new();
            for (key, values) in grids {
                let spline = GridSpline2D::new(&raw.abs_coszen, &raw.log_energy, &values)
                    .map_err(|e| format!("spline '{key}' of gradient '{gradient}': {e}"))?;
                per_key.insert(key, spline);
            }
            splines.insert(gradient, per_key);
        }
        Ok(Self { splines })
    }

    pub fn spline(&self, gradient: &str, key: &str) -> Result<&GridSpline2D, StageError> {
        self.splines
            .get(gradient)
            .and_then(|m| m.get(key))
            .ok_or_else(|| {
                StageError::InvalidConfig(format!(
                    "MCEq table has no '{key}' spline for gradient '{gradient}'"
                ))
            })
    }
}

/// MCEq flux stage with Barr systematics.
pub struct MceqBarr {
    config: MceqBarrConfig,
    params: ParamSet,
    gradient_names: Vec<String>,
    table: Option<MceqTable>,
}

impl MceqBarr {
    pub fn new(config: MceqBarrConfig, params: ParamSet) -> Result<Self, StageError> {
        params.require_exactly("mceq_barr", &EXPECTED_PARAMS)?;
        Ok(Self {
            config,
            params,
            gradient_names: gradient_param_names(),
            table: None,
        })
    }

    /// Uses an already loaded table instead of reading `table_file` at setup.
    pub fn with_table(mut self, table: MceqTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn set_params(&mut self, params: ParamSet) -> Result<(), StageError> {
        params.require_exactly("mceq_barr", &EXPECTED_PARAMS)?;
        self.params = params;
        Ok(())
    }

    fn num_flavours(&self) -> usize {
        if self.config.include_nutau_flux { 3 } else { 2 }
    }

    fn flavour_keys(&self) -> &'static [&'static str] {
        if self.config.include_nutau_flux {
            &["e", "mu", "tau"]
        } else {
            &["e", "mu"]
        }
    }

    /// Gradient parameter values in `gradient_names` order.
    pub fn gradient_params(&self) -> Result<Vec<f64>, StageError> {
        let pion_ratio = self.params.dimensionless("pion_ratio")?;
        let mut mapping = BTreeMap::new();
        for n in PION_PARAM_NAMES {
            let value = self.params.dimensionless(&format!("barr_{n}_Pi"))?;
            mapping.insert(format!("{n}+"), value);
            mapping.insert(format!("{n}-"), antipion_production(value, pion_ratio));
        }
        for n in KAON_PARAM_NAMES {
            mapping.insert(format!("{n}+"), self.params.dimensionless(&format!("barr_{n}_K"))?);
            mapping.insert(
                format!("{n}-"),
                self.params.dimensionless(&format!("barr_{n}_antiK"))?,
            );
        }
        self.gradient_names
            .iter()
            .map(|name| {
                mapping.get(name).copied().ok_or_else(|| {
                    StageError::InvalidConfig(format!(
                        "Gradient parameter '{name}' missing from mapping"
                    ))
                })
            })
            .collect()
    }

    fn setup_container(&self, table: &MceqTable, container: &mut Container) -> Result<(), StageError> {
        let n = container.size();
        let flavours = self.num_flavours();
        let n_gradients = self.gradient_names.len();
        let abs_coszen: Vec<f64> = container
            .column("true_coszen")?
            .iter()
            .map(|c| c.abs())
            .collect();
        let log_energy: Vec<f64> = container
            .column("true_energy")?
            .iter()
            .map(|e| e.ln())
            .collect();
        let suffix = if container.aux("nubar")? > 0 { "" } else { "bar" };

        if !self.config.use_honda_nominal_flux {
            let mut nominal = Field::filled(n, flavours, f64::NAN);
            let reference = &self.gradient_names[0];
            for (f, flav) in self.flavour_keys().iter().enumerate() {
                let spline = table.spline(reference, &format!("nu{flav}{suffix}"))?;
                let values = evaluate_events(spline, &abs_coszen, &log_energy);
                for (event, v) in values.into_iter().enumerate() {
                    nominal.row_mut(event)[f] = v;
                }
            }
            container.insert("nu_flux_nominal", nominal)?;
            container.mark_changed("nu_flux_nominal");
        }

        let mut gradients = Field::filled(n, flavours * n_gradients, f64::NAN);
        for (c, gradient) in self.gradient_names.iter().enumerate() {
            for (f, flav) in self.flavour_keys().iter().enumerate() {
                let spline = table.spline(gradient, &format!("dnu{flav}{suffix}"))?;
                let values = evaluate_events(spline, &abs_coszen, &log_energy);
                for (event, v) in values.into_iter().enumerate() {
                    gradients.row_mut(event)[f * n_gradients + c] = v;
                }
            }
        }
        container.insert("gradients", gradients)?;
        container.mark_changed("gradients");

        container.insert("nu_flux", Field::filled(n, flavours, f64::NAN))?;
        Ok(())
    }
}

impl Stage for MceqBarr {
    fn name(&self) -> &str {
        "mceq_barr"
    }

    #[instrument(skip_all, name = "mceq_barr_setup")]
    fn setup(&mut self, data: &mut ContainerSet) -> Result<(), StageError> {
        let table = match self.table.take() {
            Some(table) => table,
            None => MceqTable::load(&self.config.table_file)?,
        };
        let result = data.iter_mut().try_for_each(|container| {
            debug!(container = %container.name, events = container.size(), "Evaluating MCEq splines");
            self.setup_container(&table, container)
        });
        self.table = Some(table);
        result
    }

    #[instrument(skip_all, name = "mceq_barr_compute")]
    fn compute(&mut self, data: &mut ContainerSet) -> Result<(), StageError> {
        let delta_index = self.params.dimensionless("delta_index")?;
        let energy_pivot = self.params.m_as("energy_pivot", &Unit::gev())?;
        let gradient_params = self.gradient_params()?;
        let flavours = self.num_flavours();

        for container in data.iter_mut() {
            let nominal_key = if self.config.use_honda_nominal_flux && container.aux("nubar")? < 0 {
                "nubar_flux_nominal"
            } else {
                "nu_flux_nominal"
            };
            let nominal = container.get(nominal_key)?;
            if nominal.width != flavours {
                return Err(StageError::InvalidConfig(format!(
                    "'{nominal_key}' in container '{}' has {} flavours, expected {flavours}",
                    container.name, nominal.width
                )));
            }
            let gradients = container.get("gradients")?;
            let energies = container.column("true_energy")?;

            let mut flux = Field::filled(container.size(), flavours, 0.0);
            for (event, out) in flux.data.chunks_mut(flavours).enumerate() {
                apply_sys_kernel(
                    energies[event],
                    delta_index,
                    energy_pivot,
                    nominal.row(event),
                    gradients.row(event),
                    &gradient_params,
                    out,
                );
            }
            container.insert("nu_flux", flux)?;
            container.mark_changed("nu_flux");
        }
        Ok(())
    }
}

fn evaluate_events(
    spline: &GridSpline2D,
    abs_coszen: &[f64],
    log_energy: &[f64],
) -> Vec<f64> {
    #[cfg(not(feature = "parallel"))]
    let iterator = abs_coszen.iter().zip(log_energy.iter());

    #[cfg(feature = "parallel")]
    let iterator = abs_coszen.par_iter().zip(log_energy.par_iter());

    iterator
        .map(|(&cz, &le)| spline.evaluate(cz, le))
        .collect()
}
