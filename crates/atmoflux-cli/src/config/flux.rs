use super::{ParamTable, ParamValue, param_set, parse_set_value, split_set_value, unsupported_key};
use crate::cli::FluxArgs;
use crate::error::{CliError, Result};
use atmoflux::core::binning::{MultiDimBinning, OneDimBinning};
use atmoflux::stages::ParamSet;
use atmoflux::stages::config::{ConfigError, FluxMode, HondaConfig, HondaConfigBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialHondaConfig {
    file: Option<PathBuf>,
    mode: Option<String>,
    smoothing: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
enum BinSpacing {
    Linear,
    Log,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialDimension {
    name: String,
    spacing: Option<BinSpacing>,
    range: Option<(f64, f64)>,
    num_bins: Option<usize>,
    edges: Option<Vec<f64>>,
    units: Option<String>,
}

impl PartialDimension {
    fn build(&self) -> Result<OneDimBinning> {
        let spacing = self.spacing.unwrap_or(BinSpacing::Linear);
        let binning = match (&self.edges, self.range, self.num_bins) {
            (Some(edges), None, None) => {
                OneDimBinning::from_edges(&self.name, edges.clone(), spacing == BinSpacing::Log)
            }
            (None, Some((lo, hi)), Some(n)) => match spacing {
                BinSpacing::Linear => OneDimBinning::linear(&self.name, lo, hi, n),
                BinSpacing::Log => OneDimBinning::logarithmic(&self.name, lo, hi, n),
            },
            _ => {
                return Err(CliError::Config(format!(
                    "Binning '{}' needs either `edges` or both `range` and `num-bins`.",
                    self.name
                )));
            }
        }
        .map_err(|e| CliError::Config(e.to_string()))?;
        Ok(match &self.units {
            Some(units) => binning.with_unit(units),
            None => binning,
        })
    }
}

/// Contents of a `flux` command configuration file.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialFluxConfig {
    flux: Option<PartialHondaConfig>,
    #[serde(default)]
    params: ParamTable,
    #[serde(default)]
    binning: Vec<PartialDimension>,
}

/// Everything the flux-maps workflow needs.
#[derive(Debug)]
pub struct FluxSetup {
    pub honda: HondaConfig,
    pub params: ParamSet,
    pub binning: MultiDimBinning,
}

impl PartialFluxConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        super::load_toml(path)
    }

    pub fn merge_with_cli(mut self, args: &FluxArgs) -> Result<FluxSetup> {
        self.apply_set_values(&args.set_values)?;

        let flux = self.flux.take().unwrap_or_default();
        let mode: FluxMode = flux
            .mode
            .as_deref()
            .ok_or_else(|| CliError::Config("`flux.mode` is required.".to_string()))?
            .parse()
            .map_err(|e: ConfigError| CliError::Config(e.to_string()))?;
        let mut builder = HondaConfigBuilder::new().flux_mode(mode);
        if let Some(file) = flux.file {
            builder = builder.flux_file(file);
        }
        if let Some(smoothing) = flux.smoothing {
            builder = builder.smoothing(smoothing);
        }
        let honda = builder.build().map_err(|e| CliError::Config(e.to_string()))?;

        if self.binning.is_empty() {
            return Err(CliError::Config(
                "At least one `[[binning]]` dimension is required.".to_string(),
            ));
        }
        let dims = self
            .binning
            .iter()
            .map(PartialDimension::build)
            .collect::<Result<Vec<_>>>()?;
        let binning = MultiDimBinning::new(dims).map_err(|e| CliError::Config(e.to_string()))?;

        Ok(FluxSetup {
            honda,
            params: param_set(&self.params)?,
            binning,
        })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let (key, value) = split_set_value(kv_pair)?;
            match key {
                "flux.file" => {
                    self.flux.get_or_insert_with(Default::default).file = Some(PathBuf::from(value));
                }
                "flux.mode" => {
                    self.flux.get_or_insert_with(Default::default).mode = Some(value.to_string());
                }
                "flux.smoothing" => {
                    self.flux.get_or_insert_with(Default::default).smoothing =
                        Some(parse_set_value(key, value, "float")?);
                }
                _ => match key.strip_prefix("params.") {
                    Some(name) if !name.is_empty() => {
                        self.params
                            .insert(name.to_string(), ParamValue::Text(value.to_string()));
                    }
                    _ => return Err(unsupported_key(key)),
                },
            }
        }
        Ok(())
    }
}
