use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Interpolation scheme applied to the Honda tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxMode {
    Bisplrep,
    IntegralPreserving,
}

impl FromStr for FluxMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bisplrep" => Ok(FluxMode::Bisplrep),
            "integral-preserving" => Ok(FluxMode::IntegralPreserving),
            other => Err(ConfigError::InvalidValue {
                name: "flux_mode",
                reason: format!(
                    "'{other}' is not one of 'bisplrep' or 'integral-preserving'"
                ),
            }),
        }
    }
}

impl fmt::Display for FluxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FluxMode::Bisplrep => "bisplrep",
            FluxMode::IntegralPreserving => "integral-preserving",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HondaConfig {
    pub flux_file: PathBuf,
    pub flux_mode: FluxMode,
    pub smoothing: f64,
}

#[derive(Default)]
pub struct HondaConfigBuilder {
    flux_file: Option<PathBuf>,
    flux_mode: Option<FluxMode>,
    smoothing: Option<f64>,
}

impl HondaConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flux_file(mut self, path: PathBuf) -> Self {
        self.flux_file = Some(path);
        self
    }
    pub fn flux_mode(mut self, mode: FluxMode) -> Self {
        self.flux_mode = Some(mode);
        self
    }
    pub fn smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = Some(smoothing);
        self
    }

    pub fn build(self) -> Result<HondaConfig, ConfigError> {
        Ok(HondaConfig {
            flux_file: self
                .flux_file
                .ok_or(ConfigError::MissingParameter("flux_file"))?,
            flux_mode: self
                .flux_mode
                .ok_or(ConfigError::MissingParameter("flux_mode"))?,
            smoothing: self.smoothing.unwrap_or(0.05),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MceqBarrConfig {
    pub table_file: PathBuf,
    pub include_nutau_flux: bool,
    pub use_honda_nominal_flux: bool,
}

impl MceqBarrConfig {
    pub fn new(table_file: PathBuf) -> Self {
        Self {
            table_file,
            include_nutau_flux: false,
            use_honda_nominal_flux: false,
        }
    }
}

/// Source of one loaded variable: a single column or several stacked columns.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableSource {
    Column(String),
    Stack(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    pub events_files: Vec<PathBuf>,
    pub mc_cuts: Option<String>,
    pub data_dict: Option<BTreeMap<String, VariableSource>>,
    pub neutrinos: bool,
    pub fraction_events_to_keep: Option<f64>,
    pub keep_inverse: bool,
    pub seed: u64,
    pub output_names: Vec<String>,
}

#[derive(Default)]
pub struct LoaderConfigBuilder {
    events_files: Vec<PathBuf>,
    mc_cuts: Option<String>,
    data_dict: Option<BTreeMap<String, VariableSource>>,
    neutrinos: Option<bool>,
    fraction_events_to_keep: Option<f64>,
    keep_inverse: bool,
    seed: Option<u64>,
    output_names: Vec<String>,
}

impl LoaderConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_file(mut self, path: PathBuf) -> Self {
        self.events_files.push(path);
        self
    }
    pub fn mc_cuts(mut self, cuts: Option<String>) -> Self {
        self.mc_cuts = cuts;
        self
    }
    pub fn data_dict(mut self, dict: Option<BTreeMap<String, VariableSource>>) -> Self {
        self.data_dict = dict;
        self
    }
    pub fn neutrinos(mut self, neutrinos: bool) -> Self {
        self.neutrinos = Some(neutrinos);
        self
    }
    pub fn fraction_events_to_keep(mut self, fraction: Option<f64>) -> Self {
        self.fraction_events_to_keep = fraction;
        self
    }
    pub fn keep_inverse(mut self, keep_inverse: bool) -> Self {
        self.keep_inverse = keep_inverse;
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn output_names(mut self, names: Vec<String>) -> Self {
        self.output_names = names;
        self
    }

    pub fn build(self) -> Result<LoaderConfig, ConfigError> {
        if self.events_files.is_empty() {
            return Err(ConfigError::MissingParameter("events_file"));
        }
        if let Some(fraction) = self.fraction_events_to_keep {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(ConfigError::InvalidValue {
                    name: "fraction_events_to_keep",
                    reason: format!("{fraction} is outside [0, 1]"),
                });
            }
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.output_names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(ConfigError::InvalidValue {
                name: "output_names",
                reason: format!("duplicate name '{dup}', each name must be unique"),
            });
        }
        Ok(LoaderConfig {
            events_files: self.events_files,
            mc_cuts: self.mc_cuts,
            data_dict: self.data_dict,
            neutrinos: self.neutrinos.unwrap_or(true),
            fraction_events_to_keep: self.fraction_events_to_keep,
            keep_inverse: self.keep_inverse,
            seed: self.seed.unwrap_or(123_456),
            output_names: self.output_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flux_mode_parses_known_modes_only() {
        assert_eq!("bisplrep".parse::<FluxMode>(), Ok(FluxMode::Bisplrep));
        assert_eq!(
            "integral-preserving".parse::<FluxMode>(),
            Ok(FluxMode::IntegralPreserving)
        );
        assert!("spline".parse::<FluxMode>().is_err());
    }

    #[test]
    fn honda_builder_requires_file_and_mode() {
        let err = HondaConfigBuilder::new()
            .flux_mode(FluxMode::Bisplrep)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter("flux_file"));

        let cfg = HondaConfigBuilder::new()
            .flux_file("honda-2015-spl-solmax-aa.d".into())
            .flux_mode(FluxMode::Bisplrep)
            .build()
            .unwrap();
        assert_eq!(cfg.smoothing, 0.05);
    }

    #[test]
    fn loader_builder_applies_defaults_and_validates() {
        let cfg = LoaderConfigBuilder::new()
            .events_file("events.csv".into())
            .build()
            .unwrap();
        assert!(cfg.neutrinos);
        assert_eq!(cfg.seed, 123_456);

        let err = LoaderConfigBuilder::new()
            .events_file("events.csv".into())
            .output_names(vec!["numu_cc".into(), "numu_cc".into()])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "output_names", .. }));

        let err = LoaderConfigBuilder::new()
            .events_file("events.csv".into())
            .fraction_events_to_keep(Some(1.5))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name: "fraction_events_to_keep", .. }
        ));

        assert_eq!(
            LoaderConfigBuilder::new().build().unwrap_err(),
            ConfigError::MissingParameter("events_file")
        );
    }
}
