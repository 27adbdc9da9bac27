use super::{ParamTable, ParamValue, param_set, parse_set_value, split_set_value, unsupported_key};
use crate::cli::WeightsArgs;
use crate::error::{CliError, Result};
use atmoflux::stages::config::{LoaderConfigBuilder, MceqBarrConfig, VariableSource};
use atmoflux::workflows::event_weights::{PipelineConfig, PipelineConfigBuilder};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum PartialVariableSource {
    Column(String),
    Stack(Vec<String>),
}

impl From<PartialVariableSource> for VariableSource {
    fn from(p: PartialVariableSource) -> Self {
        match p {
            PartialVariableSource::Column(c) => VariableSource::Column(c),
            PartialVariableSource::Stack(cs) => VariableSource::Stack(cs),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialLoaderConfig {
    #[serde(default)]
    events_files: Vec<PathBuf>,
    mc_cuts: Option<String>,
    data_dict: Option<BTreeMap<String, PartialVariableSource>>,
    neutrinos: Option<bool>,
    fraction_events_to_keep: Option<f64>,
    keep_inverse: Option<bool>,
    seed: Option<u64>,
    #[serde(default)]
    output_names: Vec<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialMceqBarrConfig {
    table_file: Option<PathBuf>,
    include_nutau_flux: Option<bool>,
    use_honda_nominal_flux: Option<bool>,
    #[serde(default)]
    params: ParamTable,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialHnlConfig {
    #[serde(default)]
    params: ParamTable,
}

/// Contents of a `weights` command configuration file. The `[mceq-barr]`
/// and `[hnl]` sections switch their stages on.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialWeightsConfig {
    loader: Option<PartialLoaderConfig>,
    mceq_barr: Option<PartialMceqBarrConfig>,
    hnl: Option<PartialHnlConfig>,
}

impl PartialWeightsConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        super::load_toml(path)
    }

    pub fn merge_with_cli(mut self, args: &WeightsArgs) -> Result<PipelineConfig> {
        self.apply_set_values(&args.set_values)?;

        let loader = self
            .loader
            .take()
            .ok_or_else(|| CliError::Config("`[loader]` section is required.".to_string()))?;
        let mut loader_builder = LoaderConfigBuilder::new()
            .mc_cuts(loader.mc_cuts)
            .data_dict(
                loader
                    .data_dict
                    .map(|dict| dict.into_iter().map(|(k, v)| (k, v.into())).collect()),
            )
            .fraction_events_to_keep(loader.fraction_events_to_keep)
            .keep_inverse(loader.keep_inverse.unwrap_or(false))
            .output_names(loader.output_names);
        for path in loader.events_files {
            loader_builder = loader_builder.events_file(path);
        }
        if let Some(neutrinos) = loader.neutrinos {
            loader_builder = loader_builder.neutrinos(neutrinos);
        }
        if let Some(seed) = loader.seed {
            loader_builder = loader_builder.seed(seed);
        }
        let loader_config = loader_builder
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;

        let mut builder = PipelineConfigBuilder::new().loader(loader_config);
        if let Some(mceq) = self.mceq_barr.take() {
            let table_file = mceq.table_file.ok_or_else(|| {
                CliError::Config("`[mceq-barr]` requires `table-file`.".to_string())
            })?;
            let mut config = MceqBarrConfig::new(table_file);
            config.include_nutau_flux = mceq.include_nutau_flux.unwrap_or(false);
            config.use_honda_nominal_flux = mceq.use_honda_nominal_flux.unwrap_or(false);
            builder = builder.mceq_barr(config, param_set(&mceq.params)?);
        }
        if let Some(hnl) = self.hnl.take() {
            builder = builder.hnl(param_set(&hnl.params)?);
        }
        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let (key, value) = split_set_value(kv_pair)?;
            match key {
                "loader.mc-cuts" => {
                    self.loader.get_or_insert_with(Default::default).mc_cuts = Some(value.to_string());
                }
                "loader.seed" => {
                    self.loader.get_or_insert_with(Default::default).seed =
                        Some(parse_set_value(key, value, "integer")?);
                }
                "loader.fraction-events-to-keep" => {
                    self.loader.get_or_insert_with(Default::default).fraction_events_to_keep =
                        Some(parse_set_value(key, value, "float")?);
                }
                "loader.keep-inverse" => {
                    self.loader.get_or_insert_with(Default::default).keep_inverse =
                        Some(parse_set_value(key, value, "boolean")?);
                }
                "loader.neutrinos" => {
                    self.loader.get_or_insert_with(Default::default).neutrinos =
                        Some(parse_set_value(key, value, "boolean")?);
                }
                "mceq-barr.table-file" => {
                    self.mceq_barr.get_or_insert_with(Default::default).table_file =
                        Some(PathBuf::from(value));
                }
                _ => {
                    let param = ParamValue::Text(value.to_string());
                    if let Some(name) = key.strip_prefix("mceq-barr.params.") {
                        self.mceq_barr
                            .get_or_insert_with(Default::default)
                            .params
                            .insert(name.to_string(), param);
                    } else if let Some(name) = key.strip_prefix("hnl.params.") {
                        self.hnl
                            .get_or_insert_with(Default::default)
                            .params
                            .insert(name.to_string(), param);
                    } else {
                        return Err(unsupported_key(key));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use once_cell::sync::Lazy;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    static TEST_DIR: Lazy<TempDir> = Lazy::new(|| tempdir().expect("Failed to create temp dir"));

    const CONFIG: &str = r#"
[loader]
events-files = ["events_a.csv", "events_b.csv"]
mc-cuts = "(true_coszen <= 0) & (pid == 1)"
fraction-events-to-keep = 0.5
seed = 7

[loader.data-dict]
true_energy = "true_energy"
reco = ["reco_energy", "reco_coszen"]

[mceq-barr]
table-file = "mceq_flux.json.gz"
include-nutau-flux = true

[mceq-barr.params]
delta_index = 0.0
energy_pivot = "24 GeV"

[hnl.params]
U_tau4_sq = 1e-3
"#;

    fn weights_args(name: &str, content: &str, set: &[&str]) -> (PathBuf, WeightsArgs) {
        let path = TEST_DIR.path().join(name);
        fs::write(&path, content).unwrap();
        let mut argv = vec![
            "atmoflux".to_string(),
            "weights".to_string(),
            "-c".to_string(),
            path.to_str().unwrap().to_string(),
            "-o".to_string(),
            "weighted.csv".to_string(),
        ];
        for s in set {
            argv.push("-S".to_string());
            argv.push(s.to_string());
        }
        let Commands::Weights(args) = Cli::parse_from(argv).command else {
            panic!("Expected 'weights' subcommand");
        };
        (path, args)
    }

    #[test]
    fn full_pipeline_is_read_from_file() {
        let (path, args) = weights_args("full.toml", CONFIG, &[]);
        let config = PartialWeightsConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .unwrap();

        assert_eq!(config.loader.events_files.len(), 2);
        assert_eq!(config.loader.seed, 7);
        assert_eq!(config.loader.fraction_events_to_keep, Some(0.5));
        assert!(config.loader.neutrinos);
        let dict = config.loader.data_dict.as_ref().unwrap();
        assert_eq!(
            dict["reco"],
            VariableSource::Stack(vec!["reco_energy".to_string(), "reco_coszen".to_string()])
        );
        assert_eq!(dict["true_energy"], VariableSource::Column("true_energy".to_string()));

        let (mceq, params) = config.mceq_barr.as_ref().unwrap();
        assert!(mceq.include_nutau_flux);
        assert!(!mceq.use_honda_nominal_flux);
        assert_eq!(params.names().count(), 2);
        assert!(config.hnl.is_some());
    }

    #[test]
    fn optional_stages_stay_off() {
        let (path, args) = weights_args(
            "loader_only.toml",
            "[loader]\nevents-files = [\"events.csv\"]\n",
            &[],
        );
        let config = PartialWeightsConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .unwrap();
        assert!(config.mceq_barr.is_none());
        assert!(config.hnl.is_none());
        assert_eq!(config.loader.seed, 123_456);
    }

    #[test]
    fn set_values_override_file() {
        let (path, args) = weights_args(
            "override.toml",
            CONFIG,
            &[
                "loader.seed=42",
                "loader.keep-inverse=true",
                "hnl.params.U_tau4_sq=0.01",
                "mceq-barr.params.pion_ratio=1.0",
            ],
        );
        let config = PartialWeightsConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .unwrap();
        assert_eq!(config.loader.seed, 42);
        assert!(config.loader.keep_inverse);
        assert_eq!(
            config.hnl.as_ref().unwrap().dimensionless("U_tau4_sq").unwrap(),
            0.01
        );
        assert_eq!(config.mceq_barr.as_ref().unwrap().1.names().count(), 3);
    }

    #[test]
    fn missing_sections_and_bad_values_are_errors() {
        let (path, args) = weights_args("no_loader.toml", "[hnl.params]\nU_tau4_sq = 1e-3\n", &[]);
        let result = PartialWeightsConfig::from_file(&path).unwrap().merge_with_cli(&args);
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("[loader]")));

        let (path, args) = weights_args("bad_seed.toml", CONFIG, &["loader.seed=abc"]);
        let result = PartialWeightsConfig::from_file(&path).unwrap().merge_with_cli(&args);
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("loader.seed")));

        let (path, args) = weights_args(
            "no_table.toml",
            "[loader]\nevents-files = [\"e.csv\"]\n[mceq-barr]\ninclude-nutau-flux = true\n",
            &[],
        );
        let result = PartialWeightsConfig::from_file(&path).unwrap().merge_with_cli(&args);
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("table-file")));
    }
}
