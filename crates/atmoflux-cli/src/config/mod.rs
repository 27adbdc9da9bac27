//! TOML configuration files of the `flux` and `weights` commands.
//!
//! Files are read into `Partial*Config` structs with every field optional,
//! `-S key=value` overrides are applied on top, and the result is turned into
//! the core configuration through its builder.

pub mod flux;
pub mod weights;

pub use flux::PartialFluxConfig;
pub use weights::PartialWeightsConfig;

use crate::error::{CliError, Result};
use atmoflux::stages::ParamSet;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// A stage parameter: a bare number or a quantity string such as `"24 GeV"`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    fn as_text(&self) -> String {
        match self {
            ParamValue::Number(v) => v.to_string(),
            ParamValue::Text(s) => s.clone(),
        }
    }
}

pub type ParamTable = BTreeMap<String, ParamValue>;

/// Parses every entry of a `[..params]` table into a [`ParamSet`].
pub fn param_set(table: &ParamTable) -> Result<ParamSet> {
    let mut params = ParamSet::new();
    for (name, value) in table {
        params
            .set_from_str(name, &value.as_text())
            .map_err(|e| CliError::Config(format!("Invalid value for parameter '{name}': {e}")))?;
    }
    Ok(params)
}

pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Loading configuration from file: {:?}", path);
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| CliError::FileParsing {
        path: path.to_path_buf(),
        source: e.into(),
    })
}

/// Splits `KEY=VALUE`; the value may itself contain `=`.
pub fn split_set_value(kv_pair: &str) -> Result<(&str, &str)> {
    kv_pair.split_once('=').ok_or_else(|| {
        CliError::Config(format!(
            "Invalid --set format: '{kv_pair}'. Expected KEY=VALUE."
        ))
    })
}

pub fn parse_set_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid {kind} value for {key}: {value}")))
}

pub fn unsupported_key(key: &str) -> CliError {
    CliError::Config(format!("Unsupported configuration key for --set: '{key}'"))
}
