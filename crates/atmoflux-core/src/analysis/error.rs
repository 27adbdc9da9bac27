use crate::core::units::UnitError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read fit results from {path}: {message}")]
    FitFile { path: PathBuf, message: String },

    #[error("Failed to parse JSON file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Entry '{0}' in the log directory does not follow the toy naming scheme")]
    UnexpectedEntry(String),

    #[error("Not all output is for the same {what}; got {found:?}")]
    Inconsistent { what: &'static str, found: Vec<String> },

    #[error(
        "Log directory contains data_sets.json but not {0}; delete the cached JSON files and re-run"
    )]
    IncompleteCache(&'static str),

    #[error("{0} was produced from real data; only Monte Carlo studies can be processed")]
    RealData(PathBuf),

    #[error("Cannot parse parameter description '{0}'")]
    ParamString(String),

    #[error("No trials found in {0}")]
    NoTrials(PathBuf),

    #[error("Missing fit '{fit}' for injection point '{point}'")]
    MissingFit { point: String, fit: String },

    #[error("Invalid injection point key '{0}'")]
    InjectionKey(String),

    #[error("Metric lists differ in length: {wo} vs {to}")]
    LengthMismatch { wo: usize, to: usize },

    #[error(
        "Injected parameter '{name}' not found among fitted parameters {available:?}; set its units explicitly"
    )]
    UnknownInjectedUnits { name: String, available: Vec<String> },

    #[error("Invalid extra points '{input}': {reason}")]
    ExtraPoints { input: String, reason: String },

    #[error("x ranges do not match for overlaid significances: {0}")]
    RangeMismatch(String),

    #[error("Invalid postprocess request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Regex(#[from] regex::Error),
}
