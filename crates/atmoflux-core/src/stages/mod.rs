//! # Stages Module
//!
//! Simulation stages that either produce binned flux maps or transform
//! per-event containers.
//!
//! - **Flux** ([`flux`]) - Honda table interpolation and MCEq flux with Barr systematics
//! - **Effective area** ([`aeff`]) - Heavy-neutral-lepton lifetime reweighting
//! - **Data** ([`data`]) - Event loading into containers
//! - **Configuration** ([`config`]) - Stage configuration types and builders
//!
//! Event stages implement [`Stage`]: `setup` runs once after construction,
//! `compute` recalculates cached quantities from the current parameters and
//! `apply` writes into the container weights.

pub mod aeff;
pub mod config;
pub mod data;
pub mod flux;
pub mod params;

pub use params::ParamSet;

use crate::core::binning::BinningError;
use crate::core::container::{ContainerError, ContainerSet};
use crate::core::cuts::CutError;
use crate::core::map::MapError;
use crate::core::spline::SplineError;
use crate::core::units::UnitError;
use config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(
        "Stage '{stage}' must exclusively have parameters {expected:?}; missing {missing:?}, unexpected {unexpected:?}"
    )]
    Params {
        stage: String,
        expected: Vec<String>,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Parameter '{0}' is not set")]
    MissingParam(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed table {path}: {message}")]
    Table { path: PathBuf, message: String },

    #[error("Failed to parse CSV file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to parse JSON file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Binning(#[from] BinningError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Spline(#[from] SplineError),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Cut(#[from] CutError),
}

/// A stage operating on per-event containers.
pub trait Stage {
    fn name(&self) -> &str;

    fn setup(&mut self, _data: &mut ContainerSet) -> Result<(), StageError> {
        Ok(())
    }

    fn compute(&mut self, _data: &mut ContainerSet) -> Result<(), StageError> {
        Ok(())
    }

    fn apply(&mut self, _data: &mut ContainerSet) -> Result<(), StageError> {
        Ok(())
    }
}
