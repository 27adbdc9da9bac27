//! # Workflows Module
//!
//! End-to-end procedures built from the stages and the analysis code. Each
//! workflow loads its inputs, reports progress phase by phase and returns
//! its results as plain values.
//!
//! - **Flux maps** ([`flux_maps`]) - Honda table loading and binned flux evaluation
//! - **Event weights** ([`event_weights`]) - Loader, MCEq flux and HNL reweighting over event containers
//! - **Post-processing** ([`postprocess`]) - Asimov significances, minimiser diagnostics
//!   and best-fit parameter plots from hypothesis-testing logs

pub mod error;
pub mod event_weights;
pub mod flux_maps;
pub mod postprocess;

pub use error::WorkflowError;
