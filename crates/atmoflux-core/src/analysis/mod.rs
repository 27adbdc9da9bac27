//! # Analysis Module
//!
//! Post-processing of hypothesis-testing runs that scan an injected parameter.
//!
//! - **Trials** ([`trials`]) - Walks a log directory, parses run summaries and fit files, caches the aggregate
//! - **Labels** ([`labels`]) - File- and directory-naming conventions of a run
//! - **Asimov** ([`asimov`]) - Best-fit selection, Δχ² significances and minimiser diagnostics
//! - **Plots** ([`plots`]) - JSON plot descriptions for significances, best fits and minimiser info
//! - **TeX** ([`tex`]) - Axis labels for parameters, hypotheses and units

pub mod asimov;
pub mod error;
pub mod labels;
pub mod plots;
pub mod tex;
pub mod trials;

pub use error::AnalysisError;
