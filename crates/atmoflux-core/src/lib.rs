//! # atmoflux Core Library
//!
//! Atmospheric neutrino flux stages and hypothesis-testing post-processing for
//! neutrino oscillation analyses.
//!
//! ## Architecture
//!
//! The library is layered so that each layer only depends on the ones below it.
//!
//! - **[`core`]: The Foundation.** Unit-aware quantities, binnings, histogram maps,
//!   cubic splines, per-event containers and selection cuts.
//!
//! - **[`stages`]: The Physics.** Honda table interpolation and MCEq flux with Barr
//!   systematics, heavy-neutral-lepton reweighting and the CSV event loader.
//!
//! - **[`analysis`]: The Post-processing.** Aggregation of hypothesis-testing logs,
//!   Asimov significances and JSON plot descriptions.
//!
//! - **[`workflows`]: The Public API.** Complete procedures that tie stages and analysis
//!   together, with progress reporting.

pub mod analysis;
pub mod core;
pub mod stages;
pub mod workflows;
