//! # Core Module
//!
//! Stateless building blocks shared by the flux stages and the analysis code.
//!
//! - **Units** ([`units`]) - Physical units, quantities and quantity-string parsing
//! - **Binning** ([`binning`]) - One- and multi-dimensional histogram binnings
//! - **Maps** ([`map`]) - Histograms over a binning and named collections of them
//! - **Splines** ([`spline`]) - Not-a-knot cubic splines in one and two dimensions
//! - **Containers** ([`container`]) - Per-event field storage for Monte Carlo samples
//! - **Cuts** ([`cuts`]) - Boolean selection expressions over container fields
//! - **Progress** ([`progress`]) - Progress callbacks for long-running work

pub mod binning;
pub mod container;
pub mod cuts;
pub mod map;
pub mod progress;
pub mod spline;
pub mod units;
