use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

pub const TRUE_ENERGY: &str = "true_energy";
pub const TRUE_COSZEN: &str = "true_coszen";
pub const TRUE_AZIMUTH: &str = "true_azimuth";

#[derive(Debug, Error, PartialEq, Clone)]
pub enum BinningError {
    #[error("Binning '{name}' needs at least two edges, got {count}")]
    TooFewEdges { name: String, count: usize },
    #[error("Edges of binning '{0}' must be finite and strictly increasing")]
    NonMonotonicEdges(String),
    #[error("Logarithmic binning '{0}' requires strictly positive edges")]
    NonPositiveLogEdges(String),
    #[error("Binning has no dimension named '{0}'")]
    UnknownDimension(String),
    #[error("Duplicate dimension name '{0}'")]
    DuplicateDimension(String),
    #[error("Expected {expected} oversampling factors, got {actual}")]
    OversampleMismatch { expected: usize, actual: usize },
    #[error("Oversampling factor must be at least 1")]
    InvalidOversampling,
    #[error(
        "Incompatible binning for either 2D (requires \"true_energy\" and \"true_coszen\") or 3D (additionally requires \"true_azimuth\"): got {0:?}"
    )]
    UnsupportedFluxBinning(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneDimBinning {
    pub name: String,
    pub edges: Vec<f64>,
    #[serde(default)]
    pub is_log: bool,
    #[serde(default)]
    pub unit: Option<String>,
}

impl OneDimBinning {
    pub fn from_edges(name: &str, edges: Vec<f64>, is_log: bool) -> Result<Self, BinningError> {
        let binning = Self {
            name: name.to_string(),
            edges,
            is_log,
            unit: None,
        };
        binning.validate()?;
        Ok(binning)
    }

    pub fn linear(name: &str, lo: f64, hi: f64, num_bins: usize) -> Result<Self, BinningError> {
        let edges = linspace(lo, hi, num_bins + 1);
        Self::from_edges(name, edges, false)
    }

    pub fn logarithmic(
        name: &str,
        lo: f64,
        hi: f64,
        num_bins: usize,
    ) -> Result<Self, BinningError> {
        if lo <= 0.0 || hi <= 0.0 {
            return Err(BinningError::NonPositiveLogEdges(name.to_string()));
        }
        let edges = linspace(lo.log10(), hi.log10(), num_bins + 1)
            .into_iter()
            .map(|e| 10f64.powf(e))
            .collect();
        Self::from_edges(name, edges, true)
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), BinningError> {
        if self.edges.len() < 2 {
            return Err(BinningError::TooFewEdges {
                name: self.name.clone(),
                count: self.edges.len(),
            });
        }
        let monotonic = self.edges.iter().all(|e| e.is_finite())
            && self.edges.windows(2).all(|w| w[1] > w[0]);
        if !monotonic {
            return Err(BinningError::NonMonotonicEdges(self.name.clone()));
        }
        if self.is_log && self.edges[0] <= 0.0 {
            return Err(BinningError::NonPositiveLogEdges(self.name.clone()));
        }
        Ok(())
    }

    pub fn num_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Bin centres; geometric means for logarithmic binnings.
    pub fn weighted_centers(&self) -> Vec<f64> {
        self.edges
            .windows(2)
            .map(|w| {
                if self.is_log {
                    (w[0] * w[1]).sqrt()
                } else {
                    0.5 * (w[0] + w[1])
                }
            })
            .collect()
    }

    pub fn bin_widths(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn oversample(&self, factor: usize) -> Result<Self, BinningError> {
        if factor == 0 {
            return Err(BinningError::InvalidOversampling);
        }
        if factor == 1 {
            return Ok(self.clone());
        }
        let mut edges = Vec::with_capacity(self.num_bins() * factor + 1);
        for w in self.edges.windows(2) {
            let (lo, hi) = if self.is_log {
                (w[0].log10(), w[1].log10())
            } else {
                (w[0], w[1])
            };
            for i in 0..factor {
                let e = lo + (hi - lo) * i as f64 / factor as f64;
                edges.push(if self.is_log { 10f64.powf(e) } else { e });
            }
        }
        edges.push(*self.edges.last().unwrap_or(&0.0));
        Ok(Self {
            name: self.name.clone(),
            edges,
            is_log: self.is_log,
            unit: self.unit.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxBinningKind {
    TwoDim,
    ThreeDim,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiDimBinning {
    pub dims: Vec<OneDimBinning>,
}

impl MultiDimBinning {
    pub fn new(dims: Vec<OneDimBinning>) -> Result<Self, BinningError> {
        let mut seen = HashSet::new();
        for dim in &dims {
            dim.validate()?;
            if !seen.insert(dim.name.clone()) {
                return Err(BinningError::DuplicateDimension(dim.name.clone()));
            }
        }
        Ok(Self { dims })
    }

    pub fn names(&self) -> Vec<String> {
        self.dims.iter().map(|d| d.name.clone()).collect()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.num_bins()).collect()
    }

    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn index_of(&self, name: &str) -> Result<usize, BinningError> {
        self.dims
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| BinningError::UnknownDimension(name.to_string()))
    }

    pub fn dim(&self, name: &str) -> Result<&OneDimBinning, BinningError> {
        Ok(&self.dims[self.index_of(name)?])
    }

    /// Row-major strides for the flat histogram layout.
    pub fn strides(&self) -> Vec<usize> {
        let shape = self.shape();
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Splits a flat index into per-dimension bin indices.
    pub fn unravel(&self, mut flat: usize) -> Vec<usize> {
        let strides = self.strides();
        strides
            .iter()
            .map(|s| {
                let idx = flat / s;
                flat %= s;
                idx
            })
            .collect()
    }

    pub fn bin_volumes(&self) -> Vec<f64> {
        let widths: Vec<Vec<f64>> = self.dims.iter().map(|d| d.bin_widths()).collect();
        (0..self.size())
            .map(|flat| {
                self.unravel(flat)
                    .iter()
                    .zip(&widths)
                    .map(|(&i, w)| w[i])
                    .product()
            })
            .collect()
    }

    pub fn oversample(&self, factors: &[usize]) -> Result<Self, BinningError> {
        if factors.len() != self.dims.len() {
            return Err(BinningError::OversampleMismatch {
                expected: self.dims.len(),
                actual: factors.len(),
            });
        }
        let dims = self
            .dims
            .iter()
            .zip(factors)
            .map(|(d, &f)| d.oversample(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { dims })
    }

    pub fn flux_kind(&self) -> Result<FluxBinningKind, BinningError> {
        let names: HashSet<&str> = self.dims.iter().map(|d| d.name.as_str()).collect();
        let two_dim: HashSet<&str> = [TRUE_ENERGY, TRUE_COSZEN].into_iter().collect();
        let three_dim: HashSet<&str> =
            [TRUE_ENERGY, TRUE_COSZEN, TRUE_AZIMUTH].into_iter().collect();
        if names == two_dim {
            Ok(FluxBinningKind::TwoDim)
        } else if names == three_dim {
            Ok(FluxBinningKind::ThreeDim)
        } else {
            Err(BinningError::UnsupportedFluxBinning(self.names()))
        }
    }
}

pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}
