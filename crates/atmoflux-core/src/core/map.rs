use super::binning::{BinningError, MultiDimBinning, OneDimBinning};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("Map '{name}' has {actual} bins but its binning has {expected}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Maps '{left}' and '{right}' have different binnings")]
    BinningMismatch { left: String, right: String },
    #[error("Expected {expected} factors along '{dim}', got {actual}")]
    FactorLengthMismatch {
        dim: String,
        expected: usize,
        actual: usize,
    },
    #[error("Dimension '{dim}' with {bins} bins cannot be downsampled by {factor}")]
    IndivisibleDownsample {
        dim: String,
        bins: usize,
        factor: usize,
    },
    #[error("No map named '{0}' in set")]
    NotFound(String),
    #[error("Binning error: {0}")]
    Binning(#[from] BinningError),
    #[error("Failed to write map table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// A histogram over a [`MultiDimBinning`], stored flat in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    pub name: String,
    pub hist: Vec<f64>,
    pub binning: MultiDimBinning,
}

impl Map {
    pub fn new(name: &str, hist: Vec<f64>, binning: MultiDimBinning) -> Result<Self, MapError> {
        if hist.len() != binning.size() {
            return Err(MapError::ShapeMismatch {
                name: name.to_string(),
                expected: binning.size(),
                actual: hist.len(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            hist,
            binning,
        })
    }

    pub fn zeros(name: &str, binning: MultiDimBinning) -> Self {
        Self {
            name: name.to_string(),
            hist: vec![0.0; binning.size()],
            binning,
        }
    }

    pub fn sum(&self) -> f64 {
        self.hist.iter().sum()
    }

    pub fn scaled(&self, factor: f64) -> Self {
        let mut out = self.clone();
        out.hist.iter_mut().for_each(|v| *v *= factor);
        out
    }

    fn zip_with(&self, other: &Map, op: impl Fn(f64, f64) -> f64) -> Result<Map, MapError> {
        if self.binning != other.binning {
            return Err(MapError::BinningMismatch {
                left: self.name.clone(),
                right: other.name.clone(),
            });
        }
        let hist = self
            .hist
            .iter()
            .zip(&other.hist)
            .map(|(&a, &b)| op(a, b))
            .collect();
        Ok(Map {
            name: self.name.clone(),
            hist,
            binning: self.binning.clone(),
        })
    }

    pub fn add(&self, other: &Map) -> Result<Map, MapError> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Map) -> Result<Map, MapError> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Map) -> Result<Map, MapError> {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn div(&self, other: &Map) -> Result<Map, MapError> {
        self.zip_with(other, |a, b| a / b)
    }

    /// Multiplies every bin by the factor belonging to its index along `dim`.
    pub fn scale_along(&mut self, dim: &str, factors: &[f64]) -> Result<(), MapError> {
        let axis = self.binning.index_of(dim)?;
        let expected = self.binning.dims[axis].num_bins();
        if factors.len() != expected {
            return Err(MapError::FactorLengthMismatch {
                dim: dim.to_string(),
                expected,
                actual: factors.len(),
            });
        }
        let stride = self.binning.strides()[axis];
        for (flat, value) in self.hist.iter_mut().enumerate() {
            *value *= factors[(flat / stride) % expected];
        }
        Ok(())
    }

    /// Sums blocks of `factors[i]` adjacent bins along each dimension.
    pub fn downsample(&self, factors: &[usize]) -> Result<Map, MapError> {
        if factors.len() != self.binning.dims.len() {
            return Err(BinningError::OversampleMismatch {
                expected: self.binning.dims.len(),
                actual: factors.len(),
            }
            .into());
        }
        let mut parent_dims = Vec::with_capacity(factors.len());
        for (dim, &factor) in self.binning.dims.iter().zip(factors) {
            if factor == 0 || dim.num_bins() % factor != 0 {
                return Err(MapError::IndivisibleDownsample {
                    dim: dim.name.clone(),
                    bins: dim.num_bins(),
                    factor,
                });
            }
            let edges: Vec<f64> = dim.edges.iter().step_by(factor).copied().collect();
            let mut parent = OneDimBinning::from_edges(&dim.name, edges, dim.is_log)?;
            parent.unit = dim.unit.clone();
            parent_dims.push(parent);
        }
        let parent = MultiDimBinning::new(parent_dims)?;
        let parent_strides = parent.strides();
        let mut hist = vec![0.0; parent.size()];
        for (flat, value) in self.hist.iter().enumerate() {
            let target: usize = self
                .binning
                .unravel(flat)
                .iter()
                .zip(factors)
                .zip(&parent_strides)
                .map(|((&i, &f), &s)| (i / f) * s)
                .sum();
            hist[target] += value;
        }
        Ok(Map {
            name: self.name.clone(),
            hist,
            binning: parent,
        })
    }
}

/// Ordered, name-addressable collection of maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapSet {
    maps: Vec<Map>,
}

impl MapSet {
    pub fn new(maps: Vec<Map>) -> Self {
        Self { maps }
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn push(&mut self, map: Map) {
        self.maps.push(map);
    }

    pub fn names(&self) -> Vec<&str> {
        self.maps.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Result<&Map, MapError> {
        self.maps
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| MapError::NotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Map, MapError> {
        self.maps
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| MapError::NotFound(name.to_string()))
    }

    /// Replaces the map with the same name, keeping its position.
    pub fn replace(&mut self, map: Map) -> Result<(), MapError> {
        let slot = self.get_mut(&map.name.clone())?;
        *slot = map;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Map> {
        self.maps.iter()
    }

    pub fn into_maps(self) -> Vec<Map> {
        self.maps
    }

    /// Writes one row per bin: the bin centre along each dimension followed by
    /// each map's value.
    pub fn write_csv(&self, path: &Path) -> Result<(), MapError> {
        let csv_err = |source| MapError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let Some(first) = self.maps.first() else {
            let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
            writer.flush().map_err(|e| csv_err(e.into()))?;
            return Ok(());
        };
        for map in &self.maps[1..] {
            if map.binning != first.binning {
                return Err(MapError::BinningMismatch {
                    left: first.name.clone(),
                    right: map.name.clone(),
                });
            }
        }
        let binning = &first.binning;
        let centers: Vec<Vec<f64>> = binning.dims.iter().map(|d| d.weighted_centers()).collect();

        let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
        let header: Vec<String> = binning
            .names()
            .into_iter()
            .chain(self.maps.iter().map(|m| m.name.clone()))
            .collect();
        writer.write_record(&header).map_err(csv_err)?;
        for flat in 0..binning.size() {
            let idx = binning.unravel(flat);
            let row: Vec<String> = idx
                .iter()
                .zip(&centers)
                .map(|(&i, c)| c[i].to_string())
                .chain(self.maps.iter().map(|m| m.hist[flat].to_string()))
                .collect();
            writer.write_record(&row).map_err(csv_err)?;
        }
        writer.flush().map_err(|e| csv_err(e.into()))?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a MapSet {
    type Item = &'a Map;
    type IntoIter = std::slice::Iter<'a, Map>;

    fn into_iter(self) -> Self::IntoIter {
        self.maps.iter()
    }
}
