//! Per-parameter statistics used for standardization and loss weighting.

use crate::error::{DatasetError, Result};
use ndarray::{Array, Dimension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const PARAMETERS_STATS_FILE: &str = "parameters_stats.json";
pub const DIFF_STATS_FILE: &str = "diff_stats.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    Mean,
    Std,
    Min,
    Max,
}

impl ParamStats {
    pub fn field(&self, field: StatField) -> f64 {
        match field {
            StatField::Mean => self.mean,
            StatField::Std => self.std,
            StatField::Min => self.min,
            StatField::Max => self.max,
        }
    }

    /// `(x - mean) / std`; a zero std only centers.
    pub fn standardize<D: Dimension>(&self, array: &mut Array<f32, D>) {
        let mean = self.mean as f32;
        if self.std == 0.0 {
            array.mapv_inplace(|v| v - mean);
        } else {
            let std = self.std as f32;
            array.mapv_inplace(|v| (v - mean) / std);
        }
    }

    pub fn destandardize<D: Dimension>(&self, array: &mut Array<f32, D>) {
        let mean = self.mean as f32;
        let std = if self.std == 0.0 { 1.0 } else { self.std as f32 };
        array.mapv_inplace(|v| v * std + mean);
    }
}

/// Statistics keyed by parameter short name, backed by a JSON file
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    fname: PathBuf,
    stats: BTreeMap<String, ParamStats>,
}

impl Stats {
    pub fn load(fname: &Path) -> Result<Self> {
        let text = fs::read_to_string(fname).map_err(|e| {
            DatasetError::configuration(format!(
                "Cannot read statistics file {}: {}",
                fname.display(),
                e
            ))
        })?;
        let stats: BTreeMap<String, ParamStats> = serde_json::from_str(&text)?;
        debug!("Loaded statistics for {} parameters from {}", stats.len(), fname.display());
        Ok(Self {
            fname: fname.to_path_buf(),
            stats,
        })
    }

    /// Load when present, empty store otherwise
    pub fn load_or_empty(fname: &Path) -> Result<Self> {
        if fname.exists() {
            Self::load(fname)
        } else {
            warn!("Statistics file {} not found, using an empty store", fname.display());
            Ok(Self::from_map(fname, BTreeMap::new()))
        }
    }

    pub fn from_map(fname: &Path, stats: BTreeMap<String, ParamStats>) -> Self {
        Self {
            fname: fname.to_path_buf(),
            stats,
        }
    }

    pub fn fname(&self) -> &Path {
        &self.fname
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stats.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<&ParamStats> {
        self.stats.get(name).ok_or_else(|| {
            DatasetError::configuration(format!(
                "No statistics for {} in {}",
                name,
                self.fname.display()
            ))
        })
    }

    pub fn insert(&mut self, name: impl Into<String>, stats: ParamStats) {
        self.stats.insert(name.into(), stats);
    }

    /// One statistic for a list of parameters, in the given order
    pub fn to_list(&self, field: StatField, names: &[String]) -> Result<Vec<f64>> {
        names
            .iter()
            .map(|name| self.get(name).map(|s| s.field(field)))
            .collect()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.fname.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.fname, serde_json::to_string_pretty(&self.stats)?)?;
        Ok(())
    }
}
