//! Deterministic in-memory data source.
//!
//! Every (parameter, validity time, member) triple maps to a reproducible
//! field of values in `[-3, 3]`, so the same sample always loads the same
//! tensors. Individual (parameter, validity time) pairs can be declared
//! missing to exercise the validity probing.

use super::common::dataset_dir_name;
use super::DataAccessor;
use crate::error::{DatasetError, Result};
use crate::grid::{Grid, GridConfig};
use crate::params::{LevelType, ParamConfig, WeatherParam};
use crate::time_utils::{format_date_stamp, Timestamps};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_GRID: &str = "dummygrid";

#[derive(Debug, Clone)]
pub struct SyntheticAccessor {
    cache_root: PathBuf,
    seed: u64,
    grids: BTreeMap<String, GridConfig>,
    params: BTreeMap<String, ParamConfig>,
    missing: HashSet<(String, DateTime<Utc>)>,
}

/// 64x64 grid at 0.5 degree, latitude increasing with rows
pub fn default_grid_config() -> GridConfig {
    GridConfig::regular((-8.0, 23.5), (15.0, 46.5), (64, 64)).with_geopotential(Array2::ones((64, 64)))
}

impl SyntheticAccessor {
    pub fn new(cache_root: &Path) -> Self {
        let mut grids = BTreeMap::new();
        grids.insert(DEFAULT_GRID.to_string(), default_grid_config());
        Self {
            cache_root: cache_root.to_path_buf(),
            seed: 0,
            grids,
            params: BTreeMap::new(),
            missing: HashSet::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_grid(mut self, name: &str, config: GridConfig) -> Self {
        self.grids.insert(name.to_string(), config);
        self
    }

    pub fn with_param(mut self, name: &str, config: ParamConfig) -> Self {
        self.params.insert(name.to_string(), config);
        self
    }

    /// Declare `short_name` absent at `validity_time`
    pub fn with_missing(mut self, short_name: &str, validity_time: DateTime<Utc>) -> Self {
        self.missing.insert((short_name.to_string(), validity_time));
        self
    }

    fn is_missing(&self, short_name: &str, validity_time: DateTime<Utc>) -> bool {
        self.missing.contains(&(short_name.to_string(), validity_time))
    }

    fn field_seed(&self, short_name: &str, validity_time: DateTime<Utc>, member: usize) -> u64 {
        // FNV-1a over the name, mixed with time and member
        let mut h: u64 = 0xcbf2_9ce4_8422_2325 ^ self.seed;
        for b in short_name.bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        h ^= validity_time.timestamp() as u64;
        h = h.wrapping_mul(0x0100_0000_01b3);
        h ^= member as u64;
        h.wrapping_mul(0x0100_0000_01b3)
    }
}

impl DataAccessor for SyntheticAccessor {
    fn load_grid_info(&self, name: &str) -> Result<GridConfig> {
        self.grids
            .get(name)
            .cloned()
            .ok_or_else(|| DatasetError::configuration(format!("Unknown grid {}", name)))
    }

    fn load_parameter_info(&self, name: &str) -> Result<ParamConfig> {
        Ok(self.params.get(name).cloned().unwrap_or_else(|| ParamConfig {
            unit: "adimensional".to_string(),
            level_type: LevelType::IsobaricInhPa,
            long_name: name.to_string(),
            grid: DEFAULT_GRID.to_string(),
            source_name: None,
        }))
    }

    fn weight_for_level(&self, _level: i32, _level_type: LevelType) -> f32 {
        1.0
    }

    fn dataset_cache_path(&self, dataset_name: &str, grid: &Grid) -> PathBuf {
        self.cache_root.join(dataset_dir_name(dataset_name, grid))
    }

    fn exists(
        &self,
        _dataset_name: &str,
        param: &WeatherParam,
        timestamps: &Timestamps,
        _file_format: &str,
    ) -> bool {
        let short_name = param.short_name();
        timestamps
            .validity_times
            .iter()
            .all(|&t| !self.is_missing(&short_name, t))
    }

    fn load_raw(
        &self,
        _dataset_name: &str,
        param: &WeatherParam,
        timestamps: &Timestamps,
        member: usize,
        _file_format: &str,
    ) -> Result<Array3<f32>> {
        let native = self.load_grid_info(&param.native_grid)?;
        let (rows, cols) = native.full_size;
        let short_name = param.short_name();
        let mut out = Array3::<f32>::zeros((timestamps.len(), rows, cols));
        for (mut field, &t) in out.axis_iter_mut(Axis(0)).zip(&timestamps.validity_times) {
            if self.is_missing(&short_name, t) {
                return Err(DatasetError::missing_data(
                    &short_name,
                    format_date_stamp(&t),
                    "declared missing",
                ));
            }
            let mut rng = StdRng::seed_from_u64(self.field_seed(&short_name, t, member));
            field.mapv_inplace(|_| rng.random_range(-3.0f32..3.0));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamKind;
    use chrono::TimeZone;

    fn param() -> WeatherParam {
        WeatherParam {
            name: "dummy_parameter".to_string(),
            level: 500,
            level_type: LevelType::IsobaricInhPa,
            kind: ParamKind::InputOutput,
            unit: "adimensional".to_string(),
            long_name: "dummy".to_string(),
            native_grid: DEFAULT_GRID.to_string(),
            native_grid_config: None,
            source_name: None,
            state_weight: 1.0,
        }
    }

    #[test]
    fn test_values_are_reproducible() {
        let accessor = SyntheticAccessor::new(Path::new("/tmp"));
        let ts = Timestamps::new(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(), vec![0, 1]);
        let a = accessor.load_raw("dummy", &param(), &ts, 0, "npy").unwrap();
        let b = accessor.load_raw("dummy", &param(), &ts, 0, "npy").unwrap();
        assert_eq!(a.dim(), (2, 64, 64));
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (-3.0..3.0).contains(v)));
        let other_member = accessor.load_raw("dummy", &param(), &ts, 1, "npy").unwrap();
        assert_ne!(a, other_member);
    }

    #[test]
    fn test_missing_pair() {
        let t1 = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();
        let accessor = SyntheticAccessor::new(Path::new("/tmp")).with_missing("dummy_parameter_500hpa", t1);
        let ts = Timestamps::new(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(), vec![0, 1]);
        assert!(!accessor.exists("dummy", &param(), &ts, "npy"));
        let err = accessor.load_raw("dummy", &param(), &ts, 0, "npy").unwrap_err();
        assert!(err.is_recoverable());
        let earlier = Timestamps::new(Utc.with_ymd_and_hms(2022, 12, 31, 0, 0, 0).unwrap(), vec![0, 1]);
        assert!(accessor.exists("dummy", &param(), &earlier, "npy"));
    }
}
