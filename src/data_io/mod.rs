//! Data sources.
//!
//! [`DataAccessor`] is the only interface between the sample engine and a
//! physical archive. New sources are added by implementing it; nothing in
//! the sampling core knows about file layouts.

pub mod array_file;
pub mod common;
pub mod synthetic;

pub use array_file::ArrayFileAccessor;
pub use synthetic::SyntheticAccessor;

use crate::config::SamplePreprocSettings;
use crate::error::{DatasetError, Result};
use crate::grid::{Grid, GridConfig};
use crate::params::{default_level_weight, LevelType, ParamConfig, WeatherParam};
use crate::stats::Stats;
use crate::time_utils::Timestamps;
use ndarray::{Array3, Axis};
use std::path::PathBuf;

/// Capability interface of a data source
pub trait DataAccessor: Send + Sync {
    /// Full (uncropped) description of a grid
    fn load_grid_info(&self, name: &str) -> Result<GridConfig>;

    fn load_parameter_info(&self, name: &str) -> Result<ParamConfig>;

    fn weight_for_level(&self, level: i32, level_type: LevelType) -> f32 {
        default_level_weight(level, level_type)
    }

    /// Directory holding the validity caches and statistics of a dataset
    fn dataset_cache_path(&self, dataset_name: &str, grid: &Grid) -> PathBuf;

    /// Whether `param` can be read at every validity time of `timestamps`.
    /// Anything unreadable is a plain `false`.
    fn exists(
        &self,
        dataset_name: &str,
        param: &WeatherParam,
        timestamps: &Timestamps,
        file_format: &str,
    ) -> bool;

    /// Raw values on the parameter's native full grid, shaped
    /// `(timestep, rows, cols)`.
    fn load_raw(
        &self,
        dataset_name: &str,
        param: &WeatherParam,
        timestamps: &Timestamps,
        member: usize,
        file_format: &str,
    ) -> Result<Array3<f32>>;

    /// Values of `param` on the target grid subdomain, shaped
    /// `(timestep, lat, lon)`, standardized when asked to.
    #[allow(clippy::too_many_arguments)]
    fn fetch(
        &self,
        param: &WeatherParam,
        grid: &Grid,
        stats: &Stats,
        timestamps: &Timestamps,
        settings: &SamplePreprocSettings,
        standardize: bool,
        member: usize,
    ) -> Result<Array3<f32>> {
        let raw = self.load_raw(
            &settings.dataset_name,
            param,
            timestamps,
            member,
            &settings.file_format,
        )?;
        if raw.len_of(Axis(0)) != timestamps.len() {
            return Err(DatasetError::shape_mismatch(
                format!("timesteps returned for {}", param.short_name()),
                &[timestamps.len()],
                &[raw.len_of(Axis(0))],
            ));
        }

        let (rows, cols) = grid.shape();
        let mut out = Array3::<f32>::zeros((timestamps.len(), rows, cols));
        for (step, field) in raw.axis_iter(Axis(0)).enumerate() {
            let fitted = common::fit_to_grid(param, grid, field)?;
            out.index_axis_mut(Axis(0), step).assign(&fitted);
        }

        if standardize {
            stats.get(&param.short_name())?.standardize(&mut out);
        }
        Ok(out)
    }
}
