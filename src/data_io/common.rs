/// Common functionality shared across data accessors
use crate::error::{DatasetError, Result};
use crate::grid::Grid;
use crate::math::{crop_to_limits, resize};
use crate::params::WeatherParam;
use crate::time_utils::{format_date_stamp, Split};
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView2};
use std::path::{Path, PathBuf};

/// Folder of all fields valid at `datetime`: `root/data/YYYYMMDDHH`
pub fn date_folder(root: &Path, datetime: &DateTime<Utc>) -> PathBuf {
    root.join("data").join(format_date_stamp(datetime))
}

/// File holding one parameter at one validity time
pub fn param_file(
    root: &Path,
    datetime: &DateTime<Utc>,
    param: &WeatherParam,
    file_format: &str,
) -> PathBuf {
    date_folder(root, datetime).join(format!("{}.{}", param.short_name(), file_format))
}

/// Per-dataset cache directory name
pub fn dataset_dir_name(dataset_name: &str, grid: &Grid) -> String {
    format!("{}_{}", dataset_name, grid.name)
}

/// Validity cache file name for one split and window length
pub fn valid_samples_file_name(split: Split, num_input_steps: usize, num_pred_steps: usize) -> String {
    format!("valid_samples_{}_{}_{}.txt", split, num_input_steps, num_pred_steps)
}

/// Bring one native full-grid field onto the target subdomain.
///
/// A field from a coarser global grid is first cropped to the target
/// bounding box, then every foreign field is resized to the target full
/// size; the subdomain crop comes last.
pub fn fit_to_grid(param: &WeatherParam, grid: &Grid, field: ArrayView2<f32>) -> Result<Array2<f32>> {
    let Some(native) = param.native_grid_config.as_deref() else {
        return grid.crop_subdomain(field);
    };

    if field.dim() != native.full_size {
        return Err(DatasetError::ContractViolation {
            message: format!("field does not match native grid {}", param.native_grid),
            parameter: Some(param.short_name()),
            timestamp: None,
            expected: format!("{:?}", native.full_size),
            actual: format!("{:?}", field.dim()),
        });
    }

    let target_full = grid.full_size();
    let cropped = if native.global && native.resolution() >= target_resolution(grid) {
        Some(crop_to_limits(field, &native.lat_axis(), &native.lon_axis(), grid.full_limits())?)
    } else {
        None
    };
    let source = match &cropped {
        Some(c) => c.view(),
        None => field.view(),
    };
    let resized = resize(source, target_full);
    grid.crop_subdomain(resized.view())
}

fn target_resolution(grid: &Grid) -> f64 {
    let [_, _, lat_min, lat_max] = grid.full_limits();
    let rows = grid.full_size().0;
    if rows < 2 {
        return 0.0;
    }
    (lat_max - lat_min) / (rows - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridSpec;
    use crate::grid::GridConfig;
    use crate::params::{LevelType, ParamKind};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn target_grid() -> Grid {
        let spec = GridSpec {
            name: "target".to_string(),
            border_size: 0,
            subdomain: Some([0, 4, 0, 4]),
            proj_name: "PlateCarree".to_string(),
            projection_kwargs: Default::default(),
        };
        Grid::new(&spec, GridConfig::regular((50.0, 43.0), (0.0, 7.0), (8, 8))).unwrap()
    }

    fn param(native: Option<GridConfig>) -> WeatherParam {
        WeatherParam {
            name: "t2m".to_string(),
            level: 2,
            level_type: LevelType::HeightAboveGround,
            kind: ParamKind::InputOutput,
            unit: "K".to_string(),
            long_name: "2m temperature".to_string(),
            native_grid: "native".to_string(),
            native_grid_config: native.map(Arc::new),
            source_name: None,
            state_weight: 2.0,
        }
    }

    #[test]
    fn test_param_file() {
        let dt = Utc.with_ymd_and_hms(2023, 1, 15, 12, 0, 0).unwrap();
        let path = param_file(Path::new("/data"), &dt, &param(None), "npy");
        assert_eq!(path.to_string_lossy(), "/data/data/2023011512/t2m_2m.npy");
    }

    #[test]
    fn test_valid_samples_file_name() {
        assert_eq!(valid_samples_file_name(Split::Valid, 2, 4), "valid_samples_valid_2_4.txt");
    }

    #[test]
    fn test_fit_same_grid_crops_subdomain() {
        let field = Array2::from_shape_fn((8, 8), |(i, j)| (i * 8 + j) as f32);
        let out = fit_to_grid(&param(None), &target_grid(), field.view()).unwrap();
        assert_eq!(out.dim(), (4, 4));
        assert_eq!(out[[3, 3]], 27.0);
    }

    #[test]
    fn test_fit_coarse_global_grid() {
        // 1 degree global grid, target is 8x8 at 1 degree inside it
        let native = GridConfig::regular((90.0, -90.0), (-180.0, 179.0), (181, 360)).with_global(true);
        let field = Array2::from_elem((181, 360), 3.5f32);
        let out = fit_to_grid(&param(Some(native)), &target_grid(), field.view()).unwrap();
        assert_eq!(out.dim(), (4, 4));
        assert!(out.iter().all(|&v| (v - 3.5).abs() < 1e-6));
    }

    #[test]
    fn test_fit_regional_coarse_grid_is_resized() {
        // Same extent as the target at half the resolution
        let native = GridConfig::regular((50.0, 43.0), (0.0, 7.0), (4, 4));
        let field = Array2::from_shape_fn((4, 4), |(i, _)| i as f32);
        let out = fit_to_grid(&param(Some(native)), &target_grid(), field.view()).unwrap();
        assert_eq!(out.dim(), (4, 4));
        assert_eq!(out.column(0).to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
        assert!(out.rows().into_iter().all(|row| row.iter().all(|&v| v == row[0])));
    }

    #[test]
    fn test_fit_rejects_wrong_native_shape() {
        let native = GridConfig::regular((50.0, 43.0), (0.0, 7.0), (4, 4));
        let field = Array2::zeros((8, 8));
        assert!(fit_to_grid(&param(Some(native)), &target_grid(), field.view()).is_err());
    }
}
