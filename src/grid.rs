//! Grid metadata: the coordinate system every parameter is delivered on.

use crate::config::GridSpec;
use crate::error::{DatasetError, Result};
use crate::tensor::{NamedTensor, FEATURES, LAT, LON};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Grid description as provided by an accessor, before any subdomain crop
#[derive(Debug, Clone, PartialEq)]
pub struct GridConfig {
    /// (rows, cols) of the complete grid
    pub full_size: (usize, usize),
    pub latitude: Array2<f64>,
    pub longitude: Array2<f64>,
    pub geopotential: Option<Array2<f32>>,
    pub landsea_mask: Option<Array2<f32>>,
    /// Grid defined over the whole globe
    pub global: bool,
}

impl GridConfig {
    /// Regular lat/lon grid, latitude varying along rows and longitude
    /// along columns, both ends included.
    pub fn regular(lat_range: (f64, f64), lon_range: (f64, f64), full_size: (usize, usize)) -> Self {
        let (rows, cols) = full_size;
        let lat_step = step(lat_range, rows);
        let lon_step = step(lon_range, cols);
        let latitude = Array2::from_shape_fn(full_size, |(i, _)| lat_range.0 + i as f64 * lat_step);
        let longitude = Array2::from_shape_fn(full_size, |(_, j)| lon_range.0 + j as f64 * lon_step);
        Self {
            full_size,
            latitude,
            longitude,
            geopotential: None,
            landsea_mask: None,
            global: false,
        }
    }

    pub fn with_global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    pub fn with_geopotential(mut self, geopotential: Array2<f32>) -> Self {
        self.geopotential = Some(geopotential);
        self
    }

    pub fn with_landsea_mask(mut self, mask: Array2<f32>) -> Self {
        self.landsea_mask = Some(mask);
        self
    }

    /// Latitude of each row, read from the first column
    pub fn lat_axis(&self) -> Vec<f64> {
        self.latitude.column(0).to_vec()
    }

    /// Longitude of each column, read from the first row
    pub fn lon_axis(&self) -> Vec<f64> {
        self.longitude.row(0).to_vec()
    }

    /// Mean spacing between two rows, in degrees
    pub fn resolution(&self) -> f64 {
        let lats = self.lat_axis();
        if lats.len() < 2 {
            return f64::INFINITY;
        }
        ((lats[lats.len() - 1] - lats[0]) / (lats.len() - 1) as f64).abs()
    }

    /// `[lon_min, lon_max, lat_min, lat_max]`
    pub fn limits(&self) -> [f64; 4] {
        limits_of(self.latitude.view(), self.longitude.view())
    }

    fn check(&self, name: &str) -> Result<()> {
        let expected = [self.full_size.0, self.full_size.1];
        for (what, shape) in [
            ("latitude", Some(self.latitude.shape())),
            ("longitude", Some(self.longitude.shape())),
            ("geopotential", self.geopotential.as_ref().map(|a| a.shape())),
            ("landsea_mask", self.landsea_mask.as_ref().map(|a| a.shape())),
        ] {
            if let Some(shape) = shape {
                if shape != expected {
                    return Err(DatasetError::configuration(format!(
                        "Grid {}: {} has shape {:?}, full size is {:?}",
                        name, what, shape, expected
                    )));
                }
            }
        }
        Ok(())
    }
}

fn step(range: (f64, f64), n: usize) -> f64 {
    if n > 1 {
        (range.1 - range.0) / (n - 1) as f64
    } else {
        0.0
    }
}

fn limits_of(lat: ArrayView2<f64>, lon: ArrayView2<f64>) -> [f64; 4] {
    let fold = |a: ArrayView2<f64>| {
        a.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
    };
    let (lon_min, lon_max) = fold(lon);
    let (lat_min, lat_max) = fold(lat);
    [lon_min, lon_max, lat_min, lat_max]
}

/// Map projection descriptor, carried for downstream plotting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub proj_name: String,
    #[serde(default)]
    pub projection_kwargs: Map<String, Value>,
}

/// A grid cropped to its configured subdomain. Immutable once built and
/// shared by every parameter delivered on it.
#[derive(Debug, Clone)]
pub struct Grid {
    pub name: String,
    pub border_size: usize,
    /// `[row_start, row_end, col_start, col_end]`
    pub subdomain: [usize; 4],
    pub projection: Projection,
    full_size: (usize, usize),
    full_limits: [f64; 4],
    lat: Array2<f64>,
    lon: Array2<f64>,
    geopotential: Array2<f32>,
    landsea_mask: Option<Array2<f32>>,
    border_mask: Array2<f32>,
    grid_limits: [f64; 4],
}

impl Grid {
    pub fn new(spec: &GridSpec, config: GridConfig) -> Result<Self> {
        config.check(&spec.name)?;
        let (rows, cols) = config.full_size;
        let subdomain = spec.subdomain.unwrap_or([0, rows, 0, cols]);
        let [r0, r1, c0, c1] = subdomain;
        if r1 > rows || c1 > cols || r0 >= r1 || c0 >= c1 {
            return Err(DatasetError::configuration(format!(
                "Subdomain {:?} does not fit grid {} of size {:?}",
                subdomain, spec.name, config.full_size
            )));
        }

        let crop_f64 = |a: &Array2<f64>| a.slice(s![r0..r1, c0..c1]).to_owned();
        let crop_f32 = |a: &Array2<f32>| a.slice(s![r0..r1, c0..c1]).to_owned();
        let lat = crop_f64(&config.latitude);
        let lon = crop_f64(&config.longitude);
        let shape = lat.dim();
        let geopotential = config
            .geopotential
            .as_ref()
            .map(crop_f32)
            .unwrap_or_else(|| Array2::zeros(shape));
        let landsea_mask = config.landsea_mask.as_ref().map(crop_f32);
        let border_mask = border_mask(shape, spec.border_size);
        let grid_limits = limits_of(lat.view(), lon.view());

        Ok(Self {
            name: spec.name.clone(),
            border_size: spec.border_size,
            subdomain,
            projection: Projection {
                proj_name: spec.proj_name.clone(),
                projection_kwargs: spec.projection_kwargs.clone(),
            },
            full_size: config.full_size,
            full_limits: config.limits(),
            lat,
            lon,
            geopotential,
            landsea_mask,
            border_mask,
            grid_limits,
        })
    }

    /// (lat, lon) size of the subdomain
    pub fn shape(&self) -> (usize, usize) {
        self.lat.dim()
    }

    pub fn full_size(&self) -> (usize, usize) {
        self.full_size
    }

    /// `[lon_min, lon_max, lat_min, lat_max]` of the subdomain
    pub fn grid_limits(&self) -> [f64; 4] {
        self.grid_limits
    }

    /// `[lon_min, lon_max, lat_min, lat_max]` of the complete grid
    pub fn full_limits(&self) -> [f64; 4] {
        self.full_limits
    }

    pub fn lat(&self) -> &Array2<f64> {
        &self.lat
    }

    pub fn lon(&self) -> &Array2<f64> {
        &self.lon
    }

    pub fn geopotential(&self) -> &Array2<f32> {
        &self.geopotential
    }

    pub fn landsea_mask(&self) -> Option<&Array2<f32>> {
        self.landsea_mask.as_ref()
    }

    pub fn border_mask(&self) -> &Array2<f32> {
        &self.border_mask
    }

    /// Crop a full-size field to the subdomain
    pub fn crop_subdomain(&self, field: ArrayView2<f32>) -> Result<Array2<f32>> {
        if field.dim() != self.full_size {
            return Err(DatasetError::shape_mismatch(
                format!("subdomain crop on grid {}", self.name),
                &[self.full_size.0, self.full_size.1],
                field.shape(),
            ));
        }
        let [r0, r1, c0, c1] = self.subdomain;
        Ok(field.slice(s![r0..r1, c0..c1]).to_owned())
    }

    /// Static features of the grid on `(lat, lon, features)`
    pub fn static_features(&self, add_landsea_mask: bool) -> Result<Statics> {
        let (rows, cols) = self.shape();
        let mut layers: Vec<(&str, Array2<f32>)> = vec![
            ("lat", self.lat.mapv(|v| v as f32)),
            ("lon", self.lon.mapv(|v| v as f32)),
            ("geopotential", self.geopotential.clone()),
            ("border_mask", self.border_mask.clone()),
        ];
        if add_landsea_mask {
            let mask = self.landsea_mask.as_ref().ok_or_else(|| {
                DatasetError::configuration(format!(
                    "add_landsea_mask is set but grid {} has no land-sea mask",
                    self.name
                ))
            })?;
            layers.push(("LandSeaMask", mask.clone()));
        }

        let mut stacked = Array3::<f32>::zeros((rows, cols, layers.len()));
        for (k, (_, layer)) in layers.iter().enumerate() {
            stacked.index_axis_mut(Axis(2), k).assign(layer);
        }
        let names: Vec<&str> = layers.iter().map(|(n, _)| *n).collect();
        let grid_statics = NamedTensor::from_array(stacked, &[LAT, LON, FEATURES], &names)?;

        Ok(Statics {
            interior_mask: self.border_mask.mapv(|v| 1.0 - v),
            border_mask: self.border_mask.clone(),
            grid_shape: (rows, cols),
            grid_statics,
        })
    }
}

/// 1 within `border_size` cells of the edge, 0 elsewhere
fn border_mask(shape: (usize, usize), border_size: usize) -> Array2<f32> {
    let (rows, cols) = shape;
    Array2::from_shape_fn(shape, |(i, j)| {
        let inside = i >= border_size
            && j >= border_size
            && i + border_size < rows
            && j + border_size < cols;
        if inside {
            0.0
        } else {
            1.0
        }
    })
}

/// Static fields of a dataset grid
#[derive(Debug, Clone)]
pub struct Statics {
    pub grid_statics: NamedTensor,
    pub grid_shape: (usize, usize),
    pub border_mask: Array2<f32>,
    pub interior_mask: Array2<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(border_size: usize, subdomain: Option<[usize; 4]>) -> GridSpec {
        GridSpec {
            name: "testgrid".to_string(),
            border_size,
            subdomain,
            proj_name: "PlateCarree".to_string(),
            projection_kwargs: Map::new(),
        }
    }

    #[test]
    fn test_subdomain_crop_and_limits() {
        let config = GridConfig::regular((50.0, 41.0), (-5.0, 4.0), (10, 10));
        let grid = Grid::new(&spec(0, Some([2, 6, 1, 4])), config).unwrap();
        assert_eq!(grid.shape(), (4, 3));
        assert_eq!(grid.grid_limits(), [-4.0, -2.0, 45.0, 48.0]);
        assert_eq!(grid.full_limits(), [-5.0, 4.0, 41.0, 50.0]);
    }

    #[test]
    fn test_subdomain_out_of_bounds() {
        let config = GridConfig::regular((50.0, 41.0), (-5.0, 4.0), (10, 10));
        assert!(Grid::new(&spec(0, Some([0, 11, 0, 4])), config).is_err());
    }

    #[test]
    fn test_border_mask() {
        let mask = border_mask((5, 6), 1);
        assert_eq!(mask.sum(), (30 - 3 * 4) as f32);
        assert_eq!(mask[[0, 0]], 1.0);
        assert_eq!(mask[[2, 2]], 0.0);
        assert_eq!(border_mask((3, 3), 0).sum(), 0.0);
    }

    #[test]
    fn test_static_features() {
        let config = GridConfig::regular((50.0, 41.0), (-5.0, 4.0), (10, 10));
        let grid = Grid::new(&spec(2, None), config).unwrap();
        let statics = grid.static_features(false).unwrap();
        assert_eq!(statics.grid_statics.shape(), &[10, 10, 4]);
        assert_eq!(
            statics.grid_statics.feature_names(),
            &["lat", "lon", "geopotential", "border_mask"]
        );
        assert_eq!(statics.interior_mask.sum(), 36.0);
        assert!(grid.static_features(true).is_err());
    }

    #[test]
    fn test_landsea_mask_feature() {
        let config = GridConfig::regular((50.0, 41.0), (-5.0, 4.0), (10, 10))
            .with_landsea_mask(Array2::ones((10, 10)));
        let grid = Grid::new(&spec(0, Some([0, 5, 0, 5])), config).unwrap();
        let statics = grid.static_features(true).unwrap();
        assert_eq!(statics.grid_statics.feature_names().last().unwrap(), "LandSeaMask");
        assert_eq!(statics.grid_statics.shape(), &[5, 5, 5]);
    }
}
