//! Pre-sliced NumPy array files.
//!
//! Layout under the archive root:
//!
//! ```text
//! metadata.json                     grids and parameters
//! grids/<grid>/geopotential.npy     optional static fields
//! grids/<grid>/landsea_mask.npy
//! data/YYYYMMDDHH/<short_name>.<file_format>
//! ```
//!
//! Each data file holds one parameter at one validity time as a `.npy`
//! array of `f32` or `f64`, shaped `(lat, lon)` or `(member, lat, lon)`.
//! Values are converted to `f32` on read.

use super::common::{dataset_dir_name, param_file};
use super::DataAccessor;
use crate::error::{DatasetError, Result};
use crate::grid::{Grid, GridConfig};
use crate::params::{ParamConfig, WeatherParam};
use crate::time_utils::{format_date_stamp, Timestamps};
use ndarray::{Array2, Array3, ArrayD, ArrayViewD, Axis, Ix2};
use ndarray_npy::{write_npy, ReadNpyError, ReadNpyExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STATIC_EXTENSION: &str = "npy";
pub const METADATA_FILE: &str = "metadata.json";

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
/// Smallest element stored: `f32`
const MIN_ELEMENT_BYTES: u64 = 4;

/// Precision an array is written with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    F64,
}

fn invalid(path: &Path, actual: impl Into<String>) -> DatasetError {
    DatasetError::ContractViolation {
        message: format!("unreadable array file {}", path.display()),
        parameter: None,
        timestamp: None,
        expected: "a 2-D or 3-D f32/f64 NumPy array".to_string(),
        actual: actual.into(),
    }
}

/// Write `array` to `path` as `.npy` in the given precision
pub fn write_array_file(path: &Path, array: ArrayViewD<f32>, dtype: DType) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match dtype {
        DType::F32 => write_npy(path, &array)?,
        DType::F64 => write_npy(path, &array.mapv(f64::from))?,
    }
    Ok(())
}

/// Dimensions listed under `'shape'` in a `.npy` header dictionary
fn header_shape(header: &str) -> Option<Vec<u64>> {
    let rest = &header[header.find("'shape'")?..];
    let open = rest.find('(')?;
    let close = open + rest[open..].find(')')?;
    rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| dim.parse().ok())
        .collect()
}

/// The values a header declares must fit in the bytes that follow it, so a
/// corrupt header never drives an allocation.
fn check_declared_size(path: &Path) -> Result<()> {
    let file_len = fs::metadata(path)?.len();
    let mut reader = BufReader::new(File::open(path)?);
    let mut preamble = [0u8; 8];
    reader
        .read_exact(&mut preamble)
        .map_err(|_| invalid(path, format!("{} bytes", file_len)))?;
    if &preamble[..6] != NPY_MAGIC {
        return Err(invalid(path, "no NumPy magic string"));
    }

    let (prefix_len, header_len) = if preamble[6] == 1 {
        let mut len = [0u8; 2];
        reader.read_exact(&mut len).map_err(|_| invalid(path, "truncated header"))?;
        (10u64, u16::from_le_bytes(len) as u64)
    } else {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len).map_err(|_| invalid(path, "truncated header"))?;
        (12u64, u32::from_le_bytes(len) as u64)
    };
    let data_len = file_len
        .checked_sub(prefix_len + header_len)
        .ok_or_else(|| invalid(path, format!("header of {} bytes in a {} byte file", header_len, file_len)))?;

    let mut header = vec![0u8; header_len as usize];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8_lossy(&header);
    let shape = header_shape(&header).ok_or_else(|| invalid(path, format!("header {}", header.trim())))?;

    let declared = shape
        .iter()
        .try_fold(1u64, |acc, &dim| acc.checked_mul(dim))
        .and_then(|count| count.checked_mul(MIN_ELEMENT_BYTES));
    match declared {
        Some(bytes) if bytes <= data_len => Ok(()),
        _ => Err(DatasetError::ContractViolation {
            message: format!("{} declares more values than it holds", path.display()),
            parameter: None,
            timestamp: None,
            expected: format!("at most {} data bytes", data_len),
            actual: format!("shape {:?}", shape),
        }),
    }
}

/// Read an `f32` or `f64` `.npy` file, converting values to `f32`
pub fn read_array_file(path: &Path) -> Result<ArrayD<f32>> {
    check_declared_size(path)?;
    let array = match ArrayD::<f32>::read_npy(File::open(path)?) {
        Ok(array) => array,
        Err(ReadNpyError::WrongDescriptor(_)) => {
            ArrayD::<f64>::read_npy(File::open(path)?)?.mapv(|v| v as f32)
        }
        Err(e) => return Err(e.into()),
    };
    if !(2..=3).contains(&array.ndim()) {
        return Err(invalid(path, format!("shape {:?}", array.shape())));
    }
    Ok(array)
}

/// Regular grid entry of `metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegularGridMetadata {
    pub lat_range: [f64; 2],
    pub lon_range: [f64; 2],
    pub full_size: [usize; 2],
    #[serde(default)]
    pub global: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub grids: BTreeMap<String, RegularGridMetadata>,
    pub params: BTreeMap<String, ParamConfig>,
}

impl ArchiveMetadata {
    pub fn save(&self, root: &Path) -> Result<()> {
        fs::create_dir_all(root)?;
        fs::write(root.join(METADATA_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ArrayFileAccessor {
    root: PathBuf,
    cache_root: PathBuf,
    metadata: ArchiveMetadata,
}

impl ArrayFileAccessor {
    /// Open an archive, reading its `metadata.json`
    pub fn open(root: &Path, cache_root: &Path) -> Result<Self> {
        let path = root.join(METADATA_FILE);
        let text = fs::read_to_string(&path).map_err(|e| {
            DatasetError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let metadata: ArchiveMetadata = serde_json::from_str(&text)?;
        debug!(
            "Opened array archive {} ({} grids, {} parameters)",
            root.display(),
            metadata.grids.len(),
            metadata.params.len()
        );
        Ok(Self {
            root: root.to_path_buf(),
            cache_root: cache_root.to_path_buf(),
            metadata,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn static_field(&self, grid: &str, field: &str, full_size: (usize, usize)) -> Result<Option<Array2<f32>>> {
        let path = self
            .root
            .join("grids")
            .join(grid)
            .join(format!("{}.{}", field, STATIC_EXTENSION));
        if !path.exists() {
            return Ok(None);
        }
        let array = read_array_file(&path)?.into_dimensionality::<Ix2>()?;
        if array.dim() != full_size {
            return Err(invalid(&path, format!("shape {:?}, grid is {:?}", array.dim(), full_size)));
        }
        Ok(Some(array))
    }

    fn read_field(&self, path: &Path, short_name: &str, timestamp: &str, member: usize) -> Result<Array2<f32>> {
        let array = match read_array_file(path) {
            Ok(array) => array,
            Err(DatasetError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DatasetError::missing_data(short_name, timestamp, path.display().to_string()));
            }
            Err(e) => return Err(e),
        };
        let field = match array.ndim() {
            2 if member == 0 => array,
            3 if member < array.shape()[0] => array.index_axis_move(Axis(0), member),
            _ => {
                return Err(DatasetError::ContractViolation {
                    message: format!("member {} not stored in {}", member, path.display()),
                    parameter: Some(short_name.to_string()),
                    timestamp: Some(timestamp.to_string()),
                    expected: format!("member axis longer than {}", member),
                    actual: format!("shape {:?}", array.shape()),
                });
            }
        };
        Ok(field.into_dimensionality::<Ix2>()?)
    }
}

impl DataAccessor for ArrayFileAccessor {
    fn load_grid_info(&self, name: &str) -> Result<GridConfig> {
        let meta = self.metadata.grids.get(name).ok_or_else(|| {
            DatasetError::configuration(format!(
                "Grid {} not described in {}",
                name,
                self.root.join(METADATA_FILE).display()
            ))
        })?;
        let full_size = (meta.full_size[0], meta.full_size[1]);
        let mut config = GridConfig::regular(
            (meta.lat_range[0], meta.lat_range[1]),
            (meta.lon_range[0], meta.lon_range[1]),
            full_size,
        )
        .with_global(meta.global);
        config.geopotential = self.static_field(name, "geopotential", full_size)?;
        config.landsea_mask = self.static_field(name, "landsea_mask", full_size)?;
        Ok(config)
    }

    fn load_parameter_info(&self, name: &str) -> Result<ParamConfig> {
        self.metadata.params.get(name).cloned().ok_or_else(|| {
            DatasetError::configuration(format!(
                "Parameter {} not described in {}",
                name,
                self.root.join(METADATA_FILE).display()
            ))
        })
    }

    fn dataset_cache_path(&self, dataset_name: &str, grid: &Grid) -> PathBuf {
        self.cache_root.join(dataset_dir_name(dataset_name, grid))
    }

    fn exists(
        &self,
        _dataset_name: &str,
        param: &WeatherParam,
        timestamps: &Timestamps,
        file_format: &str,
    ) -> bool {
        timestamps
            .validity_times
            .iter()
            .all(|t| param_file(&self.root, t, param, file_format).is_file())
    }

    fn load_raw(
        &self,
        _dataset_name: &str,
        param: &WeatherParam,
        timestamps: &Timestamps,
        member: usize,
        file_format: &str,
    ) -> Result<Array3<f32>> {
        let short_name = param.short_name();
        let mut fields = Vec::with_capacity(timestamps.len());
        for t in &timestamps.validity_times {
            let path = param_file(&self.root, t, param, file_format);
            fields.push(self.read_field(&path, &short_name, &format_date_stamp(t), member)?);
        }
        let views: Vec<_> = fields.iter().map(|f| f.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};
    use tempfile::tempdir;

    /// `.npy` bytes laid out the way NumPy writes a little-endian f32 array
    fn numpy_f32_bytes(shape: &str, values: &[f32]) -> Vec<u8> {
        let mut header = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': {}, }}", shape);
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_reads_numpy_written_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t_500hpa.npy");
        fs::write(&path, numpy_f32_bytes("(2, 2)", &[1.0, 2.0, 3.0, 4.0])).unwrap();
        let read = read_array_file(&path).unwrap();
        assert_eq!(read, array![[1.0f32, 2.0], [3.0, 4.0]].into_dyn());
    }

    #[test]
    fn test_write_read_f64_converts_to_f32() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("field.npy");
        let array = Array::from_shape_fn((3, 4), |(i, j)| (i * 4 + j) as f32 * 0.5).into_dyn();
        write_array_file(&path, array.view(), DType::F64).unwrap();
        let read = read_array_file(&path).unwrap();
        assert_eq!(read, array);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.npy");
        fs::write(&path, b"NOPE\0\x02\0\0\0\0").unwrap();
        assert!(matches!(read_array_file(&path), Err(DatasetError::ContractViolation { .. })));
    }

    #[test]
    fn test_rejects_rank_four() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rank4.npy");
        let array = ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 1, 2, 2]));
        write_array_file(&path, array.view(), DType::F32).unwrap();
        assert!(matches!(read_array_file(&path), Err(DatasetError::ContractViolation { .. })));
    }

    #[test]
    fn test_oversized_header_shapes_are_rejected() {
        let dir = tempdir().unwrap();
        let overflowing = dir.path().join("overflow.npy");
        fs::write(&overflowing, numpy_f32_bytes("(1099511627776, 1099511627776)", &[0.0])).unwrap();
        assert!(matches!(
            read_array_file(&overflowing),
            Err(DatasetError::ContractViolation { .. })
        ));

        let truncated = dir.path().join("truncated.npy");
        fs::write(&truncated, numpy_f32_bytes("(1048576, 1048576)", &[0.0; 4])).unwrap();
        assert!(matches!(
            read_array_file(&truncated),
            Err(DatasetError::ContractViolation { .. })
        ));
    }

    #[test]
    fn test_header_shape() {
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (2, 16, 16), }";
        assert_eq!(header_shape(header), Some(vec![2, 16, 16]));
        assert_eq!(header_shape("{'shape': (5,), }"), Some(vec![5]));
        assert_eq!(header_shape("{'descr': '<f4'}"), None);
    }
}
