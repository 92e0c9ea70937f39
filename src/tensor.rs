//! Dimension-labeled tensors.
//!
//! A [`NamedTensor`] pairs an `f32` array with one name per axis and one name
//! per entry of the trailing `features` axis. Every combining operation aligns
//! on axis names and fails with a contract violation rather than coercing
//! shapes.

use crate::error::{DatasetError, Result};
use ndarray::{concatenate, stack, Array, ArrayD, ArrayViewD, Axis, Dimension, IxDyn, Slice};
use num_traits::AsPrimitive;

pub const BATCH: &str = "batch";
pub const TIMESTEP: &str = "timestep";
pub const LAT: &str = "lat";
pub const LON: &str = "lon";
pub const FEATURES: &str = "features";

#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    tensor: ArrayD<f32>,
    names: Vec<String>,
    feature_names: Vec<String>,
}

fn to_strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

impl NamedTensor {
    pub fn new(tensor: ArrayD<f32>, names: Vec<String>, feature_names: Vec<String>) -> Result<Self> {
        if names.len() != tensor.ndim() {
            return Err(DatasetError::ContractViolation {
                message: "one name per axis is required".to_string(),
                parameter: None,
                timestamp: None,
                expected: format!("{} names", tensor.ndim()),
                actual: format!("{:?}", names),
            });
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(DatasetError::configuration(format!(
                    "Duplicate dimension name {} in {:?}",
                    name, names
                )));
            }
        }
        if names.last().map(String::as_str) != Some(FEATURES) {
            return Err(DatasetError::axis_mismatch(
                "the features axis must be last",
                &[FEATURES.to_string()],
                &names,
            ));
        }
        let n_features = tensor.shape()[tensor.ndim() - 1];
        if n_features != feature_names.len() {
            return Err(DatasetError::shape_mismatch(
                format!("feature names {:?} vs features axis", feature_names),
                &[feature_names.len()],
                &[n_features],
            ));
        }
        for (i, feature) in feature_names.iter().enumerate() {
            if feature_names[..i].contains(feature) {
                return Err(DatasetError::feature_mismatch(
                    format!("duplicate feature {}", feature),
                    &feature_names[..i],
                    &feature_names,
                ));
            }
        }
        Ok(Self {
            tensor,
            names,
            feature_names,
        })
    }

    /// Build from an array of any numeric element type, converted to `f32`.
    pub fn from_array<T, D>(array: Array<T, D>, names: &[&str], feature_names: &[&str]) -> Result<Self>
    where
        T: AsPrimitive<f32>,
        D: Dimension,
    {
        let tensor = array.mapv(|v| v.as_()).into_dyn();
        Self::new(tensor, to_strings(names), to_strings(feature_names))
    }

    pub fn tensor(&self) -> &ArrayD<f32> {
        &self.tensor
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn shape(&self) -> &[usize] {
        self.tensor.shape()
    }

    pub fn ndim(&self) -> usize {
        self.tensor.ndim()
    }

    pub fn dim_index(&self, name: &str) -> Result<usize> {
        self.names.iter().position(|n| n == name).ok_or_else(|| {
            DatasetError::axis_mismatch(
                format!("dimension {} not found", name),
                &[name.to_string()],
                &self.names,
            )
        })
    }

    pub fn dim_size(&self, name: &str) -> Result<usize> {
        Ok(self.tensor.shape()[self.dim_index(name)?])
    }

    /// View of a single feature, the features axis kept with size 1.
    pub fn feature(&self, feature_name: &str) -> Result<ArrayViewD<'_, f32>> {
        let idx = self
            .feature_names
            .iter()
            .position(|f| f == feature_name)
            .ok_or_else(|| {
                DatasetError::feature_mismatch(
                    format!("feature {} not found", feature_name),
                    &[feature_name.to_string()],
                    &self.feature_names,
                )
            })?;
        let axis = Axis(self.ndim() - 1);
        Ok(self.tensor.slice_axis(axis, Slice::from(idx..idx + 1)))
    }

    /// Concatenate along the features axis. All tensors must share the same
    /// dimension names and the same size on every non-feature axis.
    pub fn concat(tensors: &[NamedTensor]) -> Result<NamedTensor> {
        let first = tensors.first().ok_or_else(|| {
            DatasetError::configuration("Cannot concatenate an empty list of tensors")
        })?;
        let n = first.ndim();
        for other in &tensors[1..] {
            if other.names != first.names {
                return Err(DatasetError::axis_mismatch("concat", &first.names, &other.names));
            }
            if other.shape()[..n - 1] != first.shape()[..n - 1] {
                return Err(DatasetError::shape_mismatch(
                    format!("concat of {:?} onto {:?}", other.feature_names, first.feature_names),
                    first.shape(),
                    other.shape(),
                ));
            }
        }
        let views: Vec<ArrayViewD<f32>> = tensors.iter().map(|t| t.tensor.view()).collect();
        let tensor = concatenate(Axis(n - 1), &views)?;
        let feature_names = tensors
            .iter()
            .flat_map(|t| t.feature_names.iter().cloned())
            .collect();
        NamedTensor::new(tensor, first.names.clone(), feature_names)
    }

    /// Stack along a new leading axis named `dim_name`. Dimension and feature
    /// names must be identical across all tensors.
    pub fn stack(tensors: &[NamedTensor], dim_name: &str) -> Result<NamedTensor> {
        let first = tensors.first().ok_or_else(|| {
            DatasetError::configuration("Cannot stack an empty list of tensors")
        })?;
        if first.names.iter().any(|n| n == dim_name) {
            return Err(DatasetError::axis_mismatch(
                format!("stack: {} already present", dim_name),
                &[],
                &first.names,
            ));
        }
        for other in &tensors[1..] {
            if other.names != first.names {
                return Err(DatasetError::axis_mismatch("stack", &first.names, &other.names));
            }
            if other.feature_names != first.feature_names {
                return Err(DatasetError::feature_mismatch(
                    "stack",
                    &first.feature_names,
                    &other.feature_names,
                ));
            }
            if other.shape() != first.shape() {
                return Err(DatasetError::shape_mismatch("stack", first.shape(), other.shape()));
            }
        }
        let views: Vec<ArrayViewD<f32>> = tensors.iter().map(|t| t.tensor.view()).collect();
        let tensor = stack(Axis(0), &views)?;
        let mut names = Vec::with_capacity(first.names.len() + 1);
        names.push(dim_name.to_string());
        names.extend(first.names.iter().cloned());
        NamedTensor::new(tensor, names, first.feature_names.clone())
    }

    /// Insert a new axis of size 1 named `dim_name` at `index`.
    pub fn unsqueeze(&mut self, dim_name: &str, index: usize) -> Result<()> {
        if self.names.iter().any(|n| n == dim_name) {
            return Err(DatasetError::axis_mismatch(
                format!("unsqueeze: {} already present", dim_name),
                &[],
                &self.names,
            ));
        }
        if index >= self.ndim() {
            return Err(DatasetError::configuration(format!(
                "Cannot insert {} at {}: the features axis must stay last",
                dim_name, index
            )));
        }
        let tensor = std::mem::replace(&mut self.tensor, ArrayD::zeros(IxDyn(&[0])));
        self.tensor = tensor.insert_axis(Axis(index));
        self.names.insert(index, dim_name.to_string());
        Ok(())
    }

    /// Remove a size-1 axis by name.
    pub fn squeeze(&mut self, dim_name: &str) -> Result<()> {
        let idx = self.dim_index(dim_name)?;
        if dim_name == FEATURES || self.tensor.shape()[idx] != 1 {
            return Err(DatasetError::shape_mismatch(
                format!("squeeze {}", dim_name),
                &[1],
                &[self.tensor.shape()[idx]],
            ));
        }
        let tensor = std::mem::replace(&mut self.tensor, ArrayD::zeros(IxDyn(&[0])));
        self.tensor = tensor.index_axis_move(Axis(idx), 0);
        self.names.remove(idx);
        Ok(())
    }

    /// For every axis of `other` missing here, insert it at the position it
    /// has in `other` and broadcast it to `other`'s size. Axes already present
    /// keep their size.
    pub fn unsqueeze_and_expand_from(&mut self, other: &NamedTensor) -> Result<()> {
        for (i, name) in other.names.iter().enumerate() {
            if self.names.contains(name) {
                continue;
            }
            let index = i.min(self.ndim() - 1);
            self.unsqueeze(name, index)?;
            let mut shape = self.tensor.shape().to_vec();
            shape[index] = other.shape()[i];
            let expanded = self
                .tensor
                .broadcast(IxDyn(&shape))
                .ok_or_else(|| {
                    DatasetError::shape_mismatch(
                        format!("expand {}", name),
                        &shape,
                        self.tensor.shape(),
                    )
                })?
                .to_owned();
            self.tensor = expanded;
        }
        Ok(())
    }

    /// Smallest and largest value of one feature
    pub fn feature_range(&self, feature_name: &str) -> Result<(f32, f32)> {
        let view = self.feature(feature_name)?;
        Ok(view.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array4};

    fn state(features: &[&str], steps: usize) -> NamedTensor {
        let arr = Array4::<f32>::ones((steps, 3, 4, features.len()));
        NamedTensor::from_array(arr, &[TIMESTEP, LAT, LON, FEATURES], features).unwrap()
    }

    #[test]
    fn test_new_rejects_feature_count_mismatch() {
        let arr = Array4::<f32>::zeros((1, 2, 2, 2)).into_dyn();
        let result = NamedTensor::new(
            arr,
            to_strings(&[TIMESTEP, LAT, LON, FEATURES]),
            to_strings(&["a"]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_concat_appends_features() {
        let a = state(&["t_850hpa"], 2);
        let b = state(&["u_10m", "v_10m"], 2);
        let c = NamedTensor::concat(&[a, b]).unwrap();
        assert_eq!(c.shape(), &[2, 3, 4, 3]);
        assert_eq!(c.feature_names(), &["t_850hpa", "u_10m", "v_10m"]);
    }

    #[test]
    fn test_concat_rejects_timestep_mismatch() {
        let a = state(&["a"], 2);
        let b = state(&["b"], 3);
        assert!(NamedTensor::concat(&[a, b]).is_err());
    }

    #[test]
    fn test_unsqueeze_and_expand_from() {
        let mut forcing = NamedTensor::from_array(
            Array2::<f32>::from_elem((2, 2), 0.5),
            &[TIMESTEP, FEATURES],
            &["cos_hour", "sin_hour"],
        )
        .unwrap();
        let reference = state(&["t"], 1);
        forcing.unsqueeze_and_expand_from(&reference).unwrap();
        assert_eq!(forcing.names(), &[TIMESTEP, LAT, LON, FEATURES]);
        assert_eq!(forcing.shape(), &[2, 3, 4, 2]);
        assert!(forcing.tensor().iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_squeeze_round_trip() {
        let mut t = state(&["t"], 2);
        t.unsqueeze(BATCH, 0).unwrap();
        assert_eq!(t.dim_size(BATCH).unwrap(), 1);
        t.squeeze(BATCH).unwrap();
        assert_eq!(t.shape(), &[2, 3, 4, 1]);
    }

    #[test]
    fn test_squeeze_inner_axis_keeps_values() {
        let arr = Array4::from_shape_fn((2, 1, 3, 1), |(t, _, j, _)| (t * 3 + j) as f32);
        let mut tensor = NamedTensor::from_array(arr, &[TIMESTEP, LAT, LON, FEATURES], &["x"]).unwrap();
        tensor.squeeze(LAT).unwrap();
        assert_eq!(tensor.names(), &[TIMESTEP, LON, FEATURES]);
        assert_eq!(tensor.tensor()[&[1, 2, 0][..]], 5.0);
        assert!(tensor.squeeze(LON).is_err());
        assert!(tensor.squeeze(FEATURES).is_err());
    }

    #[test]
    fn test_feature_range() {
        let arr = Array4::from_shape_fn((2, 1, 2, 2), |(t, _, j, f)| (t * 10 + j) as f32 - f as f32 * 100.0);
        let tensor = NamedTensor::from_array(arr, &[TIMESTEP, LAT, LON, FEATURES], &["a", "b"]).unwrap();
        assert_eq!(tensor.feature_range("a").unwrap(), (0.0, 11.0));
        assert_eq!(tensor.feature_range("b").unwrap(), (-100.0, -89.0));
        assert!(tensor.feature_range("c").is_err());
    }

    #[test]
    fn test_feature_view_keeps_axis() {
        let t = state(&["a", "b"], 2);
        assert_eq!(t.feature("b").unwrap().shape(), &[2, 3, 4, 1]);
        assert!(t.feature("c").is_err());
    }
}
