//! Samples and items.
//!
//! A [`Sample`] is a light description of one training example: its
//! timestamps, its ensemble member and shared handles to everything needed
//! to check and load it. Loading yields an [`Item`].

use crate::config::SamplePreprocSettings;
use crate::data_io::DataAccessor;
use crate::error::{DatasetError, Result};
use crate::forcing::generate_forcings;
use crate::grid::Grid;
use crate::params::{ParamKind, WeatherParam};
use crate::stats::Stats;
use crate::table::render_table;
use crate::tensor::{NamedTensor, FEATURES, LAT, LON, TIMESTEP};
use crate::time_utils::{format_date_stamp, Timestamps};
use chrono::{DateTime, Utc};
use ndarray::{s, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Shared, immutable handles every sample of a dataset split refers to
#[derive(Clone)]
pub struct SampleContext {
    pub settings: Arc<SamplePreprocSettings>,
    pub params: Arc<Vec<WeatherParam>>,
    pub stats: Arc<Stats>,
    pub grid: Arc<Grid>,
    pub accessor: Arc<dyn DataAccessor>,
}

impl fmt::Debug for SampleContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SampleContext")
            .field("settings", &self.settings)
            .field("params", &self.params.len())
            .field("grid", &self.grid.name)
            .finish()
    }
}

/// Identifies a sample independently of the handles it carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleKey {
    pub reference_time: DateTime<Utc>,
    pub member: usize,
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_mb{:03}", format_date_stamp(&self.reference_time), self.member)
    }
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub timestamps: Timestamps,
    pub input_timestamps: Timestamps,
    pub output_timestamps: Timestamps,
    pub member: usize,
    context: SampleContext,
}

impl Sample {
    pub fn new(reference_time: DateTime<Utc>, member: usize, context: SampleContext) -> Result<Self> {
        let settings = &context.settings;
        let timestamps = Timestamps::for_sample(
            reference_time,
            settings.num_input_steps,
            settings.num_pred_steps,
            settings.step_duration,
        );
        Self::from_timestamps(timestamps, member, context)
    }

    /// Build from explicit timestamps, which must cover exactly the input
    /// and predicted steps of the settings.
    pub fn from_timestamps(timestamps: Timestamps, member: usize, context: SampleContext) -> Result<Self> {
        let expected = context.settings.num_input_steps + context.settings.num_pred_steps;
        if timestamps.len() != expected {
            return Err(DatasetError::ContractViolation {
                message: "terms do not match input + output steps".to_string(),
                parameter: None,
                timestamp: Some(timestamps.datetime.to_string()),
                expected: format!("{} terms", expected),
                actual: format!("{:?}", timestamps.terms),
            });
        }
        let (input_timestamps, output_timestamps) = timestamps.split(context.settings.num_input_steps);
        Ok(Self {
            timestamps,
            input_timestamps,
            output_timestamps,
            member,
            context,
        })
    }

    pub fn key(&self) -> SampleKey {
        SampleKey {
            reference_time: self.timestamps.datetime,
            member: self.member,
        }
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.timestamps.datetime
    }

    pub fn input_terms(&self) -> &[i64] {
        &self.input_timestamps.terms
    }

    pub fn output_terms(&self) -> &[i64] {
        &self.output_timestamps.terms
    }

    pub fn params(&self) -> &[WeatherParam] {
        &self.context.params
    }

    /// Timestamps a parameter is read over, given its role. Input-only
    /// parameters are forcings and share the predicted steps of the
    /// generated forcings.
    fn timestamps_for(&self, kind: ParamKind) -> &Timestamps {
        match kind {
            ParamKind::Input => &self.output_timestamps,
            ParamKind::Output => &self.output_timestamps,
            ParamKind::InputOutput => &self.timestamps,
        }
    }

    /// Fails with `MissingData` on the first parameter lacking data
    pub fn check_validity(&self) -> Result<()> {
        let settings = &self.context.settings;
        for param in self.context.params.iter() {
            if !self.context.accessor.exists(
                &settings.dataset_name,
                param,
                self.timestamps_for(param.kind),
                &settings.file_format,
            ) {
                return Err(DatasetError::missing_data(
                    param.short_name(),
                    self.timestamps.datetime.to_string(),
                    "not available at every required timestamp",
                ));
            }
        }
        Ok(())
    }

    /// Whether every parameter exists at every timestamp it is needed.
    /// Missing data means `false`; any other failure is returned.
    pub fn is_valid(&self) -> Result<bool> {
        match self.check_validity() {
            Ok(()) => Ok(true),
            Err(e) if e.is_recoverable() => {
                debug!("{} is not valid: {}", self, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Load inputs, outputs and forcings, standardized when the settings
    /// ask for it.
    pub fn load(&self) -> Result<Item> {
        self.load_with(self.context.settings.standardize)
    }

    /// Load without standardization, values in physical units
    pub fn load_raw(&self) -> Result<Item> {
        self.load_with(false)
    }

    fn fetch(&self, param: &WeatherParam, timestamps: &Timestamps, standardize: bool) -> Result<Array3<f32>> {
        let ctx = &self.context;
        ctx.accessor
            .fetch(
                param,
                &ctx.grid,
                &ctx.stats,
                timestamps,
                &ctx.settings,
                standardize,
                self.member,
            )
            .map_err(|e| {
                let short_name = param.short_name();
                let when = self.timestamps.datetime.to_string();
                if e.is_recoverable() {
                    DatasetError::fetch_after_validation(short_name, when, &e)
                } else {
                    e.with_context(&short_name, &when)
                }
            })
    }

    fn load_with(&self, standardize: bool) -> Result<Item> {
        let n_in = self.context.settings.num_input_steps;
        let n_pred = self.context.settings.num_pred_steps;
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut forced = Vec::new();

        for param in self.context.params.iter() {
            let short_name = param.short_name();
            let values = self.fetch(param, self.timestamps_for(param.kind), standardize)?;
            match param.kind {
                ParamKind::Input => forced.push(state_tensor(values, &short_name)?),
                ParamKind::Output => outputs.push(state_tensor(values, &short_name)?),
                ParamKind::InputOutput => {
                    let total = values.len_of(Axis(0));
                    let input_part = values.slice(s![..n_in, .., ..]).to_owned();
                    let output_part = values.slice(s![total - n_pred.., .., ..]).to_owned();
                    inputs.push(state_tensor(input_part, &short_name)?);
                    outputs.push(state_tensor(output_part, &short_name)?);
                }
            }
        }

        let reference = inputs.first().or(outputs.first()).cloned().ok_or_else(|| {
            DatasetError::configuration("A sample needs at least one parameter")
        })?;
        let mut forcings = generate_forcings(self.timestamps.datetime, self.output_terms(), &self.context.grid)?;
        for forcing in forcings.iter_mut() {
            forcing.unsqueeze_and_expand_from(&reference)?;
        }
        forcings.extend(forced);

        Item::new(
            NamedTensor::concat(&inputs)?,
            NamedTensor::concat(&outputs)?,
            NamedTensor::concat(&forcings)?,
        )
    }
}

fn state_tensor(values: Array3<f32>, short_name: &str) -> Result<NamedTensor> {
    NamedTensor::from_array(
        values.insert_axis(Axis(3)),
        &[TIMESTEP, LAT, LON, FEATURES],
        &[short_name],
    )
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Date {}, input terms {:?}, output terms {:?}",
            self.timestamps.datetime,
            self.input_terms(),
            self.output_terms()
        )?;
        if self.member != 0 {
            write!(f, ", member {}", self.member)?;
        }
        Ok(())
    }
}

/// One loaded sample: inputs, outputs and forcing on
/// `(timestep, lat, lon, features)`
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub inputs: NamedTensor,
    pub outputs: NamedTensor,
    pub forcing: NamedTensor,
}

impl Item {
    /// Inputs and outputs must agree on dimension names and feature names
    pub fn new(inputs: NamedTensor, outputs: NamedTensor, forcing: NamedTensor) -> Result<Self> {
        if inputs.names() != outputs.names() {
            return Err(DatasetError::axis_mismatch(
                "inputs and outputs",
                inputs.names(),
                outputs.names(),
            ));
        }
        if inputs.feature_names() != outputs.feature_names() {
            return Err(DatasetError::feature_mismatch(
                "inputs and outputs",
                inputs.feature_names(),
                outputs.feature_names(),
            ));
        }
        Ok(Self {
            inputs,
            outputs,
            forcing,
        })
    }

    pub fn tensors(&self) -> [(&'static str, &NamedTensor); 3] {
        [
            ("inputs", &self.inputs),
            ("outputs", &self.outputs),
            ("forcing", &self.forcing),
        ]
    }

    /// Insert a size-1 axis named `dim_name` at `index` in all three tensors
    pub fn unsqueeze(&mut self, dim_name: &str, index: usize) -> Result<()> {
        self.inputs.unsqueeze(dim_name, index)?;
        self.outputs.unsqueeze(dim_name, index)?;
        self.forcing.unsqueeze(dim_name, index)
    }

    pub fn squeeze(&mut self, dim_name: &str) -> Result<()> {
        self.inputs.squeeze(dim_name)?;
        self.outputs.squeeze(dim_name)?;
        self.forcing.squeeze(dim_name)
    }

    /// One row per feature: role, dimension names, shape, name, min, max
    pub fn summary(&self) -> Result<String> {
        let mut rows = Vec::new();
        for (role, tensor) in self.tensors() {
            for feature in tensor.feature_names() {
                let shape = tensor.feature(feature)?.shape().to_vec();
                let (min, max) = tensor.feature_range(feature)?;
                rows.push(vec![
                    role.to_string(),
                    format!("{:?}", tensor.names()),
                    format!("{:?}", shape),
                    feature.clone(),
                    format!("{:.4}", min),
                    format!("{:.4}", max),
                ]);
            }
        }
        Ok(render_table(
            &["Type", "Dimension Names", "Shape", "feature name", "Min", "Max"],
            &rows,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn nt(features: &[&str], steps: usize) -> NamedTensor {
        NamedTensor::from_array(
            Array4::<f32>::zeros((steps, 2, 2, features.len())),
            &[TIMESTEP, LAT, LON, FEATURES],
            features,
        )
        .unwrap()
    }

    #[test]
    fn test_item_rejects_feature_mismatch() {
        let err = Item::new(nt(&["a", "b"], 2), nt(&["a"], 1), nt(&["cos_hour"], 1)).unwrap_err();
        assert!(matches!(err, DatasetError::ContractViolation { .. }));
    }

    #[test]
    fn test_item_accepts_different_step_counts() {
        let item = Item::new(nt(&["a"], 2), nt(&["a"], 3), nt(&["cos_hour"], 3)).unwrap();
        assert_eq!(item.outputs.dim_size(TIMESTEP).unwrap(), 3);
        let summary = item.summary().unwrap();
        assert!(summary.contains("cos_hour"));
        assert_eq!(summary.lines().count(), 4 + 3);
    }

    #[test]
    fn test_sample_key_display() {
        let key = SampleKey {
            reference_time: chrono::TimeZone::with_ymd_and_hms(&Utc, 2023, 1, 2, 6, 0, 0).unwrap(),
            member: 2,
        };
        assert_eq!(key.to_string(), "2023010206_mb002");
        let json = serde_json::to_string(&key).unwrap();
        let back: SampleKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
