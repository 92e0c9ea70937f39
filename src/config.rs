use crate::error::{DatasetError, Result};
use crate::params::ParamKind;
use crate::time_utils::{parse_date_stamp, Period, Split};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

fn default_proj_name() -> String {
    String::from("PlateCarree")
}

fn default_term_end() -> i64 {
    23
}

fn default_true() -> bool {
    true
}

fn default_file_format() -> String {
    String::from("npy")
}

/// `grid` section: which grid, which part of it, how it is projected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub name: String,
    #[serde(default)]
    pub border_size: usize,
    /// `[row_start, row_end, col_start, col_end]`, whole grid when absent
    #[serde(default)]
    pub subdomain: Option<[usize; 4]>,
    #[serde(default = "default_proj_name")]
    pub proj_name: String,
    #[serde(default)]
    pub projection_kwargs: Map<String, Value>,
}

/// One entry of the `params` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub levels: Vec<i32>,
    pub kind: ParamKind,
}

/// Period bounds are written either as integers or strings (YYYYMMDDHH)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateStamp {
    Int(u64),
    Text(String),
}

impl DateStamp {
    pub fn as_stamp(&self) -> String {
        match self {
            DateStamp::Int(v) => v.to_string(),
            DateStamp::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSpec {
    pub start: DateStamp,
    pub end: DateStamp,
    /// Hours between two consecutive steps
    pub step_duration: i64,
    #[serde(default)]
    pub term_start: i64,
    #[serde(default = "default_term_end")]
    pub term_end: i64,
}

impl PeriodSpec {
    pub fn to_period(&self, split: Split) -> Result<Period> {
        Period::new(
            split,
            parse_date_stamp(&self.start.as_stamp())?,
            parse_date_stamp(&self.end.as_stamp())?,
            self.step_duration,
            self.term_start,
            self.term_end,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodsSpec {
    pub train: PeriodSpec,
    pub valid: PeriodSpec,
    pub test: PeriodSpec,
}

impl PeriodsSpec {
    pub fn get(&self, split: Split) -> &PeriodSpec {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSpec {
    #[serde(default = "default_true")]
    pub standardize: bool,
    #[serde(default = "default_file_format")]
    pub file_format: String,
    #[serde(default)]
    pub add_landsea_mask: bool,
    #[serde(default)]
    pub members: Option<Vec<usize>>,
}

impl Default for SettingsSpec {
    fn default() -> Self {
        Self {
            standardize: true,
            file_format: default_file_format(),
            add_landsea_mask: false,
            members: None,
        }
    }
}

/// Typed view of a dataset JSON configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub grid: GridSpec,
    pub params: BTreeMap<String, ParamSpec>,
    pub periods: PeriodsSpec,
    #[serde(default)]
    pub settings: SettingsSpec,
    /// Accepted here as well as under `settings`
    #[serde(default)]
    pub members: Option<Vec<usize>>,
}

impl DatasetConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        let config: DatasetConfig = serde_json::from_value(value)
            .map_err(|e| DatasetError::configuration(format!("Malformed dataset configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| DatasetError::configuration(format!("Invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Read a configuration file, merging `config_override` on top of it
    pub fn from_file(path: &Path, config_override: Option<&Value>) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            DatasetError::configuration(format!(
                "Cannot read dataset configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut value: Value = serde_json::from_str(&text).map_err(|e| {
            DatasetError::configuration(format!("Invalid JSON in {}: {}", path.display(), e))
        })?;
        if let Some(over) = config_override {
            merge_json(&mut value, over);
        }
        Self::from_value(value)
    }

    /// Ensemble members to sample; a single implicit member when none are set
    pub fn members(&self) -> Vec<usize> {
        self.settings
            .members
            .clone()
            .or_else(|| self.members.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| vec![0])
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.params.is_empty() {
            return Err(DatasetError::configuration("No parameter configured"));
        }
        for (name, spec) in &self.params {
            if spec.levels.is_empty() {
                return Err(DatasetError::configuration(format!(
                    "Parameter {} has no level",
                    name
                )));
            }
        }
        if let Some([r0, r1, c0, c1]) = self.grid.subdomain {
            if r1 <= r0 || c1 <= c0 {
                return Err(DatasetError::configuration(format!(
                    "Invalid subdomain {:?}",
                    self.grid.subdomain
                )));
            }
        }
        if self.settings.file_format.is_empty() {
            return Err(DatasetError::configuration("Empty file_format"));
        }
        for split in [Split::Train, Split::Valid, Split::Test] {
            self.periods.get(split).to_period(split)?;
        }
        Ok(())
    }
}

/// Recursively merge `over` into `base`; objects merge key by key, anything
/// else is replaced.
pub fn merge_json(base: &mut Value, over: &Value) {
    match (base, over) {
        (Value::Object(base_map), Value::Object(over_map)) => {
            for (key, over_value) in over_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_json(base_value, over_value),
                    None => {
                        base_map.insert(key.clone(), over_value.clone());
                    }
                }
            }
        }
        (base, over) => *base = over.clone(),
    }
}

/// Per-split preprocessing settings shared by every sample of a dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePreprocSettings {
    pub dataset_name: String,
    pub num_input_steps: usize,
    pub num_pred_steps: usize,
    /// Hours between two steps of a sample
    pub step_duration: i64,
    pub standardize: bool,
    pub file_format: String,
    pub add_landsea_mask: bool,
    pub members: Vec<usize>,
}

impl SamplePreprocSettings {
    pub fn from_config(
        dataset_name: &str,
        config: &DatasetConfig,
        split: Split,
        num_input_steps: usize,
        num_pred_steps: usize,
    ) -> Result<Self> {
        if num_input_steps == 0 || num_pred_steps == 0 {
            return Err(DatasetError::configuration(format!(
                "At least one input and one predicted step are required, got {} and {}",
                num_input_steps, num_pred_steps
            )));
        }
        Ok(Self {
            dataset_name: dataset_name.to_string(),
            num_input_steps,
            num_pred_steps,
            step_duration: config.periods.get(split).step_duration,
            standardize: config.settings.standardize,
            file_format: config.settings.file_format.clone(),
            add_landsea_mask: config.settings.add_landsea_mask,
            members: config.members(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_config() -> Value {
        json!({
            "periods": {
                "train": {"start": 2023010100, "end": 2023010107, "step_duration": 1},
                "valid": {"start": "2023010108", "end": "2023010115", "step_duration": 1},
                "test": {"start": 2023010116, "end": 2023010122, "step_duration": 1}
            },
            "settings": {"standardize": true, "file_format": "npy"},
            "grid": {
                "name": "dummygrid",
                "border_size": 0,
                "subdomain": [0, 64, 0, 64],
                "proj_name": "PlateCarree",
                "projection_kwargs": {}
            },
            "params": {
                "dummy_parameter": {"levels": [500], "kind": "input_output"}
            }
        })
    }

    #[test]
    fn test_config_parses() {
        let config = DatasetConfig::from_value(sample_config()).unwrap();
        assert_eq!(config.grid.subdomain, Some([0, 64, 0, 64]));
        assert_eq!(config.params["dummy_parameter"].kind, ParamKind::InputOutput);
        assert_eq!(config.periods.valid.start, DateStamp::Text("2023010108".to_string()));
        assert_eq!(config.members(), vec![0]);
        assert!(!config.settings.add_landsea_mask);
    }

    #[test]
    fn test_missing_period_is_configuration_error() {
        let mut value = sample_config();
        value["periods"].as_object_mut().unwrap().remove("test");
        let err = DatasetConfig::from_value(value).unwrap_err();
        assert!(matches!(err, DatasetError::Configuration(_)));
    }

    #[test]
    fn test_empty_levels_rejected() {
        let mut value = sample_config();
        value["params"]["dummy_parameter"]["levels"] = json!([]);
        assert!(DatasetConfig::from_value(value).is_err());
    }

    #[test]
    fn test_members_from_settings_or_top_level() {
        let mut value = sample_config();
        value["members"] = json!([0, 1]);
        assert_eq!(DatasetConfig::from_value(value.clone()).unwrap().members(), vec![0, 1]);
        value["settings"]["members"] = json!([3]);
        assert_eq!(DatasetConfig::from_value(value).unwrap().members(), vec![3]);
    }

    #[test]
    fn test_merge_json_override() {
        let mut base = sample_config();
        merge_json(
            &mut base,
            &json!({"settings": {"standardize": false}, "grid": {"border_size": 4}}),
        );
        let config = DatasetConfig::from_value(base).unwrap();
        assert!(!config.settings.standardize);
        assert_eq!(config.settings.file_format, "npy");
        assert_eq!(config.grid.border_size, 4);
    }

    #[test]
    fn test_settings_require_steps() {
        let config = DatasetConfig::from_value(sample_config()).unwrap();
        assert!(SamplePreprocSettings::from_config("dummy", &config, Split::Train, 0, 1).is_err());
        let settings = SamplePreprocSettings::from_config("dummy", &config, Split::Train, 2, 1).unwrap();
        assert_eq!(settings.step_duration, 1);
        assert_eq!(settings.members, vec![0]);
    }
}
