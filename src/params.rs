//! Weather parameters: one physical field at one vertical level.

use crate::config::DatasetConfig;
use crate::data_io::DataAccessor;
use crate::error::Result;
use crate::grid::{Grid, GridConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Role of a parameter in a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Input,
    Output,
    InputOutput,
}

impl ParamKind {
    pub const ALL: [ParamKind; 3] = [ParamKind::Input, ParamKind::InputOutput, ParamKind::Output];

    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::Input => "input",
            ParamKind::Output => "output",
            ParamKind::InputOutput => "input_output",
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self, ParamKind::Input | ParamKind::InputOutput)
    }

    pub fn is_output(&self) -> bool {
        matches!(self, ParamKind::Output | ParamKind::InputOutput)
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelType {
    #[serde(rename = "isobaricInhPa")]
    IsobaricInhPa,
    #[serde(rename = "heightAboveGround")]
    HeightAboveGround,
    #[serde(rename = "surface")]
    Surface,
    #[serde(rename = "meanSea")]
    MeanSea,
}

impl LevelType {
    /// Suffix appended to the level in parameter short names
    pub fn suffix(&self) -> &'static str {
        match self {
            LevelType::IsobaricInhPa => "hpa",
            LevelType::HeightAboveGround => "m",
            LevelType::Surface | LevelType::MeanSea => "",
        }
    }
}

/// Loss weight of a level: upper isobaric levels weigh slightly more,
/// surface fields count double.
pub fn default_level_weight(level: i32, level_type: LevelType) -> f32 {
    match level_type {
        LevelType::IsobaricInhPa => 1.0 + level as f32 / 1000.0,
        _ => 2.0,
    }
}

/// Parameter description as provided by an accessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamConfig {
    pub unit: String,
    pub level_type: LevelType,
    pub long_name: String,
    /// Name of the grid the parameter is stored on
    pub grid: String,
    /// Source-specific identifier, when it differs from the parameter name
    #[serde(default)]
    pub source_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WeatherParam {
    pub name: String,
    pub level: i32,
    pub level_type: LevelType,
    pub kind: ParamKind,
    pub unit: String,
    pub long_name: String,
    pub native_grid: String,
    /// Resolved once when the parameter lives on another grid than the target
    pub native_grid_config: Option<Arc<GridConfig>>,
    pub source_name: Option<String>,
    pub state_weight: f32,
}

impl WeatherParam {
    /// e.g. `t_850hpa`, `u_10m`, `msl_0`
    pub fn short_name(&self) -> String {
        format!("{}_{}{}", self.name, self.level, self.level_type.suffix())
    }

    pub fn needs_resampling(&self) -> bool {
        self.native_grid_config.is_some()
    }
}

impl fmt::Display for WeatherParam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}, {})", self.short_name(), self.kind, self.unit)
    }
}

/// Expand the `params` section into one parameter per (name, level), names
/// in sorted order and levels in configured order.
pub fn build_params(
    config: &DatasetConfig,
    grid: &Grid,
    accessor: &dyn DataAccessor,
) -> Result<Vec<WeatherParam>> {
    let mut params = Vec::new();
    for (name, spec) in &config.params {
        let info = accessor.load_parameter_info(name)?;
        let native_grid_config = if info.grid != grid.name {
            debug!("Parameter {} lives on grid {}, resampling to {}", name, info.grid, grid.name);
            Some(Arc::new(accessor.load_grid_info(&info.grid)?))
        } else {
            None
        };
        for &level in &spec.levels {
            params.push(WeatherParam {
                name: name.clone(),
                level,
                level_type: info.level_type,
                kind: spec.kind,
                unit: info.unit.clone(),
                long_name: info.long_name.clone(),
                native_grid: info.grid.clone(),
                native_grid_config: native_grid_config.clone(),
                source_name: info.source_name.clone(),
                state_weight: accessor.weight_for_level(level, info.level_type),
            });
        }
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, level: i32, level_type: LevelType) -> WeatherParam {
        WeatherParam {
            name: name.to_string(),
            level,
            level_type,
            kind: ParamKind::InputOutput,
            unit: "K".to_string(),
            long_name: name.to_string(),
            native_grid: "g".to_string(),
            native_grid_config: None,
            source_name: None,
            state_weight: 1.0,
        }
    }

    #[test]
    fn test_short_names() {
        assert_eq!(param("t", 850, LevelType::IsobaricInhPa).short_name(), "t_850hpa");
        assert_eq!(param("u", 10, LevelType::HeightAboveGround).short_name(), "u_10m");
        assert_eq!(param("msl", 0, LevelType::MeanSea).short_name(), "msl_0");
    }

    #[test]
    fn test_default_level_weight() {
        assert!((default_level_weight(500, LevelType::IsobaricInhPa) - 1.5).abs() < 1e-6);
        assert_eq!(default_level_weight(2, LevelType::HeightAboveGround), 2.0);
    }

    #[test]
    fn test_kind_roles() {
        assert!(ParamKind::InputOutput.is_input() && ParamKind::InputOutput.is_output());
        assert!(!ParamKind::Input.is_output());
        assert!(!ParamKind::Output.is_input());
        let kind: ParamKind = serde_json::from_str("\"input_output\"").unwrap();
        assert_eq!(kind, ParamKind::InputOutput);
        let lt: LevelType = serde_json::from_str("\"isobaricInhPa\"").unwrap();
        assert_eq!(lt, LevelType::IsobaricInhPa);
    }
}
