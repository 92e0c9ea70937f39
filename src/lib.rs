pub mod batch;
pub mod config;
pub mod data_io;
pub mod dataset;
pub mod error;
pub mod forcing;
pub mod grid;
pub mod math;
pub mod parallel;
pub mod params;
pub mod registry;
pub mod sample;
pub mod stats;
pub mod table;
pub mod tensor;
pub mod time_utils;

pub use batch::{collate, BatchLoader, ItemBatch};
pub use config::{DatasetConfig, SamplePreprocSettings};
pub use data_io::{ArrayFileAccessor, DataAccessor, SyntheticAccessor};
pub use dataset::{Dataset, DatasetInfo};
pub use error::{DatasetError, Result};
pub use grid::{Grid, GridConfig, Statics};
pub use params::{LevelType, ParamKind, WeatherParam};
pub use registry::DatasetRegistry;
pub use sample::{Item, Sample, SampleKey};
pub use stats::{ParamStats, Stats};
pub use tensor::NamedTensor;
pub use time_utils::*;
