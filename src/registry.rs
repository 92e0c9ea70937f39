//! Named datasets and the accessor serving each of them.

use crate::data_io::DataAccessor;
use crate::dataset::Dataset;
use crate::error::{DatasetError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

struct RegistryEntry {
    accessor: Arc<dyn DataAccessor>,
    default_config: PathBuf,
}

#[derive(Default)]
pub struct DatasetRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a dataset name
    pub fn register(&mut self, name: &str, accessor: Arc<dyn DataAccessor>, default_config: &Path) {
        self.entries.insert(
            name.to_string(),
            RegistryEntry {
                accessor,
                default_config: default_config.to_path_buf(),
            },
        );
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn accessor(&self, name: &str) -> Result<Arc<dyn DataAccessor>> {
        self.entry(name).map(|e| e.accessor.clone())
    }

    fn entry(&self, name: &str) -> Result<&RegistryEntry> {
        self.entries.get(name).ok_or_else(|| DatasetError::DatasetLookup {
            name: name.to_string(),
            available: self.names(),
        })
    }

    /// Build the train, valid and test splits of a registered dataset, from
    /// `config_file` when given, otherwise from its default configuration.
    pub fn get_datasets(
        &self,
        name: &str,
        num_input_steps: usize,
        num_pred_steps_train: usize,
        num_pred_steps_val_test: usize,
        config_file: Option<&Path>,
        config_override: Option<&Value>,
    ) -> Result<(Dataset, Dataset, Dataset)> {
        let entry = self.entry(name)?;
        let config_file = config_file.unwrap_or(&entry.default_config);
        info!("Loading dataset {} from {}", name, config_file.display());
        Dataset::from_json(
            entry.accessor.clone(),
            name,
            config_file,
            num_input_steps,
            num_pred_steps_train,
            num_pred_steps_val_test,
            config_override,
        )
    }
}
