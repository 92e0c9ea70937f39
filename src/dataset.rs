//! Datasets: one split of a gridded archive turned into a list of valid
//! samples.
//!
//! Validity probing is expensive, so the reference times found valid are
//! persisted in a per-split cache file under the dataset cache directory.
//! When that file exists it is authoritative: its reference times are
//! intersected with the configured period and nothing is probed again.
//! Narrowing a period is therefore safe, but widening it, or changing the
//! parameters, requires deleting the cache file by hand.

use crate::config::{DatasetConfig, SamplePreprocSettings};
use crate::data_io::common::valid_samples_file_name;
use crate::data_io::DataAccessor;
use crate::error::{DatasetError, Result};
use crate::forcing::NUM_GENERATED_FORCINGS;
use crate::grid::{Grid, Projection, Statics};
use crate::params::{build_params, ParamKind, WeatherParam};
use crate::parallel::probe_validity_chunked;
use crate::sample::{Item, Sample, SampleContext};
use crate::stats::{StatField, Stats, DIFF_STATS_FILE, PARAMETERS_STATS_FILE};
use crate::table::render_table;
use crate::time_utils::{format_cache_date, parse_cache_date, Period, Split};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Candidates probed per progress chunk when building a validity cache
const PROBE_CHUNK_SIZE: usize = 256;

/// Domain description used for plotting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainInfo {
    pub grid_limits: [f64; 4],
    pub projection: Projection,
}

/// Everything other components need to know about a dataset
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub name: String,
    pub domain_info: DomainInfo,
    pub shortnames: BTreeMap<ParamKind, Vec<String>>,
    pub units: BTreeMap<String, String>,
    pub weather_dim: usize,
    pub forcing_dim: usize,
    /// Hours per step
    pub step_duration: i64,
    pub statics: Statics,
    pub stats: Arc<Stats>,
    pub diff_stats: Arc<Stats>,
    pub state_weights: BTreeMap<String, f32>,
}

fn fmt_stat(stats: &Stats, name: &str, field: StatField) -> String {
    stats
        .get(name)
        .map(|s| format!("{:.4}", s.field(field)))
        .unwrap_or_else(|_| "-".to_string())
}

impl DatasetInfo {
    /// One table per parameter kind
    pub fn summary(&self) -> String {
        let mut out = format!("Summarizing {}\n", self.name);
        out.push_str(&format!("Step duration {}h\n", self.step_duration));
        out.push_str(&format!(
            "Static fields {:?}\n",
            self.statics.grid_statics.feature_names()
        ));
        for kind in ParamKind::ALL {
            let names = match self.shortnames.get(&kind) {
                Some(names) if !names.is_empty() => names,
                _ => continue,
            };
            let rows: Vec<Vec<String>> = names
                .iter()
                .map(|name| {
                    let mut row = vec![
                        name.clone(),
                        self.units.get(name).cloned().unwrap_or_default(),
                        fmt_stat(&self.stats, name, StatField::Mean),
                        fmt_stat(&self.stats, name, StatField::Std),
                        fmt_stat(&self.stats, name, StatField::Min),
                        fmt_stat(&self.stats, name, StatField::Max),
                    ];
                    if kind.is_output() {
                        row.push(fmt_stat(&self.diff_stats, name, StatField::Mean));
                        row.push(fmt_stat(&self.diff_stats, name, StatField::Std));
                        row.push(
                            self.state_weights
                                .get(name)
                                .map(|w| format!("{:.3}", w))
                                .unwrap_or_default(),
                        );
                    }
                    row
                })
                .collect();
            let mut headers = vec!["Name", "Unit", "Mean", "Std", "Minimum", "Maximum"];
            if kind.is_output() {
                headers.extend(["DiffMean", "DiffStd", "Weight in Loss"]);
            }
            out.push_str(&format!("{}\n", kind.name().to_uppercase()));
            out.push_str(&render_table(&headers, &rows));
        }
        out
    }
}

/// One split (train, valid or test) of a dataset
pub struct Dataset {
    name: String,
    period: Period,
    context: SampleContext,
    diff_stats: Arc<Stats>,
    statics: Statics,
    cache_dir: PathBuf,
    valid_samples_file: PathBuf,
    sample_list: Vec<Sample>,
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.name, self.context.grid.name)
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("samples", &self.sample_list.len())
            .finish()
    }
}

/// Inputs and outputs carry the same features, so every predicted
/// parameter must also be an input. Input-only parameters go to the forcing.
fn check_feature_routing(params: &[WeatherParam]) -> Result<()> {
    let output_only: Vec<String> = params
        .iter()
        .filter(|p| p.kind == ParamKind::Output)
        .map(|p| p.short_name())
        .collect();
    if !output_only.is_empty() {
        return Err(DatasetError::configuration(format!(
            "Output-only parameters {:?} have no input counterpart, declare them input_output",
            output_only
        )));
    }
    if !params.iter().any(|p| p.kind == ParamKind::InputOutput) {
        return Err(DatasetError::configuration(
            "At least one input_output parameter is required",
        ));
    }
    Ok(())
}

impl Dataset {
    pub fn new(
        name: &str,
        grid: Arc<Grid>,
        period: Period,
        params: Arc<Vec<WeatherParam>>,
        settings: SamplePreprocSettings,
        accessor: Arc<dyn DataAccessor>,
    ) -> Result<Self> {
        check_feature_routing(&params)?;

        let cache_dir = accessor.dataset_cache_path(name, &grid);
        fs::create_dir_all(&cache_dir)?;
        let stats_file = cache_dir.join(PARAMETERS_STATS_FILE);
        let stats = if settings.standardize {
            Stats::load(&stats_file)?
        } else {
            Stats::load_or_empty(&stats_file)?
        };
        let diff_stats = Stats::load_or_empty(&cache_dir.join(DIFF_STATS_FILE))?;
        let statics = grid.static_features(settings.add_landsea_mask)?;
        let valid_samples_file = cache_dir.join(valid_samples_file_name(
            period.split,
            settings.num_input_steps,
            settings.num_pred_steps,
        ));

        let mut dataset = Self {
            name: name.to_string(),
            period,
            context: SampleContext {
                settings: Arc::new(settings),
                params,
                stats: Arc::new(stats),
                grid,
                accessor,
            },
            diff_stats: Arc::new(diff_stats),
            statics,
            cache_dir,
            valid_samples_file,
            sample_list: Vec::new(),
        };
        dataset.sample_list = dataset.build_sample_list()?;
        Ok(dataset)
    }

    /// Build the train, valid and test splits of a configuration. Valid and
    /// test share the same prediction length.
    pub fn from_config(
        name: &str,
        config: &DatasetConfig,
        accessor: Arc<dyn DataAccessor>,
        num_input_steps: usize,
        num_pred_steps_train: usize,
        num_pred_steps_val_test: usize,
    ) -> Result<(Dataset, Dataset, Dataset)> {
        let grid_config = accessor.load_grid_info(&config.grid.name)?;
        let grid = Arc::new(Grid::new(&config.grid, grid_config)?);
        let params = Arc::new(build_params(config, &grid, accessor.as_ref())?);

        let build = |split: Split, num_pred_steps: usize| -> Result<Dataset> {
            let settings = SamplePreprocSettings::from_config(name, config, split, num_input_steps, num_pred_steps)?;
            let period = config.periods.get(split).to_period(split)?;
            Dataset::new(name, grid.clone(), period, params.clone(), settings, accessor.clone())
        };
        Ok((
            build(Split::Train, num_pred_steps_train)?,
            build(Split::Valid, num_pred_steps_val_test)?,
            build(Split::Test, num_pred_steps_val_test)?,
        ))
    }

    /// Same as [`Dataset::from_config`], reading the configuration from a
    /// JSON file with an optional override merged on top.
    pub fn from_json(
        accessor: Arc<dyn DataAccessor>,
        name: &str,
        path: &Path,
        num_input_steps: usize,
        num_pred_steps_train: usize,
        num_pred_steps_val_test: usize,
        config_override: Option<&Value>,
    ) -> Result<(Dataset, Dataset, Dataset)> {
        let config = DatasetConfig::from_file(path, config_override)?;
        Self::from_config(
            name,
            &config,
            accessor,
            num_input_steps,
            num_pred_steps_train,
            num_pred_steps_val_test,
        )
    }

    /// Every (reference time, member) candidate of the period, one sample
    /// each, date-major then term then member.
    fn candidates(&self, reference_times: &[DateTime<Utc>]) -> Result<Vec<Sample>> {
        let members = &self.context.settings.members;
        let mut samples = Vec::with_capacity(reference_times.len() * members.len());
        for &reference_time in reference_times {
            for &member in members {
                samples.push(Sample::new(reference_time, member, self.context.clone())?);
            }
        }
        Ok(samples)
    }

    fn build_sample_list(&self) -> Result<Vec<Sample>> {
        info!("Start creating {} samples for {}", self.period.name(), self);
        let active = self.period.reference_times();

        let valid_times = if self.valid_samples_file.exists() {
            info!("Retrieving valid samples from file {}", self.valid_samples_file.display());
            let cached = read_valid_samples_file(&self.valid_samples_file)?;
            active.into_iter().filter(|t| cached.contains(t)).collect()
        } else {
            info!(
                "Valid samples file {} does not exist. Computing samples list...",
                self.valid_samples_file.display()
            );
            let valid = self.probe_reference_times(&active)?;
            write_valid_samples_file(&self.valid_samples_file, &valid)?;
            valid
        };

        let samples = self.candidates(&valid_times)?;
        info!("--> All {} {} samples are now defined", samples.len(), self.period.name());
        Ok(samples)
    }

    /// Validity does not depend on the member, so each reference time is
    /// probed once with the first member.
    fn probe_reference_times(&self, reference_times: &[DateTime<Utc>]) -> Result<Vec<DateTime<Utc>>> {
        let first_member = self.context.settings.members.first().copied().unwrap_or(0);
        let probes = reference_times
            .iter()
            .map(|&t| Sample::new(t, first_member, self.context.clone()))
            .collect::<Result<Vec<_>>>()?;
        let valid = probe_validity_chunked(probes, self.period.name(), PROBE_CHUNK_SIZE)?;
        Ok(valid.iter().map(Sample::reference_time).collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> &Period {
        &self.period
    }

    pub fn grid(&self) -> &Grid {
        &self.context.grid
    }

    pub fn params(&self) -> &[WeatherParam] {
        &self.context.params
    }

    pub fn settings(&self) -> &SamplePreprocSettings {
        &self.context.settings
    }

    pub fn stats(&self) -> &Stats {
        &self.context.stats
    }

    pub fn diff_stats(&self) -> &Stats {
        &self.diff_stats
    }

    pub fn statics(&self) -> &Statics {
        &self.statics
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn valid_samples_file(&self) -> &Path {
        &self.valid_samples_file
    }

    pub fn sample_list(&self) -> &[Sample] {
        &self.sample_list
    }

    pub fn len(&self) -> usize {
        self.sample_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_list.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Item> {
        let sample = self.sample_list.get(index).ok_or_else(|| {
            DatasetError::configuration(format!(
                "Sample index {} out of range for {} samples",
                index,
                self.sample_list.len()
            ))
        })?;
        sample.load()
    }

    /// Only the training split is shuffled
    pub fn shuffle(&self) -> bool {
        self.period.is_training()
    }

    /// Read order for one epoch: a permutation seeded by `epoch` for the
    /// training split, the identity otherwise.
    pub fn epoch_order(&self, epoch: u64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.sample_list.len()).collect();
        if self.shuffle() {
            let mut rng = StdRng::seed_from_u64(epoch);
            order.shuffle(&mut rng);
        }
        order
    }

    pub fn shortnames(&self, kind: ParamKind) -> Vec<String> {
        self.context
            .params
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.short_name())
            .collect()
    }

    pub fn units(&self) -> BTreeMap<String, String> {
        self.context
            .params
            .iter()
            .map(|p| (p.short_name(), p.unit.clone()))
            .collect()
    }

    /// Loss weights of the predicted parameters
    pub fn state_weights(&self) -> BTreeMap<String, f32> {
        self.context
            .params
            .iter()
            .filter(|p| p.kind.is_output())
            .map(|p| (p.short_name(), p.state_weight))
            .collect()
    }

    /// Forcing features: generated forcings plus input-only parameters
    pub fn input_dim(&self) -> usize {
        NUM_GENERATED_FORCINGS + self.count_kind(ParamKind::Input)
    }

    pub fn input_output_dim(&self) -> usize {
        self.count_kind(ParamKind::InputOutput)
    }

    pub fn output_dim(&self) -> usize {
        self.count_kind(ParamKind::Output)
    }

    fn count_kind(&self, kind: ParamKind) -> usize {
        self.context.params.iter().filter(|p| p.kind == kind).count()
    }

    pub fn grid_shape(&self) -> (usize, usize) {
        self.context.grid.shape()
    }

    pub fn domain_info(&self) -> DomainInfo {
        DomainInfo {
            grid_limits: self.context.grid.grid_limits(),
            projection: self.context.grid.projection.clone(),
        }
    }

    pub fn dataset_info(&self) -> DatasetInfo {
        let shortnames = ParamKind::ALL
            .iter()
            .map(|&kind| (kind, self.shortnames(kind)))
            .collect();
        DatasetInfo {
            name: self.to_string(),
            domain_info: self.domain_info(),
            shortnames,
            units: self.units(),
            weather_dim: self.input_output_dim(),
            forcing_dim: self.input_dim(),
            step_duration: self.context.settings.step_duration,
            statics: self.statics.clone(),
            stats: self.context.stats.clone(),
            diff_stats: self.diff_stats.clone(),
            state_weights: self.state_weights(),
        }
    }
}

/// Reference times listed in a validity cache file
pub fn read_valid_samples_file(path: &Path) -> Result<BTreeSet<DateTime<Utc>>> {
    let text = fs::read_to_string(path)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_cache_date)
        .collect()
}

/// Write the validity cache next to its final location, then rename it into
/// place so a partial file is never read back.
pub fn write_valid_samples_file(path: &Path, reference_times: &[DateTime<Utc>]) -> Result<()> {
    let tmp = path.with_extension("txt.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for t in reference_times {
            writeln!(writer, "{}", format_cache_date(t))?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    debug!("Wrote {} valid reference times to {}", reference_times.len(), path.display());
    Ok(())
}
