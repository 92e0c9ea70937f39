use crate::error::{DatasetError, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Text format of one line of the validity cache file.
pub const CACHE_DATE_FORMAT: &str = "%Y-%m-%d_%Hh%M";

/// Compact date stamp used in configuration files and data folders.
pub const DATE_STAMP_FORMAT: &str = "%Y%m%d%H";

/// Parse simple format: YYYYMMDDHH
pub fn parse_date_stamp(stamp: &str) -> Result<DateTime<Utc>> {
    if stamp.len() != 10 || !stamp.chars().all(|c| c.is_ascii_digit()) {
        return Err(DatasetError::configuration(format!(
            "Invalid date stamp {}. Expected: YYYYMMDDHH",
            stamp
        )));
    }
    NaiveDateTime::parse_from_str(&format!("{}00", stamp), "%Y%m%d%H%M")
        .map(|dt| dt.and_utc())
        .map_err(|e| DatasetError::configuration(format!("Invalid date stamp {}: {}", stamp, e)))
}

pub fn format_date_stamp(datetime: &DateTime<Utc>) -> String {
    datetime.format(DATE_STAMP_FORMAT).to_string()
}

pub fn format_cache_date(datetime: &DateTime<Utc>) -> String {
    datetime.format(CACHE_DATE_FORMAT).to_string()
}

pub fn parse_cache_date(line: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(line.trim(), CACHE_DATE_FORMAT)
        .map(|dt| dt.and_utc())
        .map_err(|e| {
            DatasetError::configuration(format!("Invalid validity cache line {:?}: {}", line, e))
        })
}

/// Hour offsets of a full sample window, e.g. n_input = 2, n_pred = 3 and a
/// 3h step give [-3, 0, 3, 6, 9].
pub fn sample_terms(num_input_steps: usize, num_pred_steps: usize, step_duration: i64) -> Vec<i64> {
    let first = 1 - num_input_steps as i64;
    (first..=num_pred_steps as i64)
        .map(|step| step * step_duration)
        .collect()
}

/// All timestamps of a sample: the reference time, the hour offsets ("terms")
/// relative to it and the matching absolute validity times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timestamps {
    pub datetime: DateTime<Utc>,
    pub terms: Vec<i64>,
    pub validity_times: Vec<DateTime<Utc>>,
}

impl Timestamps {
    pub fn new(datetime: DateTime<Utc>, terms: Vec<i64>) -> Self {
        let validity_times = terms
            .iter()
            .map(|&term| datetime + Duration::hours(term))
            .collect();
        Self {
            datetime,
            terms,
            validity_times,
        }
    }

    pub fn for_sample(
        datetime: DateTime<Utc>,
        num_input_steps: usize,
        num_pred_steps: usize,
        step_duration: i64,
    ) -> Self {
        Self::new(
            datetime,
            sample_terms(num_input_steps, num_pred_steps, step_duration),
        )
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Split into the first `num_input_steps` and the remaining timestamps.
    pub fn split(&self, num_input_steps: usize) -> (Timestamps, Timestamps) {
        let at = num_input_steps.min(self.terms.len());
        let inputs = Timestamps {
            datetime: self.datetime,
            terms: self.terms[..at].to_vec(),
            validity_times: self.validity_times[..at].to_vec(),
        };
        let outputs = Timestamps {
            datetime: self.datetime,
            terms: self.terms[at..].to_vec(),
            validity_times: self.validity_times[at..].to_vec(),
        };
        (inputs, outputs)
    }
}

/// Arguments identifying one candidate sample before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SampleArgs {
    pub date: DateTime<Utc>,
    pub term: i64,
    pub member: usize,
}

impl SampleArgs {
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.date + Duration::hours(self.term)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named time range: reference dates one calendar day apart from `start`
/// to `end` (both included) and the admissible intra-day terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub split: Split,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Hours between two consecutive terms.
    pub step_duration: i64,
    pub term_start: i64,
    pub term_end: i64,
}

impl Period {
    pub fn new(
        split: Split,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_duration: i64,
        term_start: i64,
        term_end: i64,
    ) -> Result<Self> {
        if end < start {
            return Err(DatasetError::configuration(format!(
                "{} period ends ({}) before it starts ({})",
                split, end, start
            )));
        }
        if step_duration <= 0 {
            return Err(DatasetError::configuration(format!(
                "{} period step_duration must be positive, got {}",
                split, step_duration
            )));
        }
        if term_end < term_start {
            return Err(DatasetError::configuration(format!(
                "{} period term window is empty: start {} > end {}",
                split, term_start, term_end
            )));
        }
        Ok(Self {
            split,
            start,
            end,
            step_duration,
            term_start,
            term_end,
        })
    }

    pub fn name(&self) -> &'static str {
        self.split.name()
    }

    pub fn is_training(&self) -> bool {
        self.split == Split::Train
    }

    /// `arange(term_start, term_end + 1, step_duration)`
    pub fn terms_list(&self) -> Vec<i64> {
        (self.term_start..=self.term_end)
            .step_by(self.step_duration as usize)
            .collect()
    }

    /// List all dates of the period, 24h apart
    pub fn date_list(&self) -> Vec<DateTime<Utc>> {
        let mut dates = Vec::new();
        let mut current = self.start;
        while current <= self.end {
            dates.push(current);
            current += Duration::days(1);
        }
        dates
    }

    /// Reference times of every candidate sample, date-major then term.
    pub fn reference_times(&self) -> Vec<DateTime<Utc>> {
        let terms = self.terms_list();
        self.date_list()
            .into_iter()
            .flat_map(|date| terms.iter().map(move |&term| date + Duration::hours(term)))
            .collect()
    }

    /// Every (date, term, member) combination of the period.
    pub fn sample_arguments(&self, members: &[usize]) -> Vec<SampleArgs> {
        let terms = self.terms_list();
        let mut args = Vec::with_capacity(self.date_list().len() * terms.len() * members.len());
        for date in self.date_list() {
            for &term in &terms {
                for &member in members {
                    args.push(SampleArgs { date, term, member });
                }
            }
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_date_stamp() {
        assert_eq!(parse_date_stamp("2023010112").unwrap(), utc(2023, 1, 1, 12));
        assert!(parse_date_stamp("20230101").is_err());
        assert!(parse_date_stamp("2023013112").is_ok());
        assert!(parse_date_stamp("2023023112").is_err());
    }

    #[test]
    fn test_cache_date_round_trip() {
        let dt = utc(2021, 6, 15, 3);
        let line = format_cache_date(&dt);
        assert_eq!(line, "2021-06-15_03h00");
        assert_eq!(parse_cache_date(&line).unwrap(), dt);
    }

    #[test]
    fn test_sample_terms() {
        assert_eq!(sample_terms(2, 3, 3), vec![-3, 0, 3, 6, 9]);
        assert_eq!(sample_terms(1, 1, 1), vec![0, 1]);
    }

    #[test]
    fn test_timestamps_split() {
        let ts = Timestamps::for_sample(utc(2023, 1, 1, 0), 2, 2, 1);
        assert_eq!(ts.terms, vec![-1, 0, 1, 2]);
        assert_eq!(ts.validity_times[0], utc(2022, 12, 31, 23));
        let (inputs, outputs) = ts.split(2);
        assert_eq!(inputs.terms, vec![-1, 0]);
        assert_eq!(outputs.terms, vec![1, 2]);
        assert_eq!(outputs.validity_times, vec![utc(2023, 1, 1, 1), utc(2023, 1, 1, 2)]);
    }

    #[test]
    fn test_period_rejects_inverted_range() {
        let result = Period::new(Split::Train, utc(2023, 1, 2, 0), utc(2023, 1, 1, 0), 1, 0, 23);
        assert!(result.is_err());
    }
}
