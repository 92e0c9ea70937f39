//! Forcing features computed from the calendar and the sun's position.
//!
//! Nothing here reads data: forcings depend only on the reference date, the
//! output terms and the grid coordinates.

use crate::error::Result;
use crate::grid::Grid;
use crate::math::{cyclic_encoding, day_of_year, hour_of_day, toa_radiation, DAYS_PER_YEAR};
use crate::tensor::{NamedTensor, FEATURES, LAT, LON, TIMESTEP};
use chrono::{DateTime, Duration, Utc};
use ndarray::{Array2, Array4, Axis, Zip};

pub const HOUR_FEATURES: [&str; 2] = ["cos_hour", "sin_hour"];
pub const DOY_FEATURES: [&str; 2] = ["cos_doy", "sin_doy"];
pub const SOLAR_FEATURE: &str = "toa_radiation";

/// Number of features produced by [`generate_forcings`]
pub const NUM_GENERATED_FORCINGS: usize = HOUR_FEATURES.len() + DOY_FEATURES.len() + 1;

fn validity_times(date: DateTime<Utc>, terms: &[i64]) -> impl Iterator<Item = DateTime<Utc>> + '_ {
    terms.iter().map(move |&term| date + Duration::hours(term))
}

/// `(timestep, 4)`: cos/sin of the hour of day then cos/sin of the day of year
pub fn year_hour_forcing(date: DateTime<Utc>, terms: &[i64]) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((terms.len(), 4));
    for (mut row, t) in out.axis_iter_mut(Axis(0)).zip(validity_times(date, terms)) {
        let (cos_hour, sin_hour) = cyclic_encoding(hour_of_day(&t), 24.0);
        let (cos_doy, sin_doy) = cyclic_encoding(day_of_year(&t), DAYS_PER_YEAR);
        row[0] = cos_hour as f32;
        row[1] = sin_hour as f32;
        row[2] = cos_doy as f32;
        row[3] = sin_doy as f32;
    }
    out
}

/// `(timestep, lat, lon, 1)` top-of-atmosphere irradiance proxy
pub fn toa_radiation_forcing(
    lat: &Array2<f64>,
    lon: &Array2<f64>,
    date: DateTime<Utc>,
    terms: &[i64],
) -> Array4<f32> {
    let (rows, cols) = lat.dim();
    let mut out = Array4::<f32>::zeros((terms.len(), rows, cols, 1));
    for (mut step, t) in out.axis_iter_mut(Axis(0)).zip(validity_times(date, terms)) {
        Zip::from(step.index_axis_mut(Axis(2), 0))
            .and(lat)
            .and(lon)
            .par_for_each(|v, &la, &lo| *v = toa_radiation(la, lo, &t) as f32);
    }
    out
}

/// Hour-of-day, day-of-year and solar forcings over the output terms of a
/// sample.
pub fn generate_forcings(date: DateTime<Utc>, output_terms: &[i64], grid: &Grid) -> Result<Vec<NamedTensor>> {
    let datetime_forcing = year_hour_forcing(date, output_terms);
    let hour = datetime_forcing.slice(ndarray::s![.., ..2]).to_owned();
    let doy = datetime_forcing.slice(ndarray::s![.., 2..]).to_owned();
    let solar = toa_radiation_forcing(grid.lat(), grid.lon(), date, output_terms);

    Ok(vec![
        NamedTensor::from_array(hour, &[TIMESTEP, FEATURES], &HOUR_FEATURES)?,
        NamedTensor::from_array(doy, &[TIMESTEP, FEATURES], &DOY_FEATURES)?,
        NamedTensor::from_array(solar, &[TIMESTEP, LAT, LON, FEATURES], &[SOLAR_FEATURE])?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridSpec;
    use crate::grid::GridConfig;
    use chrono::TimeZone;

    fn grid() -> Grid {
        let spec = GridSpec {
            name: "g".to_string(),
            border_size: 0,
            subdomain: None,
            proj_name: "PlateCarree".to_string(),
            projection_kwargs: Default::default(),
        };
        Grid::new(&spec, GridConfig::regular((40.0, 50.0), (-5.0, 5.0), (6, 5))).unwrap()
    }

    #[test]
    fn test_forcing_shapes() {
        let date = Utc.with_ymd_and_hms(2023, 6, 21, 0, 0, 0).unwrap();
        let forcings = generate_forcings(date, &[1, 2, 3], &grid()).unwrap();
        assert_eq!(forcings.len(), 3);
        assert_eq!(forcings[0].shape(), &[3, 2]);
        assert_eq!(forcings[1].feature_names(), &DOY_FEATURES);
        assert_eq!(forcings[2].shape(), &[3, 6, 5, 1]);
        let n: usize = forcings.iter().map(|f| f.feature_names().len()).sum();
        assert_eq!(n, NUM_GENERATED_FORCINGS);
    }

    #[test]
    fn test_hour_encoding_at_six() {
        let date = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let f = year_hour_forcing(date, &[6]);
        assert!(f[[0, 0]].abs() < 1e-6);
        assert!((f[[0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_night_has_no_radiation() {
        let date = Utc.with_ymd_and_hms(2023, 6, 21, 0, 0, 0).unwrap();
        let solar = toa_radiation_forcing(grid().lat(), grid().lon(), date, &[0, 12]);
        assert!(solar.index_axis(Axis(0), 0).iter().all(|&v| v == 0.0));
        assert!(solar.index_axis(Axis(0), 1).iter().all(|&v| v > 0.5));
    }
}
