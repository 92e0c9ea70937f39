use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::PI;

/// Mean length of a year in days, used by the cyclic day-of-year encoding
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Fractional hour of day (UTC)
pub fn hour_of_day(datetime: &DateTime<Utc>) -> f64 {
    datetime.hour() as f64 + datetime.minute() as f64 / 60.0 + datetime.second() as f64 / 3600.0
}

/// Fractional day of year, 1.0 at January 1st 00h
pub fn day_of_year(datetime: &DateTime<Utc>) -> f64 {
    datetime.ordinal() as f64 + hour_of_day(datetime) / 24.0
}

/// Solar declination (radians), Cooper's approximation
pub fn solar_declination(day_of_year: f64) -> f64 {
    23.45_f64.to_radians() * (2.0 * PI * (284.0 + day_of_year) / 365.0).sin()
}

/// Earth-sun distance correction to the solar constant
pub fn eccentricity_factor(day_of_year: f64) -> f64 {
    1.0 + 0.033 * (2.0 * PI * day_of_year / 365.0).cos()
}

/// Cosine of the solar zenith angle at a location, local solar time taken as
/// UTC + longitude / 15
pub fn cos_solar_zenith(lat_deg: f64, lon_deg: f64, datetime: &DateTime<Utc>) -> f64 {
    let decl = solar_declination(day_of_year(datetime));
    let solar_time = hour_of_day(datetime) + lon_deg / 15.0;
    let hour_angle = (15.0 * (solar_time - 12.0)).to_radians();
    let lat = lat_deg.to_radians();
    lat.sin() * decl.sin() + lat.cos() * decl.cos() * hour_angle.cos()
}

/// Top-of-atmosphere irradiance as a fraction of the solar constant
pub fn toa_radiation(lat_deg: f64, lon_deg: f64, datetime: &DateTime<Utc>) -> f64 {
    eccentricity_factor(day_of_year(datetime)) * cos_solar_zenith(lat_deg, lon_deg, datetime).max(0.0)
}

/// `(cos, sin)` of `2π·value/period`
pub fn cyclic_encoding(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.cos(), angle.sin())
}
