//! Solar calculations for sun-relative schedules.
//!
//! Implements the standard sunrise-equation approximation (NOAA-style):
//! good to a couple of minutes, which is plenty for home automation. At
//! polar latitudes the sun may not rise or set on a given date; that case
//! is reported as `None` and the scheduler skips the day.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use nido_domain::time::Timestamp;

/// Geographic location for astronomical schedules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

/// Computed sun event times for one date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunTimes {
    pub sunrise: Timestamp,
    pub sunset: Timestamp,
}

/// Julian day at 2000-01-01 12:00 UTC (the J2000 epoch).
const J2000: f64 = 2_451_545.0;
/// Offset between the Julian and Unix epochs, in days.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
/// Mean obliquity of the ecliptic, degrees.
const OBLIQUITY: f64 = 23.4397;
/// Solar disc correction: refraction plus apparent radius, degrees.
const SUN_ALTITUDE: f64 = -0.833;

/// Compute sunrise and sunset (UTC) for a date at a location.
///
/// Returns `None` during polar day or polar night.
#[must_use]
pub fn sun_times(date: NaiveDate, location: Location) -> Option<SunTimes> {
    let julian_day = f64::from(date.num_days_from_ce()) + 1_721_425.0;
    let n = julian_day - J2000 + 0.0008;

    // Mean solar noon at this longitude.
    let mean_noon = n - location.longitude / 360.0;

    // Solar mean anomaly and equation of the center.
    let mean_anomaly = (357.5291 + 0.985_600_28 * mean_noon).rem_euclid(360.0);
    let m_rad = mean_anomaly.to_radians();
    let center =
        1.9148 * m_rad.sin() + 0.0200 * (2.0 * m_rad).sin() + 0.0003 * (3.0 * m_rad).sin();

    // Ecliptic longitude and solar transit.
    let ecliptic_longitude = (mean_anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
    let l_rad = ecliptic_longitude.to_radians();
    let transit = J2000 + mean_noon + 0.0053 * m_rad.sin() - 0.0069 * (2.0 * l_rad).sin();

    // Declination of the sun.
    let sin_declination = l_rad.sin() * OBLIQUITY.to_radians().sin();
    let declination = sin_declination.asin();

    // Hour angle of the sun at the requested altitude.
    let latitude = location.latitude.to_radians();
    let cos_hour_angle = (SUN_ALTITUDE.to_radians().sin() - latitude.sin() * declination.sin())
        / (latitude.cos() * declination.cos());
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return None;
    }
    let hour_angle = cos_hour_angle.acos().to_degrees();

    let sunrise = julian_to_timestamp(transit - hour_angle / 360.0)?;
    let sunset = julian_to_timestamp(transit + hour_angle / 360.0)?;
    Some(SunTimes { sunrise, sunset })
}

fn julian_to_timestamp(julian: f64) -> Option<Timestamp> {
    #[allow(clippy::cast_possible_truncation)]
    let unix_seconds = ((julian - UNIX_EPOCH_JD) * 86_400.0).round() as i64;
    DateTime::<Utc>::from_timestamp(unix_seconds, 0)
}
