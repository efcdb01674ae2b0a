//! # Time handling for observation planning
//!
//! Parsing of user-provided UTC instants, the time-step description consumed by the
//! ephemeris service, and the closed observing window every ephemeris is restricted to.
//!
//! All instants are carried as [`hifitime::Epoch`] in the UTC time scale.
use hifitime::{Duration, Epoch, Unit};
use std::str::FromStr;

use crate::constants::{Radian, DPI, T2000};
use crate::skypatch_errors::SkyPatchError;

/// Parse a UTC date-time in the format `YYYY-MM-DD HH:MM:SS` (a `T` separator is accepted too).
///
/// Arguments
/// -----------------
/// * `field`: name of the input field, reported back on failure.
/// * `value`: the date-time string.
///
/// Return
/// ----------
/// * The parsed [`Epoch`] (UTC), or [`SkyPatchError::InvalidInput`] naming `field`.
pub fn parse_utc_datetime(field: &str, value: &str) -> Result<Epoch, SkyPatchError> {
    let (date, clock) = value
        .trim()
        .split_once([' ', 'T'])
        .filter(|(date, clock)| {
            date.split('-').count() == 3 && clock.trim().split(':').count() == 3
        })
        .ok_or_else(|| SkyPatchError::invalid_input(field, "expected 'YYYY-MM-DD HH:MM:SS'"))?;

    // without a time scale suffix hifitime reads the instant as UTC
    Epoch::from_gregorian_str(&format!("{date}T{}", clock.trim()))
        .map_err(|e| SkyPatchError::invalid_input(field, e.to_string()))
}

/// Render an epoch as `YYYY-MM-DD HH:MM:SS` (UTC), the format accepted by [`parse_utc_datetime`].
///
/// Sub-second digits are appended only when present.
pub fn format_utc(epoch: Epoch) -> String {
    let (y, mo, d, h, mi, s, ns) = epoch.to_gregorian_utc();
    if ns == 0 {
        format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}")
    } else {
        let millis = (f64::from(ns) / 1e6).round() as u32;
        format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}.{millis:03}")
    }
}

/// Unit of an ephemeris time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl FromStr for StepUnit {
    type Err = SkyPatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "second" | "seconds" => Ok(StepUnit::Seconds),
            "m" | "min" | "minute" | "minutes" => Ok(StepUnit::Minutes),
            "h" | "hour" | "hours" => Ok(StepUnit::Hours),
            "d" | "day" | "days" => Ok(StepUnit::Days),
            other => Err(SkyPatchError::invalid_input(
                "step_unit",
                format!("unknown step unit '{other}'"),
            )),
        }
    }
}

/// A positive time step, e.g. `20 minutes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub value: u32,
    pub unit: StepUnit,
}

impl Step {
    /// Build a step, rejecting a zero value.
    pub fn new(value: u32, unit: StepUnit) -> Result<Self, SkyPatchError> {
        if value == 0 {
            return Err(SkyPatchError::InvalidWindow(
                "step must be a positive integer".into(),
            ));
        }
        Ok(Step { value, unit })
    }

    /// Parse a step from the raw user fields (`"20"`, `"min"`).
    pub fn parse(value: &str, unit: &str) -> Result<Self, SkyPatchError> {
        let value = value.trim();
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(SkyPatchError::invalid_input(
                "step",
                "step must be an integer",
            ));
        }
        let value = u32::from_str(value)
            .map_err(|_| SkyPatchError::invalid_input("step", "step is too large"))?;
        Step::new(value, unit.parse()?)
    }

    pub fn duration(&self) -> Duration {
        let unit = match self.unit {
            StepUnit::Seconds => Unit::Second,
            StepUnit::Minutes => Unit::Minute,
            StepUnit::Hours => Unit::Hour,
            StepUnit::Days => Unit::Day,
        };
        unit * i64::from(self.value)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.unit {
            StepUnit::Seconds => write!(f, "{}s", self.value),
            StepUnit::Minutes => write!(f, "{}m", self.value),
            StepUnit::Hours => write!(f, "{}h", self.value),
            StepUnit::Days => write!(f, "{}d", self.value),
        }
    }
}

/// Parse a positive result count from a raw user field.
pub fn parse_count(value: &str) -> Result<usize, SkyPatchError> {
    let value = value.trim();
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(SkyPatchError::invalid_input(
            "n_results",
            "N. Results must be an integer",
        ));
    }
    match usize::from_str(value) {
        Ok(0) => Err(SkyPatchError::InvalidWindow(
            "result count must be a positive integer".into(),
        )),
        Ok(n) => Ok(n),
        Err(_) => Err(SkyPatchError::invalid_input(
            "n_results",
            "N. Results is too large",
        )),
    }
}

/// Closed observing window `[start, end]`, with `start` strictly before `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    start: Epoch,
    end: Epoch,
}

impl TimeWindow {
    pub fn new(start: Epoch, end: Epoch) -> Result<Self, SkyPatchError> {
        if start >= end {
            return Err(SkyPatchError::InvalidWindow(format!(
                "start {start} is not strictly before end {end}"
            )));
        }
        Ok(TimeWindow { start, end })
    }

    /// Build a window from raw `YYYY-MM-DD HH:MM:SS` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, SkyPatchError> {
        let start = parse_utc_datetime("start", start)?;
        let end = parse_utc_datetime("end", end)?;
        TimeWindow::new(start, end)
    }

    pub fn start(&self) -> Epoch {
        self.start
    }

    pub fn end(&self) -> Epoch {
        self.end
    }

    /// Inclusive on both bounds.
    pub fn contains(&self, epoch: Epoch) -> bool {
        epoch >= self.start && epoch <= self.end
    }

    /// Number of instants `start + k·step` inside the window: `floor((end − start) / step) + 1`.
    pub fn step_count(&self, step: &Step) -> usize {
        let span = (self.end - self.start).total_nanoseconds();
        let stride = step.duration().total_nanoseconds();
        usize::try_from(span / stride).map_or(usize::MAX, |n| n.saturating_add(1))
    }

    /// Every instant `start + k·step` that lies inside the window.
    pub fn steps(&self, step: &Step) -> impl Iterator<Item = Epoch> {
        let (start, stride) = (self.start, step.duration());
        (0..self.step_count(step)).map(move |k| start + stride * (k as i64))
    }
}

/// Compute the Greenwich Mean Sidereal Time (GMST) in radians
/// for a given Modified Julian Date (UT1 time scale).
///
/// Uses the IAU 1982 polynomial for the mean sidereal time at 0h UT1, plus the
/// fractional-day rotation term.
///
/// # Arguments
/// * `tjm` - Modified Julian Date (MJD, UT1 time scale)
///
/// # Returns
/// * GMST angle in radians, normalized to the interval [0, 2π).
pub fn gmst(tjm: f64) -> Radian {
    // Polynomial coefficients for GMST at 0h UT1 (in seconds)
    const C0: f64 = 24110.54841;
    const C1: f64 = 8640184.812866;
    const C2: f64 = 9.3104e-2;
    const C3: f64 = -6.2e-6;

    // Ratio of sidereal day to solar day
    const RAP: f64 = 1.00273790934;

    let itjm = tjm.floor();
    let t = (itjm - T2000) / 36525.0;

    let mut gmst0 = ((C3 * t + C2) * t + C1) * t + C0;
    gmst0 *= DPI / 86400.0;

    let h = tjm.fract() * DPI;
    (gmst0 + h * RAP).rem_euclid(DPI)
}

#[cfg(test)]
mod time_test {
    use super::*;

    #[test]
    fn test_parse_utc_datetime() {
        let epoch = parse_utc_datetime("start", "2021-01-01 00:00:00").unwrap();
        assert_eq!(epoch.to_mjd_utc_days(), 59215.0);

        let epoch = parse_utc_datetime("start", "2021-01-02T00:00:00").unwrap();
        assert_eq!(epoch.to_mjd_utc_days(), 59216.0);
    }

    #[test]
    fn test_parse_utc_datetime_errors() {
        let field_of = |field: &str, value: &str| match parse_utc_datetime(field, value) {
            Err(SkyPatchError::InvalidInput { field, .. }) => field,
            other => panic!("expected an input error for '{value}', got {other:?}"),
        };
        assert_eq!(field_of("end", "2021-13-01 00:00:00"), "end");
        assert_eq!(field_of("end", "2021-02-30 00:00:00"), "end");
        assert_eq!(field_of("start", "2021-01-01 24:00:00"), "start");
        assert_eq!(field_of("start", "2021-01-01 00:00"), "start");
        assert_eq!(
            parse_utc_datetime("start", "yesterday"),
            Err(SkyPatchError::invalid_input(
                "start",
                "expected 'YYYY-MM-DD HH:MM:SS'"
            ))
        );

        // leap day only on leap years
        assert!(parse_utc_datetime("start", "2024-02-29 12:00:00").is_ok());
        assert_eq!(field_of("start", "2023-02-29 12:00:00"), "start");
    }

    #[test]
    fn test_format_utc() {
        let epoch = parse_utc_datetime("start", "2023-03-15 04:20:00").unwrap();
        assert_eq!(format_utc(epoch), "2023-03-15 04:20:00");
        assert_eq!(
            parse_utc_datetime("start", &format_utc(epoch)).unwrap(),
            epoch
        );
    }

    #[test]
    fn test_step() {
        let step_day = Step::new(1, StepUnit::Days).unwrap();
        assert_eq!(step_day.to_string(), "1d");
        let step_hours = Step::new(50, StepUnit::Hours).unwrap();
        assert_eq!(step_hours.to_string(), "50h");
        let step_minute = Step::parse("30", "min").unwrap();
        assert_eq!(step_minute.to_string(), "30m");
        assert_eq!(step_minute.duration(), Unit::Minute * 30);
    }

    #[test]
    fn test_step_validation() {
        assert_eq!(
            Step::parse("2.5", "h"),
            Err(SkyPatchError::invalid_input("step", "step must be an integer"))
        );
        assert!(matches!(
            Step::parse("0", "h"),
            Err(SkyPatchError::InvalidWindow(_))
        ));
        assert!(matches!(
            Step::parse("5", "fortnight"),
            Err(SkyPatchError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("12").unwrap(), 12);
        assert!(matches!(parse_count("0"), Err(SkyPatchError::InvalidWindow(_))));
        assert!(matches!(parse_count("-3"), Err(SkyPatchError::InvalidInput { .. })));
    }

    #[test]
    fn test_window() {
        let window = TimeWindow::parse("2024-03-01 00:00:00", "2024-03-01 01:00:00").unwrap();
        let step = Step::new(20, StepUnit::Minutes).unwrap();
        let steps: Vec<Epoch> = window.steps(&step).collect();
        assert_eq!(steps.len(), 4);
        assert_eq!(window.step_count(&step), 4);
        assert_eq!(steps[3], window.end());
        assert!(window.contains(window.start()));
        assert!(window.contains(window.end()));
        assert!(!window.contains(window.end() + Unit::Second * 1));

        assert!(matches!(
            TimeWindow::parse("2024-03-01 01:00:00", "2024-03-01 01:00:00"),
            Err(SkyPatchError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_step_count_without_walking_the_window() {
        let year = TimeWindow::parse("2023-01-01 00:00:00", "2024-01-01 00:00:00").unwrap();
        let second = Step::new(1, StepUnit::Seconds).unwrap();
        assert_eq!(year.step_count(&second), 365 * 86_400 + 1);

        // a step longer than the window still yields the start
        let hour = TimeWindow::parse("2023-01-01 00:00:00", "2023-01-01 00:59:00").unwrap();
        assert_eq!(hour.step_count(&Step::new(1, StepUnit::Hours).unwrap()), 1);
        assert_eq!(hour.step_count(&Step::new(7, StepUnit::Minutes).unwrap()), 9);
    }

    #[test]
    fn test_gmst() {
        let tut = 57028.478514610404;
        let res_gmst = gmst(tut);
        assert!((res_gmst - 4.851925725092499).abs() < 1e-12);

        let res_gmst = gmst(T2000);
        assert!((res_gmst - 4.894961212789145).abs() < 1e-12);
    }
}
