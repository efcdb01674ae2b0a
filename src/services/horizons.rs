//! # JPL Horizons ephemeris client
//!
//! Requests an **observer table** (astrometric RA/DEC in degrees, one row per step) from the
//! JPL Horizons API and parses its `$$SOE … $$EOE` block into [`EphemerisRow`]s.
//!
//! The reply is plain text. The column header sits on the line right before the star
//! separator that precedes `$$SOE`, and the data rows are comma separated:
//!
//! ```text
//!  Date__(UT)__HR:MN:SS, , , R.A.___(ICRF), DEC____(ICRF),
//! ***********************************************************
//! $$SOE
//!  2024-Jan-01 00:00:00, , ,  47.41577,  13.64213,
//! $$EOE
//! ```
//!
//! The header is rewritten to stable field names, glued back above the data and the result
//! deserialized with `csv` + `serde`.
use hifitime::Epoch;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::env_state::PlannerEnv;
use crate::ephemeris::{EphemerisRequest, EphemerisRow};
use crate::services::EphemerisService;
use crate::skypatch_errors::{SkyPatchError, Stage};
use crate::time::{format_utc, parse_utc_datetime, Step, StepUnit};

pub const HORIZONS_URL: &str = "https://ssd.jpl.nasa.gov/api/horizons.api";

/// Geocentric observer, the default of minor-planet ephemeris services.
pub const GEOCENTER: &str = "500@399";

static TABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)([^\n]*)\n\*+\n\$\$SOE\n(.*?)\$\$EOE").expect("valid Horizons table regex")
});

const NOT_FOUND_MARKERS: [&str; 4] = [
    "No matches found",
    "Unknown target",
    "No ephemeris for target",
    "Cannot find",
];

/// HTTP client for the Horizons observer-table API.
#[derive(Debug, Clone)]
pub struct HorizonsClient {
    env: PlannerEnv,
    url: String,
    /// Horizons site code of the observer
    center: String,
}

impl HorizonsClient {
    pub fn new(env: PlannerEnv) -> Self {
        HorizonsClient {
            env,
            url: HORIZONS_URL.to_string(),
            center: GEOCENTER.to_string(),
        }
    }

    /// Observe from another site, e.g. `"309"` for Paranal.
    pub fn with_center(mut self, center: impl Into<String>) -> Self {
        self.center = center.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn request_params(&self, request: &EphemerisRequest) -> Result<Vec<(&'static str, String)>, SkyPatchError> {
        Ok(vec![
            ("format", "text".into()),
            ("COMMAND", small_body_command(&request.identifier)),
            ("OBJ_DATA", "'NO'".into()),
            ("MAKE_EPHEM", "'YES'".into()),
            ("EPHEM_TYPE", "'OBSERVER'".into()),
            ("CENTER", format!("'{}'", self.center)),
            ("START_TIME", format!("'{}'", format_utc(request.start))),
            ("STOP_TIME", format!("'{}'", format_utc(stop_time(request)))),
            ("STEP_SIZE", format!("'{}'", horizons_step(&request.step)?)),
            ("QUANTITIES", "'1'".into()),
            ("ANG_FORMAT", "'DEG'".into()),
            ("CAL_FORMAT", "'CAL'".into()),
            ("TIME_DIGITS", "'SECONDS'".into()),
            ("CSV_FORMAT", "'YES'".into()),
        ])
    }
}

impl EphemerisService for HorizonsClient {
    fn ephemeris(&self, request: &EphemerisRequest) -> Result<Vec<EphemerisRow>, SkyPatchError> {
        let params = self.request_params(request)?;
        let reply = self
            .env
            .get_text(Stage::Ephemeris, &request.identifier, &self.url, &params)?;
        let mut rows = parse_observer_table(&request.identifier, &reply)?;
        rows.truncate(request.count);
        Ok(rows)
    }
}

/// Small-body lookup: a trailing `;` keeps `1` from resolving to a planet barycenter.
fn small_body_command(identifier: &str) -> String {
    format!("'{};'", identifier.trim().trim_end_matches(';'))
}

/// Horizons rejects a stop time equal to the start, so a single row asks for one extra step.
fn stop_time(request: &EphemerisRequest) -> Epoch {
    if request.count > 1 {
        request.stop()
    } else {
        request.start + request.step.duration()
    }
}

/// Step size in the Horizons syntax, which has no unit below the minute.
fn horizons_step(step: &Step) -> Result<String, SkyPatchError> {
    match step.unit {
        StepUnit::Seconds if step.value % 60 == 0 => Ok(format!("{}m", step.value / 60)),
        StepUnit::Seconds => Err(SkyPatchError::invalid_input(
            "step",
            "the ephemeris service only accepts whole minutes",
        )),
        _ => Ok(step.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct ObserverRecord {
    date: String,
    ra: f64,
    dec: f64,
}

/// Name the columns used downstream; the remaining ones get unique throwaway names.
fn normalize_header(header: &str) -> String {
    header
        .split(',')
        .enumerate()
        .map(|(i, name)| {
            let name = name.trim();
            if name.starts_with("Date") {
                "date".to_string()
            } else if name.starts_with("R.A.") {
                "ra".to_string()
            } else if name.starts_with("DEC") {
                "dec".to_string()
            } else {
                format!("skip_{i}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a Horizons calendar date, e.g. `2024-Jan-01 00:20:00.000`.
fn parse_calendar_date(value: &str) -> Result<Epoch, SkyPatchError> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let bad = || SkyPatchError::EphemerisParse(format!("unexpected date '{value}'"));

    let (date, clock) = value.trim().split_once(' ').ok_or_else(bad)?;
    let mut parts = date.split('-');
    let (year, month, day) = match (parts.next(), parts.next(), parts.next()) {
        (Some(y), Some(m), Some(d)) => (y, m, d),
        _ => return Err(bad()),
    };
    let month = MONTHS
        .iter()
        .position(|m| *m == month)
        .ok_or_else(bad)?
        + 1;
    parse_utc_datetime("timestamp", &format!("{year}-{month:02}-{day} {}", clock.trim()))
        .map_err(|_| bad())
}

/// Parse the observer table of a Horizons text reply.
///
/// Return
/// ----------
/// * The rows of the `$$SOE` block in reply order.
/// * [`SkyPatchError::TargetNotFound`] when Horizons could not resolve `identifier`.
/// * [`SkyPatchError::EphemerisParse`] on any other malformed reply.
pub(crate) fn parse_observer_table(
    identifier: &str,
    reply: &str,
) -> Result<Vec<EphemerisRow>, SkyPatchError> {
    let Some(captures) = TABLE_REGEX.captures(reply) else {
        if NOT_FOUND_MARKERS.iter().any(|m| reply.contains(m)) {
            return Err(SkyPatchError::TargetNotFound(identifier.to_string()));
        }
        log::debug!("ephemeris reply without a data block:\n{reply}");
        return Err(SkyPatchError::EphemerisParse(format!(
            "no $$SOE block in the reply for {identifier}"
        )));
    };

    let header = normalize_header(captures[1].trim().trim_end_matches(','));
    let data: String = captures[2]
        .lines()
        .map(|l| l.trim().trim_end_matches(','))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let table = format!("{header}\n{data}");

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(table.as_bytes());

    reader
        .deserialize::<ObserverRecord>()
        .map(|record| {
            let record =
                record.map_err(|e| SkyPatchError::EphemerisParse(format!("bad row: {e}")))?;
            let timestamp = parse_calendar_date(&record.date)?;
            EphemerisRow::new(timestamp, record.ra, record.dec)
                .map_err(|e| SkyPatchError::EphemerisParse(e.to_string()))
        })
        .collect()
}
