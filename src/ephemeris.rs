//! # Time-step planning and ephemeris resolution
//!
//! Turns a target (identifier, explicit coordinates, or rows read from a file) and an
//! observing window into the ordered list of [`EphemerisRow`]s that drives the rest of
//! the pipeline.
//!
//! ## Overview
//!
//! 1. **Time-step planning**: [`EphemerisRequest`] bundles the identifier, the first instant,
//!    the [`Step`] and the number of results, exactly as the ephemeris service expects them.
//!    [`EphemerisRequest::covering`] derives the count needed to span a [`TimeWindow`].
//! 2. **Resolution**: [`resolve_ephemeris`] calls an [`EphemerisService`] once (no retry) and
//!    restricts the answer to the closed window.
//! 3. **Fixed targets**: [`fixed_position_rows`] produces the same table locally for a
//!    sidereal target, one row per step.
//!
//! See also
//! ------------
//! * [`crate::services::horizons`] – HTTP client for the ephemeris service.
//! * [`crate::observing_block`] – ephemeris rows read from `.eph` files.
use hifitime::Epoch;
use std::cmp::Ordering;

use crate::constants::{Degree, MAX_EPHEMERIS_ROWS};
use crate::coordinates::SkyCoord;
use crate::services::EphemerisService;
use crate::skypatch_errors::SkyPatchError;
use crate::time::{format_utc, Step, TimeWindow};

/// Predicted position of the target at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EphemerisRow {
    pub timestamp: Epoch,
    pub ra_deg: Degree,
    pub dec_deg: Degree,
}

impl EphemerisRow {
    pub fn new(timestamp: Epoch, ra_deg: Degree, dec_deg: Degree) -> Result<Self, SkyPatchError> {
        let coord = SkyCoord::new(ra_deg, dec_deg)?;
        Ok(EphemerisRow {
            timestamp,
            ra_deg: coord.ra,
            dec_deg: coord.dec,
        })
    }

    pub fn coord(&self) -> SkyCoord {
        SkyCoord {
            ra: self.ra_deg,
            dec: self.dec_deg,
        }
    }
}

impl std::fmt::Display for EphemerisRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}  {:>11.6}  {:>+10.6}",
            format_utc(self.timestamp),
            self.ra_deg,
            self.dec_deg
        )
    }
}

/// An ephemeris request as understood by the ephemeris service.
#[derive(Debug, Clone, PartialEq)]
pub struct EphemerisRequest {
    pub identifier: String,
    pub start: Epoch,
    pub step: Step,
    pub count: usize,
}

impl EphemerisRequest {
    /// Build a request, rejecting an empty identifier and a zero count.
    pub fn new(
        identifier: &str,
        start: Epoch,
        step: Step,
        count: usize,
    ) -> Result<Self, SkyPatchError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(SkyPatchError::invalid_input(
                "identifier",
                "target identifier is empty",
            ));
        }
        if count == 0 {
            return Err(SkyPatchError::InvalidWindow(
                "result count must be a positive integer".into(),
            ));
        }
        check_row_count(count)?;
        Ok(EphemerisRequest {
            identifier: identifier.to_string(),
            start,
            step,
            count,
        })
    }

    /// Request starting at the window start, with enough steps to reach its end.
    pub fn covering(
        identifier: &str,
        window: &TimeWindow,
        step: Step,
    ) -> Result<Self, SkyPatchError> {
        EphemerisRequest::new(identifier, window.start(), step, window.step_count(&step))
    }

    /// Instant of the last requested row.
    pub fn stop(&self) -> Epoch {
        self.start + self.step.duration() * (self.count.saturating_sub(1) as i64)
    }
}

/// Keep the rows inside `window` (bounds included), in chronological order.
///
/// The sort is stable, so rows sharing a timestamp keep their service order.
pub fn restrict_to_window(rows: Vec<EphemerisRow>, window: &TimeWindow) -> Vec<EphemerisRow> {
    let mut kept: Vec<EphemerisRow> = rows
        .into_iter()
        .filter(|row| window.contains(row.timestamp))
        .collect();
    kept.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(Ordering::Equal)
    });
    kept
}

/// Query the ephemeris service and restrict its answer to `window`.
///
/// Arguments
/// -----------------
/// * `service`: the ephemeris service, called exactly once.
/// * `request`: identifier, first instant, step and count.
/// * `window`: the closed observing window.
///
/// Return
/// ----------
/// * The rows inside the window, chronologically ordered.
/// * [`SkyPatchError::EmptyResult`] when no row falls inside the window; service errors
///   ([`SkyPatchError::TargetNotFound`], [`SkyPatchError::ServiceTimeout`]) are returned as is.
pub fn resolve_ephemeris(
    service: &dyn EphemerisService,
    request: &EphemerisRequest,
    window: &TimeWindow,
) -> Result<Vec<EphemerisRow>, SkyPatchError> {
    log::info!(
        "requesting {} ephemeris rows for {} every {} from {}",
        request.count,
        request.identifier,
        request.step,
        format_utc(request.start)
    );
    let rows = service.ephemeris(request)?;
    let received = rows.len();
    let kept = restrict_to_window(rows, window);
    log::debug!(
        "{} of {received} ephemeris rows lie within [{}, {}]",
        kept.len(),
        format_utc(window.start()),
        format_utc(window.end())
    );

    if kept.is_empty() {
        return Err(SkyPatchError::EmptyResult(format!(
            "no ephemeris row for {} between {} and {}",
            request.identifier,
            format_utc(window.start()),
            format_utc(window.end())
        )));
    }
    Ok(kept)
}

fn check_row_count(count: usize) -> Result<(), SkyPatchError> {
    if count > MAX_EPHEMERIS_ROWS {
        return Err(SkyPatchError::InvalidWindow(format!(
            "{count} ephemeris rows requested, at most {MAX_EPHEMERIS_ROWS} are allowed"
        )));
    }
    Ok(())
}

/// Rows for a target that does not move: `coord` at every step of `window`.
pub fn fixed_position_rows(
    coord: SkyCoord,
    window: &TimeWindow,
    step: &Step,
) -> Result<Vec<EphemerisRow>, SkyPatchError> {
    check_row_count(window.step_count(step))?;
    Ok(window
        .steps(step)
        .map(|timestamp| EphemerisRow {
            timestamp,
            ra_deg: coord.ra,
            dec_deg: coord.dec,
        })
        .collect())
}
