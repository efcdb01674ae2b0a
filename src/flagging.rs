//! # Contamination flagging
//!
//! Two independent passes over the processed patches, plus the best-seen summary.
//!
//! * **Brightness** ([`brightness_flag`]): the source with the smallest flag magnitude
//!   (first in catalog order on ties), with its coordinate, magnitude, separation from the
//!   target and the patch date.
//! * **Proximity** ([`flag_proximity`]): every source inside a circle of the given radius
//!   around the target. The circle is evaluated in the pixel grid of the patch cutout, so the
//!   test matches what is seen on the image. The outcome is recorded on the patch.
//! * **Best seen** ([`best_seen_window`]): a patch is *clean* when it has no sources or when
//!   its brightest source lies farther than a threshold from the target. The longest run of
//!   consecutive clean patches is reported (the earliest on ties). Without any clean patch
//!   the target is best seen outside the requested window.
//!
//! Patches without sources never fail a pass: they yield [`FlagOutcome::NoSources`].
//!
//! Reports
//! -----------------
//! [`FlagSummary`] renders the per-patch notices as text lines
//! (`"There is a 18.000 mag source within 2.000 arcmin of the target on …"`) or as a
//! `comfy-table` table.
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, ContentArrangement, Row, Table};
use hifitime::Epoch;
use std::fmt;

use crate::config::{CatalogSpec, PlannerConfig};
use crate::constants::{arcmin_to_deg, deg_to_arcmin, ArcMin, Degree};
use crate::coordinates::SkyCoord;
use crate::sky_patch::SkyPatch;
use crate::skypatch_errors::SkyPatchError;
use crate::time::format_utc;
use crate::wcs::PixelCircle;

/// Text of the sentinel returned for patches without sources.
pub const NO_SOURCES: &str = "no sources";

/// Result of a flagging pass on one patch.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagOutcome<T> {
    /// The catalog returned nothing around the target.
    NoSources,
    /// The sources of the patch could not be derived.
    Unavailable(String),
    Flagged(T),
}

impl<T> FlagOutcome<T> {
    pub fn is_no_sources(&self) -> bool {
        matches!(self, FlagOutcome::NoSources)
    }

    pub fn flagged(&self) -> Option<&T> {
        match self {
            FlagOutcome::Flagged(f) => Some(f),
            _ => None,
        }
    }
}

impl<T: fmt::Display> fmt::Display for FlagOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagOutcome::NoSources => f.write_str(NO_SOURCES),
            FlagOutcome::Unavailable(reason) => write!(f, "unavailable ({reason})"),
            FlagOutcome::Flagged(flag) => flag.fmt(f),
        }
    }
}

/// Brightest source of a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct BrightnessFlag {
    pub coord: SkyCoord,
    pub magnitude: f64,
    /// Separation from the target, in degrees
    pub separation: Degree,
    pub timestamp: Epoch,
}

impl fmt::Display for BrightnessFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "There is a {:.3} mag source within {:.3} arcmin of the target on {}",
            self.magnitude,
            deg_to_arcmin(self.separation),
            format_utc(self.timestamp)
        )
    }
}

/// Sources inside the proximity circle of a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityFlag {
    pub radius: ArcMin,
    pub flagged: Vec<SkyCoord>,
    pub timestamp: Epoch,
}

impl ProximityFlag {
    pub fn count(&self) -> usize {
        self.flagged.len()
    }
}

impl fmt::Display for ProximityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "There are {} sources within {} arcmin of the target on {}",
            self.count(),
            self.radius,
            format_utc(self.timestamp)
        )
    }
}

/// Outcome shared by both passes when the patch has nothing to flag.
fn short_circuit<T>(patch: &SkyPatch) -> Option<FlagOutcome<T>> {
    if patch.has_no_sources() {
        return Some(FlagOutcome::NoSources);
    }
    if let Some(reason) = patch.source_error() {
        return Some(FlagOutcome::Unavailable(reason.to_string()));
    }
    if patch.filtered_sources().is_none() {
        return Some(FlagOutcome::Unavailable("patch not processed".into()));
    }
    None
}

/// Brightest source of `patch` in the catalog's flag magnitude.
///
/// Sources with a blank magnitude are ignored; an unreadable one makes the outcome
/// [`FlagOutcome::Unavailable`]. Pure function of the patch state.
pub fn brightness_flag(
    patch: &SkyPatch,
    catalog: &CatalogSpec,
) -> Result<FlagOutcome<BrightnessFlag>, SkyPatchError> {
    if let Some(outcome) = short_circuit(patch) {
        return Ok(outcome);
    }
    let Some(sources) = patch.filtered_sources() else {
        return Ok(FlagOutcome::Unavailable("patch not processed".into()));
    };

    let mut brightest: Option<(usize, f64)> = None;
    for (i, row) in sources.rows().iter().enumerate() {
        let mag = match sources.value(row, &catalog.flag_mag_column) {
            Ok(Some(mag)) => mag,
            Ok(None) => continue,
            // a malformed magnitude only spoils this patch
            Err(e) => return Ok(FlagOutcome::Unavailable(e.to_string())),
        };
        if brightest.map_or(true, |(_, best)| mag < best) {
            brightest = Some((i, mag));
        }
    }

    let Some((i, magnitude)) = brightest else {
        return Ok(FlagOutcome::Unavailable(format!(
            "no {} magnitude",
            catalog.flag_mag_column
        )));
    };
    Ok(FlagOutcome::Flagged(BrightnessFlag {
        coord: patch.source_coords()[i],
        magnitude,
        separation: patch.angular_separations()[i],
        timestamp: patch.timestamp(),
    }))
}

/// Sources of `patch` within `radius` arcminutes of the target, without touching the patch.
///
/// Return
/// ----------
/// * [`SkyPatchError::WcsError`] when the patch has sources but no cutout yet.
pub fn proximity_flag(
    patch: &SkyPatch,
    radius: ArcMin,
) -> Result<FlagOutcome<ProximityFlag>, SkyPatchError> {
    if let Some(outcome) = short_circuit(patch) {
        return Ok(outcome);
    }
    let wcs = patch
        .cutout_wcs()
        .ok_or_else(|| SkyPatchError::WcsError(format!("{patch} has no cutout WCS")))?;

    let circle = PixelCircle::from_sky(wcs, &patch.center(), arcmin_to_deg(radius))?;
    let flagged = patch
        .source_coords()
        .iter()
        .filter(|c| circle.contains(wcs, c))
        .copied()
        .collect();

    Ok(FlagOutcome::Flagged(ProximityFlag {
        radius,
        flagged,
        timestamp: patch.timestamp(),
    }))
}

/// [`proximity_flag`], recording the radius and the flagged sources on the patch.
pub fn flag_proximity(
    patch: &mut SkyPatch,
    radius: ArcMin,
) -> Result<FlagOutcome<ProximityFlag>, SkyPatchError> {
    let outcome = proximity_flag(patch, radius)?;
    if let FlagOutcome::Flagged(flag) = &outcome {
        patch.record_proximity(radius, flag.flagged.clone());
    }
    Ok(outcome)
}

/// When the target is best observed.
#[derive(Debug, Clone, PartialEq)]
pub enum BestSeen {
    /// Consecutive clean patches `first_index..=last_index`.
    Window {
        start: Epoch,
        end: Epoch,
        first_index: usize,
        last_index: usize,
        /// Whether the run covers every patch
        whole: bool,
    },
    /// No clean patch: before `first` or after `last`.
    Outside { first: Epoch, last: Epoch },
}

impl fmt::Display for BestSeen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BestSeen::Window {
                start,
                end,
                whole: true,
                ..
            } => write!(
                f,
                "The target is best seen during the whole window, from {} to {}",
                format_utc(*start),
                format_utc(*end)
            ),
            BestSeen::Window { start, end, .. } => write!(
                f,
                "The target is best seen from {} to {}",
                format_utc(*start),
                format_utc(*end)
            ),
            BestSeen::Outside { first, last } => write!(
                f,
                "The target is best seen outside the requested window, before {} or after {}",
                format_utc(*first),
                format_utc(*last)
            ),
        }
    }
}

fn is_clean(outcome: &FlagOutcome<BrightnessFlag>, threshold: Degree) -> bool {
    match outcome {
        FlagOutcome::NoSources => true,
        FlagOutcome::Unavailable(_) => false,
        FlagOutcome::Flagged(b) => b.separation > threshold,
    }
}

/// Longest run of clean patches, given the brightness outcome of each patch.
///
/// `patches` and `brightness` are parallel and in chronological order.
pub fn best_seen_from(
    patches: &[SkyPatch],
    brightness: &[FlagOutcome<BrightnessFlag>],
    threshold: ArcMin,
) -> Result<BestSeen, SkyPatchError> {
    let (Some(first), Some(last)) = (patches.first(), patches.last()) else {
        return Err(SkyPatchError::InsufficientData(
            "no patch to evaluate".into(),
        ));
    };
    let threshold = arcmin_to_deg(threshold);

    let mut best: Option<(usize, usize)> = None;
    let mut run_start: Option<usize> = None;
    for (i, outcome) in brightness.iter().enumerate() {
        if is_clean(outcome, threshold) {
            let start = *run_start.get_or_insert(i);
            if best.map_or(true, |(s, e)| i - start > e - s) {
                best = Some((start, i));
            }
        } else {
            run_start = None;
        }
    }

    Ok(match best {
        Some((s, e)) => BestSeen::Window {
            start: patches[s].timestamp(),
            end: patches[e].timestamp(),
            first_index: s,
            last_index: e,
            whole: s == 0 && e + 1 == patches.len(),
        },
        None => BestSeen::Outside {
            first: first.timestamp(),
            last: last.timestamp(),
        },
    })
}

/// [`best_seen_from`] computing the brightness outcomes itself.
pub fn best_seen_window(
    patches: &[SkyPatch],
    catalog: &CatalogSpec,
    threshold: ArcMin,
) -> Result<BestSeen, SkyPatchError> {
    let brightness = patches
        .iter()
        .map(|p| brightness_flag(p, catalog))
        .collect::<Result<Vec<_>, _>>()?;
    best_seen_from(patches, &brightness, threshold)
}

/// Both flags of one patch.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagReport {
    pub index: usize,
    pub timestamp: Epoch,
    pub fov: ArcMin,
    pub brightness: FlagOutcome<BrightnessFlag>,
    pub proximity: FlagOutcome<ProximityFlag>,
}

/// Flags of a whole collection and the best-seen summary.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagSummary {
    pub reports: Vec<FlagReport>,
    pub best_seen: BestSeen,
}

/// Run both passes on every patch, with the thresholds of `config`, leaving the patches
/// untouched.
pub fn evaluate_patches(
    patches: &[SkyPatch],
    config: &PlannerConfig,
) -> Result<FlagSummary, SkyPatchError> {
    let reports = patches
        .iter()
        .map(|patch| {
            Ok(FlagReport {
                index: patch.index(),
                timestamp: patch.timestamp(),
                fov: patch.fov(),
                brightness: brightness_flag(patch, &config.catalog)?,
                proximity: proximity_flag(patch, config.proximity_radius)?,
            })
        })
        .collect::<Result<Vec<_>, SkyPatchError>>()?;

    let brightness: Vec<_> = reports.iter().map(|r| r.brightness.clone()).collect();
    let best_seen = best_seen_from(patches, &brightness, config.best_seen_threshold)?;
    log::info!("{best_seen}");

    Ok(FlagSummary { reports, best_seen })
}

/// Record the proximity outcomes of `summary` on the patches they were computed from.
pub fn record_summary(patches: &mut [SkyPatch], summary: &FlagSummary) {
    for report in &summary.reports {
        let patch = patches.iter_mut().find(|p| p.index() == report.index);
        if let (Some(patch), FlagOutcome::Flagged(flag)) = (patch, &report.proximity) {
            patch.record_proximity(flag.radius, flag.flagged.clone());
        }
    }
}

/// [`evaluate_patches`] followed by [`record_summary`].
pub fn flag_patches(
    patches: &mut [SkyPatch],
    config: &PlannerConfig,
) -> Result<FlagSummary, SkyPatchError> {
    let summary = evaluate_patches(patches, config)?;
    record_summary(patches, &summary);
    Ok(summary)
}

impl FlagReport {
    fn empty_notice(&self, what: &FlagOutcome<impl fmt::Display>) -> String {
        match what {
            FlagOutcome::NoSources => format!(
                "No sources found within {}' of the target on {}",
                self.fov,
                format_utc(self.timestamp)
            ),
            FlagOutcome::Unavailable(reason) => format!(
                "Sources unavailable on {}: {reason}",
                format_utc(self.timestamp)
            ),
            FlagOutcome::Flagged(flag) => flag.to_string(),
        }
    }

    pub fn brightness_notice(&self) -> String {
        self.empty_notice(&self.brightness)
    }

    pub fn proximity_notice(&self) -> String {
        self.empty_notice(&self.proximity)
    }
}

impl FlagSummary {
    /// One brightness notice per patch, newline terminated.
    pub fn brightness_notice(&self) -> String {
        self.reports
            .iter()
            .map(|r| format!("{}\n", r.brightness_notice()))
            .collect()
    }

    /// One proximity notice per patch, newline terminated.
    pub fn proximity_notice(&self) -> String {
        self.reports
            .iter()
            .map(|r| format!("{}\n", r.proximity_notice()))
            .collect()
    }

    /// Render the reports with comfy-table.
    pub fn table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        table.set_header(vec![
            Cell::new("#"),
            Cell::new("Date (UTC)"),
            Cell::new("Brightest [mag]"),
            Cell::new("RA [deg]"),
            Cell::new("DEC [deg]"),
            Cell::new("Sep. [arcmin]"),
            Cell::new("Nearby"),
        ]);

        for r in &self.reports {
            let (mag, ra, dec, sep) = match &r.brightness {
                FlagOutcome::Flagged(b) => (
                    format!("{:.3}", b.magnitude),
                    format!("{:.6}", b.coord.ra),
                    format!("{:+.6}", b.coord.dec),
                    format!("{:.3}", deg_to_arcmin(b.separation)),
                ),
                other => (other_label(other), "-".into(), "-".into(), "-".into()),
            };
            let nearby = match &r.proximity {
                FlagOutcome::Flagged(p) => format!("{} within {}'", p.count(), p.radius),
                other => other_label(other),
            };

            table.add_row(Row::from(vec![
                Cell::new(r.index).set_alignment(CellAlignment::Right),
                Cell::new(format_utc(r.timestamp)),
                Cell::new(mag).set_alignment(CellAlignment::Right),
                Cell::new(ra).set_alignment(CellAlignment::Right),
                Cell::new(dec).set_alignment(CellAlignment::Right),
                Cell::new(sep).set_alignment(CellAlignment::Right),
                Cell::new(nearby).set_alignment(CellAlignment::Right),
            ]));
        }

        table.to_string()
    }
}

fn other_label<T>(outcome: &FlagOutcome<T>) -> String {
    match outcome {
        FlagOutcome::NoSources => NO_SOURCES.to_string(),
        FlagOutcome::Unavailable(_) => "unavailable".to_string(),
        FlagOutcome::Flagged(_) => String::new(),
    }
}
