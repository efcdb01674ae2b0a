//! # Constants and type definitions for skypatch
//!
//! This module centralizes the **unit conversions**, the **fixed observing thresholds** and the
//! **common type aliases** used throughout the crate.
//!
//! ## Overview
//!
//! - Angular unit conversions (degrees, radians, arcminutes)
//! - Thresholds of the planning pipeline (background field, best-seen distance, widening rule)
//! - Core type aliases used across the crate
//!
//! The thresholds are defaults: every one of them can be overridden through
//! [`PlannerConfig`](crate::config::PlannerConfig).

// -------------------------------------------------------------------------------------------------
// Unit conversions
// -------------------------------------------------------------------------------------------------

/// 2π, useful for trigonometric conversions
pub const DPI: f64 = 2. * std::f64::consts::PI;

/// MJD epoch of J2000.0 (2000-01-01 12:00:00 TT)
pub const T2000: f64 = 51544.5;

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Arcminutes per degree
pub const ARCMIN_PER_DEG: f64 = 60.0;

// -------------------------------------------------------------------------------------------------
// Pipeline thresholds
// -------------------------------------------------------------------------------------------------

/// Field of view of the background cutouts, wider than any science field.
pub const BACKGROUND_FOV_ARCMIN: ArcMin = 8.0;

/// Width and height of a background cutout in pixels.
pub const CUTOUT_PIXELS: usize = 1000;

/// Instrument fields at or below this size get a widened catalog search window.
pub const SMALL_FOV_ARCMIN: ArcMin = 1.0;

/// Amount added to a small field of view to build its catalog search window.
pub const FOV_WIDENING_ARCMIN: ArcMin = 1.0;

/// A patch is clean when its brightest source lies farther than this from the target.
pub const BEST_SEEN_THRESHOLD_ARCMIN: ArcMin = 1.0;

/// Default radius of the proximity flagging pass.
pub const DEFAULT_PROXIMITY_RADIUS_ARCMIN: ArcMin = 0.5;

/// Most rows one ephemeris request may ask for (Horizons itself stops near 90 000).
pub const MAX_EPHEMERIS_ROWS: usize = 90_000;

/// Default upper bound of the per-patch worker pool.
pub const DEFAULT_MAX_WORKERS: usize = 4;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Angle in arcminutes
pub type ArcMin = f64;
/// Angle in radians
pub type Radian = f64;

/// Convert arcminutes to degrees.
#[inline]
pub fn arcmin_to_deg(value: ArcMin) -> Degree {
    value / ARCMIN_PER_DEG
}

/// Convert degrees to arcminutes.
#[inline]
pub fn deg_to_arcmin(value: Degree) -> ArcMin {
    value * ARCMIN_PER_DEG
}
