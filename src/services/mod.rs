//! # External services
//!
//! The planner is a *client* of three network services. Each one sits behind a trait so the
//! pipeline can run against the real HTTP clients or against in-memory fakes:
//!
//! | Trait | Request | Answer | HTTP client |
//! |---|---|---|---|
//! | [`EphemerisService`] | identifier, start, step, count | ordered [`EphemerisRow`]s | [`horizons::HorizonsClient`] |
//! | [`CatalogService`] | center, box size, catalog | [`CatalogTable`] (may be empty) | [`vizier::VizierClient`] |
//! | [`CutoutService`] | center, fov, pixel size, survey, rotation | image plane + [`Wcs`] | [`hips::HipsClient`] |
//!
//! The traits require `Send + Sync`: catalog and cutout requests are issued from the worker pool.
use ndarray::Array2;

use crate::catalog::CatalogTable;
use crate::config::CatalogSpec;
use crate::constants::{ArcMin, Degree};
use crate::coordinates::SkyCoord;
use crate::ephemeris::{EphemerisRequest, EphemerisRow};
use crate::skypatch_errors::SkyPatchError;
use crate::wcs::Wcs;

pub mod hips;
pub mod horizons;
pub mod vizier;

/// Predicted positions of a moving target.
pub trait EphemerisService: Send + Sync {
    /// Rows in chronological order, starting at `request.start`.
    ///
    /// Fails with [`SkyPatchError::TargetNotFound`] when the identifier does not resolve.
    fn ephemeris(&self, request: &EphemerisRequest) -> Result<Vec<EphemerisRow>, SkyPatchError>;
}

/// Rectangular cone search around a sky position.
#[derive(Debug, Clone, PartialEq)]
pub struct ConeSearch<'a> {
    pub center: SkyCoord,
    pub width: ArcMin,
    pub height: ArcMin,
    pub catalog: &'a CatalogSpec,
}

pub trait CatalogService: Send + Sync {
    /// All rows matching the catalog's column filters, without a row cap.
    ///
    /// An empty answer is a valid result, not an error.
    fn cone_search(&self, query: &ConeSearch<'_>) -> Result<CatalogTable, SkyPatchError>;
}

/// Background image request.
#[derive(Debug, Clone, PartialEq)]
pub struct CutoutRequest {
    pub center: SkyCoord,
    /// Angular width of the cutout, in degrees
    pub fov: Degree,
    pub width: usize,
    pub height: usize,
    pub survey_id: String,
    pub rotation: Option<Degree>,
}

/// One image plane with its world-coordinate mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Cutout {
    /// Pixel values, shape `(height, width)`
    pub image: Array2<f64>,
    pub wcs: Wcs,
}

impl Cutout {
    /// Pair an image with its WCS, checking that the shapes agree.
    pub fn new(image: Array2<f64>, wcs: Wcs) -> Result<Self, SkyPatchError> {
        if image.dim() != (wcs.height, wcs.width) {
            return Err(SkyPatchError::WcsError(format!(
                "image shape {:?} does not match the WCS size {}x{}",
                image.dim(),
                wcs.width,
                wcs.height
            )));
        }
        Ok(Cutout { image, wcs })
    }
}

pub trait CutoutService: Send + Sync {
    fn cutout(&self, request: &CutoutRequest) -> Result<Cutout, SkyPatchError>;
}
