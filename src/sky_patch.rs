//! # Sky patches
//!
//! A [`SkyPatch`] is one time step's local region of sky: where the target is predicted to be
//! (`center`, `timestamp`), what the catalog returned around it, and what was derived from that
//! answer.
//!
//! ## Lifecycle
//!
//! 1. Built by the patch initializer with the raw cone-search answer. The center, timestamp,
//!    instrument field of view and raw result never change afterwards.
//! 2. Filled by the patch processor through pure derivations:
//!    [`SkyPatch::derive_sources`] computes the deduplicated sources, their coordinates and
//!    separations as a [`DerivedSources`] value, which [`SkyPatch::apply_sources`] stores. The
//!    background cutout is stored with [`SkyPatch::attach_cutout`].
//! 3. The flagger records the last proximity pass ([`SkyPatch::record_proximity`]).
//!
//! A patch whose catalog answer is empty has `has_no_sources() == true`; every source-dependent
//! derivation is then a no-op.
use hifitime::Epoch;

use crate::catalog::CatalogTable;
use crate::config::{CatalogSpec, PlannerConfig};
use crate::constants::{arcmin_to_deg, ArcMin, Degree};
use crate::coordinates::SkyCoord;
use crate::ephemeris::EphemerisRow;
use crate::services::{Cutout, CutoutRequest};
use crate::skypatch_errors::SkyPatchError;
use crate::time::format_utc;
use crate::wcs::Wcs;

use ndarray::Array2;

#[derive(Debug, Clone, PartialEq)]
pub struct SkyPatch {
    index: usize,
    center: SkyCoord,
    timestamp: Epoch,
    catalog_id: String,
    image_survey_id: String,
    fov: ArcMin,
    search_width: ArcMin,
    raw_catalog_result: CatalogTable,
    filtered_sources: Option<CatalogTable>,
    source_coords: Vec<SkyCoord>,
    has_no_sources: bool,
    source_error: Option<String>,
    cutout: Option<Cutout>,
    angular_separations: Vec<Degree>,
    flag_radius: Option<ArcMin>,
    flagged_sources: Vec<SkyCoord>,
}

/// Everything derived from the raw catalog answer of a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedSources {
    pub filtered: CatalogTable,
    pub coords: Vec<SkyCoord>,
    pub separations: Vec<Degree>,
}

impl SkyPatch {
    /// Create the patch of ephemeris row `row`, holding the raw cone-search answer.
    ///
    /// `search_width` is the window actually sent to the catalog, which may be wider than
    /// the instrument field of view stored as `fov`.
    pub fn new(
        index: usize,
        row: &EphemerisRow,
        config: &PlannerConfig,
        search_width: ArcMin,
        raw_catalog_result: CatalogTable,
    ) -> Self {
        let has_no_sources = raw_catalog_result.is_empty();
        SkyPatch {
            index,
            center: row.coord(),
            timestamp: row.timestamp,
            catalog_id: config.catalog.service_id.clone(),
            image_survey_id: config.survey_id.clone(),
            fov: config.instrument_fov,
            search_width,
            raw_catalog_result,
            filtered_sources: None,
            source_coords: Vec::new(),
            has_no_sources,
            source_error: None,
            cutout: None,
            angular_separations: Vec::new(),
            flag_radius: None,
            flagged_sources: Vec::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn center(&self) -> SkyCoord {
        self.center
    }

    pub fn timestamp(&self) -> Epoch {
        self.timestamp
    }

    pub fn catalog_id(&self) -> &str {
        &self.catalog_id
    }

    pub fn image_survey_id(&self) -> &str {
        &self.image_survey_id
    }

    /// Instrument field of view, in arcminutes.
    pub fn fov(&self) -> ArcMin {
        self.fov
    }

    /// Width of the catalog search window, in arcminutes.
    pub fn search_width(&self) -> ArcMin {
        self.search_width
    }

    pub fn raw_catalog_result(&self) -> &CatalogTable {
        &self.raw_catalog_result
    }

    pub fn filtered_sources(&self) -> Option<&CatalogTable> {
        self.filtered_sources.as_ref()
    }

    pub fn source_coords(&self) -> &[SkyCoord] {
        &self.source_coords
    }

    pub fn has_no_sources(&self) -> bool {
        self.has_no_sources
    }

    /// Why the sources of this patch could not be derived, if they could not.
    pub fn source_error(&self) -> Option<&str> {
        self.source_error.as_deref()
    }

    pub fn cutout(&self) -> Option<&Cutout> {
        self.cutout.as_ref()
    }

    pub fn cutout_image(&self) -> Option<&Array2<f64>> {
        self.cutout.as_ref().map(|c| &c.image)
    }

    pub fn cutout_wcs(&self) -> Option<&Wcs> {
        self.cutout.as_ref().map(|c| &c.wcs)
    }

    pub fn angular_separations(&self) -> &[Degree] {
        &self.angular_separations
    }

    pub fn flag_radius(&self) -> Option<ArcMin> {
        self.flag_radius
    }

    pub fn flagged_sources(&self) -> &[SkyCoord] {
        &self.flagged_sources
    }

    /// Date of the patch as shown in reports.
    pub fn date_label(&self) -> String {
        format_utc(self.timestamp)
    }

    /// Deduplicate the raw answer and compute source coordinates and separations.
    ///
    /// Return
    /// ----------
    /// * `None` for a patch without sources.
    /// * [`SkyPatchError::CatalogQuery`] when a required column is missing or malformed.
    pub fn derive_sources(
        &self,
        catalog: &CatalogSpec,
    ) -> Result<Option<DerivedSources>, SkyPatchError> {
        if self.has_no_sources {
            return Ok(None);
        }
        let filtered = deduplicate(&self.raw_catalog_result, catalog)?;
        let coords = extract_coords(&filtered, catalog)?;
        let separations = separations_from(&self.center, &coords);
        Ok(Some(DerivedSources {
            filtered,
            coords,
            separations,
        }))
    }

    /// Store sources computed by [`SkyPatch::derive_sources`].
    pub fn apply_sources(&mut self, derived: Option<DerivedSources>) {
        match derived {
            Some(d) => {
                self.filtered_sources = Some(d.filtered);
                self.source_coords = d.coords;
                self.angular_separations = d.separations;
            }
            None => {
                self.filtered_sources = Some(self.raw_catalog_result.select(|_| false));
                self.source_coords.clear();
                self.angular_separations.clear();
            }
        }
        self.source_error = None;
    }

    /// Record that the sources of this patch could not be derived.
    pub fn mark_source_error(&mut self, reason: impl Into<String>) {
        self.filtered_sources = None;
        self.source_coords.clear();
        self.angular_separations.clear();
        self.source_error = Some(reason.into());
    }

    /// Background cutout request: centered on the target, at the background field of view.
    pub fn cutout_request(&self, config: &PlannerConfig) -> CutoutRequest {
        CutoutRequest {
            center: self.center,
            fov: arcmin_to_deg(config.background_fov),
            width: config.cutout_width,
            height: config.cutout_height,
            survey_id: self.image_survey_id.clone(),
            rotation: config.cutout_rotation,
        }
    }

    pub fn attach_cutout(&mut self, cutout: Cutout) {
        self.cutout = Some(cutout);
    }

    /// Store the outcome of a proximity pass, replacing the previous one.
    pub fn record_proximity(&mut self, radius: ArcMin, flagged: Vec<SkyCoord>) {
        self.flag_radius = Some(radius);
        self.flagged_sources = flagged;
    }
}

impl std::fmt::Display for SkyPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sky {} at {}", self.index, self.date_label())
    }
}

/// Keep the rows detected in the same field as the first row.
///
/// Catalogs that repeat a source once per epoch carry a field identifier; only the first
/// epoch is kept. Catalogs without such a column keep every row.
pub fn deduplicate(raw: &CatalogTable, catalog: &CatalogSpec) -> Result<CatalogTable, SkyPatchError> {
    let (Some(column), Some(first)) = (&catalog.field_id_column, raw.rows().first()) else {
        return Ok(raw.clone());
    };
    let first_id = raw.cell(first, column)?.to_string();
    Ok(raw.select(|row| raw.cell(row, column).is_ok_and(|id| id == first_id)))
}

/// RA/DEC of every source, in catalog order.
pub fn extract_coords(
    sources: &CatalogTable,
    catalog: &CatalogSpec,
) -> Result<Vec<SkyCoord>, SkyPatchError> {
    sources
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let ra = sources.value(row, &catalog.ra_column)?;
            let dec = sources.value(row, &catalog.dec_column)?;
            match (ra, dec) {
                (Some(ra), Some(dec)) => SkyCoord::new(ra, dec).map_err(|e| {
                    SkyPatchError::CatalogQuery {
                        identifier: catalog.service_id.clone(),
                        reason: format!("row {i}: {e}"),
                    }
                }),
                _ => Err(SkyPatchError::CatalogQuery {
                    identifier: catalog.service_id.clone(),
                    reason: format!("row {i} has no coordinates"),
                }),
            }
        })
        .collect()
}

/// Great-circle separation of every coordinate from `center`, in degrees.
pub fn separations_from(center: &SkyCoord, coords: &[SkyCoord]) -> Vec<Degree> {
    coords.iter().map(|c| center.separation(c)).collect()
}
