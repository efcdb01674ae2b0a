//! # Planner configuration
//!
//! An explicit [`PlannerConfig`] value is handed to every stage of the pipeline; nothing is
//! looked up from process-wide state. It carries:
//!
//! 1. **The catalog** to cone-search, as a [`CatalogSpec`]: its service identifier, its column
//!    filter, and the mapping from *roles* (repeated-epoch identifier, RA, DEC, flag magnitude) to
//!    the catalog's own column names, which differ from one catalog to another.
//! 2. **The image survey** backing the background cutouts (a HiPS identifier).
//! 3. **The instrument field of view**, the background field of view and the cutout geometry.
//! 4. **Flagging thresholds** and the size bound of the per-patch worker pool.
//!
//! ## Typical usage
//!
//! ```rust
//! use skypatch::config::{CatalogSpec, PlannerConfig};
//!
//! let config = PlannerConfig::builder()
//!     .catalog(CatalogSpec::by_name("2MASS").unwrap())
//!     .instrument("FORS2_std")
//!     .unwrap()
//!     .max_workers(8)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.instrument_fov, 7.1);
//! ```
use crate::constants::{
    ArcMin, BACKGROUND_FOV_ARCMIN, BEST_SEEN_THRESHOLD_ARCMIN, CUTOUT_PIXELS,
    DEFAULT_MAX_WORKERS, DEFAULT_PROXIMITY_RADIUS_ARCMIN,
};
use crate::skypatch_errors::SkyPatchError;

/// Column layout and query parameters of one cone-searchable catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSpec {
    /// Human-readable name, e.g. `"SDSS16"`
    pub name: String,
    /// Identifier understood by the catalog service, e.g. `"V/154"`
    pub service_id: String,
    /// Column identifying the epoch/field of a detection, for catalogs that repeat sources.
    pub field_id_column: Option<String>,
    pub ra_column: String,
    pub dec_column: String,
    /// Magnitude used by the brightness flag
    pub flag_mag_column: String,
    /// Column constraints sent with the query, e.g. `("gmag", "<21")`
    pub column_filters: Vec<(String, String)>,
}

impl CatalogSpec {
    /// SDSS photometric catalog, DR16.
    pub fn sdss16() -> Self {
        CatalogSpec {
            name: "SDSS16".into(),
            service_id: "V/154".into(),
            field_id_column: Some("fieldID".into()),
            ra_column: "RA_ICRS".into(),
            dec_column: "DE_ICRS".into(),
            flag_mag_column: "gmag".into(),
            column_filters: vec![("gmag".into(), "<21".into())],
        }
    }

    /// 2MASS all-sky point source catalog.
    pub fn twomass() -> Self {
        CatalogSpec {
            name: "2MASS".into(),
            service_id: "II/246/out".into(),
            field_id_column: None,
            ra_column: "RAJ2000".into(),
            dec_column: "DEJ2000".into(),
            flag_mag_column: "Jmag".into(),
            column_filters: vec![("Jmag".into(), "<17".into())],
        }
    }

    /// 2MASS 6x deep point source catalog.
    pub fn twomass_6x() -> Self {
        CatalogSpec {
            name: "2MASS 6X".into(),
            service_id: "II/281/2mass6x".into(),
            ..CatalogSpec::twomass()
        }
    }

    /// Every catalog known to the planner.
    pub fn known() -> Vec<CatalogSpec> {
        vec![
            CatalogSpec::sdss16(),
            CatalogSpec::twomass(),
            CatalogSpec::twomass_6x(),
        ]
    }

    /// Look a catalog up by its name (`"SDSS16"`) or its service identifier (`"V/154"`).
    pub fn by_name(name: &str) -> Result<Self, SkyPatchError> {
        CatalogSpec::known()
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(name) || c.service_id == name)
            .ok_or_else(|| SkyPatchError::invalid_input("catalog", format!("unknown catalog '{name}'")))
    }
}

/// Instrument fields of view, in arcminutes.
pub const INSTRUMENT_FOVS: [(&str, ArcMin); 4] = [
    ("FORS2_std", 7.1),
    ("FORS2_hres", 4.25),
    ("MUSE_wfm", 1.0),
    ("MUSE_nfm", 0.125),
];

/// Field of view of a named instrument.
pub fn instrument_fov(name: &str) -> Result<ArcMin, SkyPatchError> {
    INSTRUMENT_FOVS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, fov)| *fov)
        .ok_or_else(|| {
            SkyPatchError::invalid_input("instrument", format!("unknown instrument '{name}'"))
        })
}

/// HiPS surveys offered for the background cutouts.
pub const KNOWN_SURVEYS: [&str; 3] = ["DSS", "CDS/P/DSS2/color", "CDS/P/HLA/SDSSg"];

#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub catalog: CatalogSpec,
    /// HiPS identifier of the background image survey
    pub survey_id: String,
    pub instrument_fov: ArcMin,
    pub background_fov: ArcMin,
    pub cutout_width: usize,
    pub cutout_height: usize,
    /// Rotation requested from the cutout service, in degrees
    pub cutout_rotation: Option<f64>,
    pub proximity_radius: ArcMin,
    pub best_seen_threshold: ArcMin,
    pub max_workers: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            catalog: CatalogSpec::sdss16(),
            survey_id: "DSS".into(),
            instrument_fov: 7.1,
            background_fov: BACKGROUND_FOV_ARCMIN,
            cutout_width: CUTOUT_PIXELS,
            cutout_height: CUTOUT_PIXELS,
            cutout_rotation: None,
            proximity_radius: DEFAULT_PROXIMITY_RADIUS_ARCMIN,
            best_seen_threshold: BEST_SEEN_THRESHOLD_ARCMIN,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl PlannerConfig {
    pub fn builder() -> PlannerConfigBuilder {
        PlannerConfigBuilder::new()
    }

    /// Worker pool size for a batch of `n_patches` independent tasks.
    pub fn pool_size(&self, n_patches: usize) -> usize {
        self.max_workers.min(n_patches).max(1)
    }
}

pub struct PlannerConfigBuilder {
    config: PlannerConfig,
}

impl Default for PlannerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlannerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PlannerConfig::default(),
        }
    }

    pub fn catalog(mut self, v: CatalogSpec) -> Self {
        self.config.catalog = v;
        self
    }
    pub fn survey(mut self, v: impl Into<String>) -> Self {
        self.config.survey_id = v.into();
        self
    }
    pub fn instrument_fov(mut self, v: ArcMin) -> Self {
        self.config.instrument_fov = v;
        self
    }

    /// Take the field of view from the instrument table.
    pub fn instrument(mut self, name: &str) -> Result<Self, SkyPatchError> {
        self.config.instrument_fov = instrument_fov(name)?;
        Ok(self)
    }

    pub fn background_fov(mut self, v: ArcMin) -> Self {
        self.config.background_fov = v;
        self
    }
    pub fn cutout_size(mut self, width: usize, height: usize) -> Self {
        self.config.cutout_width = width;
        self.config.cutout_height = height;
        self
    }
    pub fn cutout_rotation(mut self, v: Option<f64>) -> Self {
        self.config.cutout_rotation = v;
        self
    }
    pub fn proximity_radius(mut self, v: ArcMin) -> Self {
        self.config.proximity_radius = v;
        self
    }
    pub fn best_seen_threshold(mut self, v: ArcMin) -> Self {
        self.config.best_seen_threshold = v;
        self
    }
    pub fn max_workers(mut self, v: usize) -> Self {
        self.config.max_workers = v;
        self
    }

    #[inline]
    fn gt0(x: f64) -> bool {
        x.is_finite() && x > 0.0
    }

    pub fn build(self) -> Result<PlannerConfig, SkyPatchError> {
        let c = &self.config;

        if !Self::gt0(c.instrument_fov) {
            return Err(SkyPatchError::invalid_input(
                "instrument_fov",
                "field of view must be > 0",
            ));
        }
        if !Self::gt0(c.background_fov) {
            return Err(SkyPatchError::InvalidConfig(
                "background_fov must be > 0".into(),
            ));
        }
        if !Self::gt0(c.proximity_radius) || !Self::gt0(c.best_seen_threshold) {
            return Err(SkyPatchError::InvalidConfig(
                "flagging thresholds must be > 0".into(),
            ));
        }
        if c.cutout_width == 0 || c.cutout_height == 0 {
            return Err(SkyPatchError::InvalidConfig(
                "cutout size must be at least one pixel".into(),
            ));
        }
        if c.max_workers == 0 {
            return Err(SkyPatchError::InvalidConfig(
                "max_workers must be >= 1".into(),
            ));
        }
        if c.survey_id.trim().is_empty() {
            return Err(SkyPatchError::invalid_input("survey", "survey id is empty"));
        }
        if c.catalog.service_id.trim().is_empty() {
            return Err(SkyPatchError::invalid_input("catalog", "catalog id is empty"));
        }

        Ok(self.config)
    }
}
