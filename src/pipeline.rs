//! # Observation planning pipeline
//!
//! [`run_query`] is the single synchronous entry point of the planner. It chains every stage
//! and returns either the complete [`PipelineOutput`] or the first error met; nothing partial
//! is ever returned.
//!
//! ## Stages
//!
//! | Stage | Work | Progress |
//! |---|---|---|
//! | Ephemeris | resolve the target into [`EphemerisRow`]s inside the window | 10% |
//! | Catalog | one cone search per row ([`initialize_patches`]) | 25% |
//! | Processing | sources and background cutout per patch ([`process_patches`]) | 35% |
//! | Flagging | brightness, proximity and best-seen ([`evaluate_patches`]) | 45% |
//! | Mosaic | common projection and co-addition ([`compose_mosaic`]) | 50% |
//!
//! Flagging and the mosaic both read the full processed collection and run side by side
//! through `rayon::join`; the proximity outcomes are written back on the patches once both
//! are done.
//!
//! ## Example
//!
//! ```rust, no_run
//! use skypatch::config::PlannerConfig;
//! use skypatch::env_state::PlannerEnv;
//! use skypatch::pipeline::{run_query, HttpServices, QueryRequest};
//! use skypatch::progress::LogProgress;
//!
//! let request = QueryRequest::from_fields(
//!     "Ceres", "", "",
//!     "2024-01-01 00:00:00", "2024-01-01 01:00:00",
//!     "20", "m", "",
//! )?;
//! let config = PlannerConfig::builder().instrument("FORS2_std")?.build()?;
//! let http = HttpServices::new(PlannerEnv::new());
//!
//! let output = run_query(&request, &config, &http.services(), &LogProgress)?;
//! println!("{}", output.flags.table());
//! println!("{}", output.best_seen);
//! # Ok::<(), skypatch::skypatch_errors::SkyPatchError>(())
//! ```
//!
//! See also
//! ------------
//! * [`crate::progress`] – observers for the stage milestones.
//! * [`crate::services`] – the three service traits and their HTTP clients.
use hifitime::Epoch;

use crate::config::PlannerConfig;
use crate::constants::arcmin_to_deg;
use crate::coordinates::SkyCoord;
use crate::env_state::PlannerEnv;
use crate::ephemeris::{
    fixed_position_rows, resolve_ephemeris, restrict_to_window, EphemerisRequest, EphemerisRow,
};
use crate::flagging::{evaluate_patches, record_summary, FlagSummary};
use crate::mosaic::{compose_mosaic, MosaicResult};
use crate::patches::{initialize_patches, process_patches};
use crate::progress::{PipelineStage, ProgressObserver};
use crate::services::hips::HipsClient;
use crate::services::horizons::HorizonsClient;
use crate::services::vizier::VizierClient;
use crate::services::{
    CatalogService, Cutout, CutoutRequest, CutoutService, EphemerisService,
};
use crate::sky_patch::SkyPatch;
use crate::skypatch_errors::SkyPatchError;
use crate::time::{format_utc, parse_count, Step, TimeWindow};

/// What to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTarget {
    /// Resolved through the ephemeris service.
    Identifier(String),
    /// A fixed position, repeated at every step of the window.
    Coordinates(SkyCoord),
    /// Rows already known, e.g. read from an `.eph` file.
    Ephemeris(Vec<EphemerisRow>),
}

impl QueryTarget {
    /// Interpret the raw target fields of a request form.
    ///
    /// Non-empty `ra` and `dec` take precedence over the identifier and are parsed as
    /// sexagesimal `hh:mm:ss` / `±dd:mm:ss`. Giving only one of them is an error.
    pub fn from_fields(identifier: &str, ra: &str, dec: &str) -> Result<Self, SkyPatchError> {
        let (ra, dec) = (ra.trim(), dec.trim());
        match (ra.is_empty(), dec.is_empty()) {
            (false, false) => Ok(QueryTarget::Coordinates(SkyCoord::from_sexagesimal(
                ra, dec,
            )?)),
            (true, false) => Err(SkyPatchError::invalid_input(
                "ra",
                "right ascension is missing",
            )),
            (false, true) => Err(SkyPatchError::invalid_input("dec", "declination is missing")),
            (true, true) => {
                let identifier = identifier.trim();
                if identifier.is_empty() {
                    return Err(SkyPatchError::invalid_input(
                        "identifier",
                        "give a target identifier or its coordinates",
                    ));
                }
                Ok(QueryTarget::Identifier(identifier.to_string()))
            }
        }
    }

    fn label(&self) -> String {
        match self {
            QueryTarget::Identifier(id) => id.clone(),
            QueryTarget::Coordinates(coord) => coord.to_string(),
            QueryTarget::Ephemeris(rows) => format!("{} ephemeris rows", rows.len()),
        }
    }
}

/// A validated observing request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub target: QueryTarget,
    pub window: TimeWindow,
    pub step: Step,
    /// Number of rows asked from the ephemeris service; derived from the window when `None`.
    pub count: Option<usize>,
}

impl QueryRequest {
    pub fn new(target: QueryTarget, window: TimeWindow, step: Step) -> Self {
        QueryRequest {
            target,
            window,
            step,
            count: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Validate the raw fields of a request form.
    ///
    /// Every field is checked here, before any service is contacted. An empty `count`
    /// lets the window decide.
    ///
    /// Return
    /// ----------
    /// * [`SkyPatchError::InvalidInput`] naming the first malformed field, or
    ///   [`SkyPatchError::InvalidWindow`] when start is not before end.
    #[allow(clippy::too_many_arguments)]
    pub fn from_fields(
        identifier: &str,
        ra: &str,
        dec: &str,
        start: &str,
        end: &str,
        step_value: &str,
        step_unit: &str,
        count: &str,
    ) -> Result<Self, SkyPatchError> {
        let target = QueryTarget::from_fields(identifier, ra, dec)?;
        let window = TimeWindow::parse(start, end)?;
        let step = Step::parse(step_value, step_unit)?;
        let count = match count.trim() {
            "" => None,
            raw => Some(parse_count(raw)?),
        };
        Ok(QueryRequest {
            target,
            window,
            step,
            count,
        })
    }
}

/// The three services a run talks to.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub ephemeris: &'a dyn EphemerisService,
    pub catalog: &'a dyn CatalogService,
    pub cutouts: &'a dyn CutoutService,
}

/// HTTP clients for Horizons, VizieR and hips2fits sharing one agent.
#[derive(Debug, Clone)]
pub struct HttpServices {
    pub horizons: HorizonsClient,
    pub vizier: VizierClient,
    pub hips: HipsClient,
}

impl HttpServices {
    pub fn new(env: PlannerEnv) -> Self {
        HttpServices {
            horizons: HorizonsClient::new(env.clone()),
            vizier: VizierClient::new(env.clone()),
            hips: HipsClient::new(env),
        }
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            ephemeris: &self.horizons,
            catalog: &self.vizier,
            cutouts: &self.hips,
        }
    }
}

/// The patches of one run, in ephemeris order.
#[derive(Debug, Clone)]
pub struct PatchCollection {
    patches: Vec<SkyPatch>,
}

impl PatchCollection {
    pub fn new(patches: Vec<SkyPatch>) -> Self {
        PatchCollection { patches }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SkyPatch> {
        self.patches.iter()
    }

    pub fn as_slice(&self) -> &[SkyPatch] {
        &self.patches
    }

    pub fn get(&self, index: usize) -> Option<&SkyPatch> {
        self.patches.get(index)
    }

    /// The patch observed at `timestamp`, if any.
    ///
    /// This is the lookup behind the "view field of view" action: the returned patch gives
    /// the center and the instrument field of view for that date.
    pub fn patch_at(&self, timestamp: Epoch) -> Option<&SkyPatch> {
        self.patches.iter().find(|p| p.timestamp() == timestamp)
    }

    pub fn into_inner(self) -> Vec<SkyPatch> {
        self.patches
    }
}

impl<'a> IntoIterator for &'a PatchCollection {
    type Item = &'a SkyPatch;
    type IntoIter = std::slice::Iter<'a, SkyPatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.patches.iter()
    }
}

/// Everything a successful run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub patches: PatchCollection,
    pub mosaic: MosaicResult,
    pub flags: FlagSummary,
    /// Best-seen message, ready for display
    pub best_seen: String,
}

/// Turn the target of `request` into the ephemeris rows of its window.
pub fn resolve_rows(
    request: &QueryRequest,
    ephemeris: &dyn EphemerisService,
) -> Result<Vec<EphemerisRow>, SkyPatchError> {
    let rows = match &request.target {
        QueryTarget::Identifier(identifier) => {
            let query = match request.count {
                Some(count) => EphemerisRequest::new(
                    identifier,
                    request.window.start(),
                    request.step,
                    count,
                )?,
                None => EphemerisRequest::covering(identifier, &request.window, request.step)?,
            };
            return resolve_ephemeris(ephemeris, &query, &request.window);
        }
        QueryTarget::Coordinates(coord) => {
            fixed_position_rows(*coord, &request.window, &request.step)?
        }
        QueryTarget::Ephemeris(rows) => restrict_to_window(rows.clone(), &request.window),
    };

    if rows.is_empty() {
        return Err(SkyPatchError::EmptyResult(format!(
            "no position of {} between {} and {}",
            request.target.label(),
            format_utc(request.window.start()),
            format_utc(request.window.end())
        )));
    }
    Ok(rows)
}

/// Run the whole pipeline for one request.
///
/// Arguments
/// -----------------
/// * `request`: target, window, step.
/// * `config`: catalog, survey, fields of view, flag thresholds and pool bound.
/// * `services`: the ephemeris, catalog and cutout services.
/// * `progress`: receives the stage milestones and per-patch notifications.
///
/// Return
/// ----------
/// * The processed patches, the mosaic, the flag reports and the best-seen message.
/// * The first error of any stage; the run stops there.
pub fn run_query(
    request: &QueryRequest,
    config: &PlannerConfig,
    services: &Services<'_>,
    progress: &dyn ProgressObserver,
) -> Result<PipelineOutput, SkyPatchError> {
    let milestone = |stage: PipelineStage| progress.milestone(stage, stage.percent());

    milestone(PipelineStage::Ephemeris);
    let rows = resolve_rows(request, services.ephemeris)?;
    log::info!(
        "{} positions of {} to survey",
        rows.len(),
        request.target.label()
    );

    milestone(PipelineStage::Catalog);
    let patches = initialize_patches(&rows, config, services.catalog, progress)?;

    milestone(PipelineStage::Processing);
    let mut patches = process_patches(patches, config, services.cutouts, progress)?;

    milestone(PipelineStage::Flagging);
    let (flags, mosaic) = rayon::join(
        || evaluate_patches(&patches, config),
        || {
            milestone(PipelineStage::Mosaic);
            compose_mosaic(&patches)
        },
    );
    let flags = flags?;
    let mosaic = mosaic?;
    record_summary(&mut patches, &flags);

    milestone(PipelineStage::Done);
    let best_seen = flags.best_seen.to_string();
    Ok(PipelineOutput {
        patches: PatchCollection::new(patches),
        mosaic,
        flags,
        best_seen,
    })
}

/// One cutout of `coord` at the instrument field of view, without any catalog query.
pub fn single_image(
    coord: SkyCoord,
    config: &PlannerConfig,
    cutouts: &dyn CutoutService,
) -> Result<Cutout, SkyPatchError> {
    let request = CutoutRequest {
        center: coord,
        fov: arcmin_to_deg(config.instrument_fov),
        width: config.cutout_width,
        height: config.cutout_height,
        survey_id: config.survey_id.clone(),
        rotation: config.cutout_rotation,
    };
    log::info!(
        "single {}' image of {coord} from {}",
        config.instrument_fov,
        config.survey_id
    );
    cutouts.cutout(&request)
}

#[cfg(test)]
mod pipeline_test {
    use super::*;
    use crate::time::StepUnit;

    struct Unreachable;

    impl EphemerisService for Unreachable {
        fn ephemeris(&self, _: &EphemerisRequest) -> Result<Vec<EphemerisRow>, SkyPatchError> {
            panic!("the ephemeris service must not be called")
        }
    }

    #[test]
    fn test_target_from_fields() {
        assert_eq!(
            QueryTarget::from_fields(" Ceres ", "", "").unwrap(),
            QueryTarget::Identifier("Ceres".into())
        );

        let QueryTarget::Coordinates(coord) =
            QueryTarget::from_fields("ignored", "01:00:00", "-30:30:00").unwrap()
        else {
            panic!("expected coordinates");
        };
        assert_eq!(coord.ra, 15.0);
        assert_eq!(coord.dec, -30.5);

        assert_eq!(
            QueryTarget::from_fields("", "", ""),
            Err(SkyPatchError::invalid_input(
                "identifier",
                "give a target identifier or its coordinates"
            ))
        );
        assert!(matches!(
            QueryTarget::from_fields("", "01:00:00", ""),
            Err(SkyPatchError::InvalidInput { ref field, .. }) if field == "dec"
        ));
        assert!(matches!(
            QueryTarget::from_fields("", "25:00:00", "10:00:00"),
            Err(SkyPatchError::InvalidInput { ref field, .. }) if field == "ra"
        ));
    }

    #[test]
    fn test_request_from_fields() {
        let request = QueryRequest::from_fields(
            "Ceres",
            "",
            "",
            "2024-01-01 00:00:00",
            "2024-01-01 01:00:00",
            "20",
            "m",
            "",
        )
        .unwrap();
        assert_eq!(request.step, Step::new(20, StepUnit::Minutes).unwrap());
        assert_eq!(request.count, None);

        let err = QueryRequest::from_fields(
            "Ceres",
            "",
            "",
            "2024-01-01 00:00:00",
            "2024-01-01 01:00:00",
            "twenty",
            "m",
            "",
        )
        .unwrap_err();
        assert!(err.is_input_error());

        let err = QueryRequest::from_fields(
            "Ceres",
            "",
            "",
            "2024-01-01 02:00:00",
            "2024-01-01 01:00:00",
            "20",
            "m",
            "",
        )
        .unwrap_err();
        assert!(matches!(err, SkyPatchError::InvalidWindow(_)));

        assert!(QueryRequest::from_fields(
            "Ceres",
            "",
            "",
            "2024-01-01 00:00:00",
            "2024-01-01 01:00:00",
            "20",
            "m",
            "0",
        )
        .is_err());
    }

    #[test]
    fn test_fixed_target_rows_without_service() {
        let window = TimeWindow::parse("2024-01-01 00:00:00", "2024-01-01 01:00:00").unwrap();
        let step = Step::new(20, StepUnit::Minutes).unwrap();
        let coord = SkyCoord::new(150.0, 2.0).unwrap();
        let request = QueryRequest::new(QueryTarget::Coordinates(coord), window, step);

        let rows = resolve_rows(&request, &Unreachable).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.coord() == coord));
        assert_eq!(rows[3].timestamp, window.end());
    }

    #[test]
    fn test_file_rows_are_windowed() {
        let window = TimeWindow::parse("2024-01-01 00:00:00", "2024-01-01 01:00:00").unwrap();
        let step = Step::new(1, StepUnit::Hours).unwrap();
        let at = |s: &str| crate::time::parse_utc_datetime("t", s).unwrap();
        let rows = vec![
            EphemerisRow::new(at("2024-01-01 00:30:00"), 10.0, 0.0).unwrap(),
            EphemerisRow::new(at("2023-12-31 23:00:00"), 11.0, 0.0).unwrap(),
            EphemerisRow::new(at("2024-01-01 00:10:00"), 12.0, 0.0).unwrap(),
        ];

        let request = QueryRequest::new(QueryTarget::Ephemeris(rows.clone()), window, step);
        let kept = resolve_rows(&request, &Unreachable).unwrap();
        assert_eq!(kept, vec![rows[2], rows[0]]);

        let outside = QueryRequest::new(QueryTarget::Ephemeris(vec![rows[1]]), window, step);
        assert!(matches!(
            resolve_rows(&outside, &Unreachable),
            Err(SkyPatchError::EmptyResult(_))
        ));
    }
}
