#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use hifitime::Epoch;
use ndarray::Array2;
use skypatch::catalog::{CatalogRow, CatalogTable};
use skypatch::config::{CatalogSpec, PlannerConfig};
use skypatch::constants::{arcmin_to_deg, ArcMin};
use skypatch::coordinates::SkyCoord;
use skypatch::ephemeris::{EphemerisRequest, EphemerisRow};
use skypatch::fits::FitsImage;
use skypatch::pipeline::Services;
use skypatch::services::hips::decode_cutout;
use skypatch::services::{
    CatalogService, ConeSearch, Cutout, CutoutRequest, CutoutService, EphemerisService,
};
use skypatch::skypatch_errors::{SkyPatchError, Stage};
use skypatch::time::parse_utc_datetime;
use skypatch::wcs::Wcs;

pub fn at(date: &str) -> Epoch {
    parse_utc_datetime("date", date).unwrap()
}

pub fn row(date: &str, ra: f64, dec: f64) -> EphemerisRow {
    EphemerisRow::new(at(date), ra, dec).unwrap()
}

/// Small cutouts keep the mosaic cheap; 2MASS has no repeated epochs.
pub fn test_config(fov: ArcMin) -> PlannerConfig {
    PlannerConfig::builder()
        .catalog(CatalogSpec::twomass())
        .instrument_fov(fov)
        .cutout_size(48, 40)
        .max_workers(3)
        .build()
        .unwrap()
}

pub enum EphemerisBehaviour {
    Rows(Vec<EphemerisRow>),
    NotFound,
    Timeout,
}

pub struct FakeEphemeris {
    behaviour: EphemerisBehaviour,
    pub requests: Mutex<Vec<EphemerisRequest>>,
}

impl FakeEphemeris {
    pub fn new(behaviour: EphemerisBehaviour) -> Self {
        FakeEphemeris {
            behaviour,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rows(rows: Vec<EphemerisRow>) -> Self {
        FakeEphemeris::new(EphemerisBehaviour::Rows(rows))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl EphemerisService for FakeEphemeris {
    fn ephemeris(&self, request: &EphemerisRequest) -> Result<Vec<EphemerisRow>, SkyPatchError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.behaviour {
            EphemerisBehaviour::Rows(rows) => Ok(rows.clone()),
            EphemerisBehaviour::NotFound => {
                Err(SkyPatchError::TargetNotFound(request.identifier.clone()))
            }
            EphemerisBehaviour::Timeout => Err(SkyPatchError::ServiceTimeout {
                stage: Stage::Ephemeris,
                identifier: request.identifier.clone(),
            }),
        }
    }
}

/// 2MASS-like catalog holding a fixed list of `(coord, Jmag)` sources.
///
/// Answers a cone search with the sources inside the requested box, in list order.
pub struct FakeCatalog {
    sources: Vec<(SkyCoord, String)>,
    fail_after: Option<usize>,
    calls: AtomicUsize,
    pub queries: Mutex<Vec<(SkyCoord, ArcMin, ArcMin)>>,
}

impl FakeCatalog {
    pub fn new(sources: Vec<(SkyCoord, &str)>) -> Self {
        FakeCatalog {
            sources: sources
                .into_iter()
                .map(|(c, m)| (c, m.to_string()))
                .collect(),
            fail_after: None,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        FakeCatalog::new(Vec::new())
    }

    /// Fail every query after the first `n` ones.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn query_widths(&self) -> Vec<(ArcMin, ArcMin)> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, w, h)| (*w, *h))
            .collect()
    }
}

impl CatalogService for FakeCatalog {
    fn cone_search(&self, query: &ConeSearch<'_>) -> Result<CatalogTable, SkyPatchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .unwrap()
            .push((query.center, query.width, query.height));
        if self.fail_after.is_some_and(|n| call >= n) {
            return Err(SkyPatchError::CatalogQuery {
                identifier: query.catalog.service_id.clone(),
                reason: "service unreachable".into(),
            });
        }

        let half_w = arcmin_to_deg(query.width) / 2.0;
        let half_h = arcmin_to_deg(query.height) / 2.0;
        let rows: Vec<CatalogRow> = self
            .sources
            .iter()
            .filter(|(c, _)| {
                let mut dra = (c.ra - query.center.ra).abs();
                dra = dra.min(360.0 - dra);
                dra * query.center.dec.to_radians().cos() <= half_w
                    && (c.dec - query.center.dec).abs() <= half_h
            })
            .map(|(c, mag)| CatalogRow {
                cells: vec![c.ra.to_string(), c.dec.to_string(), mag.clone()],
            })
            .collect();

        if rows.is_empty() {
            return Ok(CatalogTable::empty());
        }
        let spec = query.catalog;
        CatalogTable::new(
            vec![
                spec.ra_column.clone(),
                spec.dec_column.clone(),
                spec.flag_mag_column.clone(),
            ],
            rows,
        )
    }
}

/// Synthetic sky brightness, smooth so bilinear resampling stays close to it.
pub fn sky_value(coord: &SkyCoord) -> f64 {
    100.0 + 40.0 * (coord.ra * 7.0).to_radians().sin() + 25.0 * (coord.dec * 11.0).to_radians().cos()
}

/// Cutout service rendering [`sky_value`] on the requested TAN grid.
///
/// Every answer goes through a FITS encoding and the same decoder as the HTTP client.
pub struct FakeCutouts {
    fail_after: Option<usize>,
    calls: AtomicUsize,
    pub requests: Mutex<Vec<CutoutRequest>>,
}

impl FakeCutouts {
    pub fn new() -> Self {
        FakeCutouts {
            fail_after: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

impl Default for FakeCutouts {
    fn default() -> Self {
        Self::new()
    }
}

pub fn render_cutout(request: &CutoutRequest) -> Cutout {
    let scale = request.fov / request.width as f64;
    let wcs = Wcs::centered(
        request.center,
        scale,
        request.width,
        request.height,
        request.rotation.unwrap_or(0.0),
    )
    .unwrap();
    let data = Array2::from_shape_fn((request.height, request.width), |(y, x)| {
        sky_value(&wcs.pixel_to_world(x as f64, y as f64))
    });
    let image = FitsImage {
        header: wcs.to_header(),
        data,
    };
    decode_cutout(&request.survey_id, &image.to_bytes().unwrap()).unwrap()
}

impl CutoutService for FakeCutouts {
    fn cutout(&self, request: &CutoutRequest) -> Result<Cutout, SkyPatchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_after.is_some_and(|n| call >= n) {
            return Err(SkyPatchError::ImageFetch {
                identifier: request.survey_id.clone(),
                reason: "HTTP 503".into(),
            });
        }
        Ok(render_cutout(request))
    }
}

pub fn services<'a>(
    ephemeris: &'a FakeEphemeris,
    catalog: &'a FakeCatalog,
    cutouts: &'a FakeCutouts,
) -> Services<'a> {
    Services {
        ephemeris,
        catalog,
        cutouts,
    }
}

/// Position `arcmin` north of `coord`.
pub fn north_of(coord: SkyCoord, arcmin: ArcMin) -> SkyCoord {
    SkyCoord::new(coord.ra, coord.dec + arcmin_to_deg(arcmin)).unwrap()
}
