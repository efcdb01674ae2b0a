//! # Mosaic composition
//!
//! Merges the background cutouts of every patch, each on its own TAN grid, into one image.
//!
//! ## Algorithm
//!
//! 1. **Common projection** ([`optimal_celestial_wcs`]): the reference point is the direction
//!    of the summed unit vectors of all input border samples; the resolution is the finest
//!    input pixel scale; the grid is north-up, east-left. Every input border is projected onto
//!    that plane and the bounding box of the projections gives the output shape and the shift
//!    of the reference pixel.
//! 2. **Reprojection** ([`reproject_interp`]): every output pixel center is mapped back into
//!    the input grid and the input is sampled with bilinear interpolation. The footprint is 1
//!    where the sample falls on the input image and is finite, 0 elsewhere.
//! 3. **Co-addition** ([`coadd`]): `Σ vᵢ·fᵢ / Σ fᵢ` per pixel, with the summed footprint as
//!    coverage. Pixels covered by no input are `NaN` with a footprint of 0.
//!
//! Inputs are put in a canonical order before any arithmetic, so the output does not depend on
//! the order of the patches.
//!
//! See also
//! ------------
//! * [`crate::wcs::Wcs`] – the TAN mapping used by inputs and output.
use ndarray::Array2;
use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;
use std::cmp::Ordering;

use crate::constants::Degree;
use crate::coordinates::SkyCoord;
use crate::services::Cutout;
use crate::sky_patch::SkyPatch;
use crate::skypatch_errors::SkyPatchError;
use crate::wcs::Wcs;

/// Border samples per image edge used to bound the common projection.
const BORDER_SAMPLES: usize = 32;

/// Tolerance on the projected extent before rounding up to whole pixels.
const EXTENT_TOLERANCE: f64 = 1e-6;

/// Output of the mosaic composer.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicResult {
    pub wcs: Wcs,
    /// Co-added values, shape `(height, width)`
    pub array: Array2<f64>,
    /// Number of inputs covering each pixel
    pub footprint: Array2<f64>,
}

impl MosaicResult {
    pub fn shape(&self) -> (usize, usize) {
        self.array.dim()
    }

    /// Fraction of output pixels covered by at least one input.
    pub fn coverage(&self) -> f64 {
        let covered = self.footprint.iter().filter(|f| **f > 0.0).count();
        covered as f64 / self.footprint.len().max(1) as f64
    }
}

fn cmp_f64s(a: impl IntoIterator<Item = f64>, b: impl IntoIterator<Item = f64>) -> Ordering {
    a.into_iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(&y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Total order on cutouts: WCS parameters first, then pixel values.
fn canonical_cmp(a: &Cutout, b: &Cutout) -> Ordering {
    let key = |c: &Cutout| {
        let w = &c.wcs;
        [
            w.crval.ra,
            w.crval.dec,
            w.crpix.x,
            w.crpix.y,
            w.cd[(0, 0)],
            w.cd[(0, 1)],
            w.cd[(1, 0)],
            w.cd[(1, 1)],
            w.width as f64,
            w.height as f64,
        ]
    };
    cmp_f64s(key(a), key(b)).then_with(|| cmp_f64s(a.image.iter().copied(), b.image.iter().copied()))
}

/// Smallest north-up TAN grid containing every input image.
///
/// Return
/// ----------
/// * The output [`Wcs`], whose `width`/`height` give the output shape.
/// * [`SkyPatchError::InsufficientData`] without inputs, [`SkyPatchError::WcsError`] when the
///   inputs do not fit on one tangent plane.
pub fn optimal_celestial_wcs(inputs: &[&Wcs]) -> Result<Wcs, SkyPatchError> {
    if inputs.is_empty() {
        return Err(SkyPatchError::InsufficientData(
            "no image to build a projection from".into(),
        ));
    }

    let borders: Vec<Vec<SkyCoord>> = inputs.iter().map(|w| w.border(BORDER_SAMPLES)).collect();

    let sum: Vector3<f64> = borders
        .iter()
        .flatten()
        .map(SkyCoord::unit_vector)
        .fold(Vector3::zeros(), |acc, v| acc + v);
    let reference = SkyCoord::from_vector(&sum).ok_or_else(|| {
        SkyPatchError::WcsError("inputs are spread evenly over the whole sky".into())
    })?;

    let scale: Degree = inputs
        .iter()
        .map(|w| w.pixel_scale())
        .fold(f64::INFINITY, f64::min);

    let plane = Wcs::centered(reference, scale, 1, 1, 0.0)?;
    let (mut xmin, mut xmax, mut ymin, mut ymax) = (
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::INFINITY,
        f64::NEG_INFINITY,
    );
    for coord in borders.iter().flatten() {
        let (x, y) = plane.world_to_pixel(coord).ok_or_else(|| {
            SkyPatchError::WcsError(format!(
                "{coord} does not project on the plane tangent at {reference}"
            ))
        })?;
        xmin = xmin.min(x);
        xmax = xmax.max(x);
        ymin = ymin.min(y);
        ymax = ymax.max(y);
    }

    let width = ((xmax - xmin - EXTENT_TOLERANCE).ceil() as usize).max(1);
    let height = ((ymax - ymin - EXTENT_TOLERANCE).ceil() as usize).max(1);
    // left and bottom edges of the box land on the outer edge of pixel 0
    let crpix = plane.crpix - Vector2::new(xmin + 0.5, ymin + 0.5);

    Wcs::new(reference, crpix, plane.cd, width, height)
}

/// Bilinear sample of `image` at the 0-based position `(x, y)`, or `None` off the image.
fn sample_bilinear(image: &Array2<f64>, x: f64, y: f64) -> Option<f64> {
    let (ny, nx) = image.dim();
    if nx == 0 || ny == 0 {
        return None;
    }
    if x < -0.5 || y < -0.5 || x >= nx as f64 - 0.5 || y >= ny as f64 - 0.5 {
        return None;
    }
    let xc = x.clamp(0.0, (nx - 1) as f64);
    let yc = y.clamp(0.0, (ny - 1) as f64);
    let (x0, y0) = (xc.floor() as usize, yc.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(nx - 1), (y0 + 1).min(ny - 1));
    let (fx, fy) = (xc - x0 as f64, yc - y0 as f64);

    let top = image[(y0, x0)] * (1.0 - fx) + image[(y0, x1)] * fx;
    let bottom = image[(y1, x0)] * (1.0 - fx) + image[(y1, x1)] * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Resample `image` (on `wcs_in`) onto the grid of `wcs_out`.
///
/// Return
/// ----------
/// * `(values, footprint)`, both of shape `(wcs_out.height, wcs_out.width)`. Values are `NaN`
///   where the footprint is 0.
pub fn reproject_interp(
    image: &Array2<f64>,
    wcs_in: &Wcs,
    wcs_out: &Wcs,
) -> (Array2<f64>, Array2<f64>) {
    let (ny, nx) = (wcs_out.height, wcs_out.width);

    let rows: Vec<Vec<(f64, f64)>> = (0..ny)
        .into_par_iter()
        .map(|y| {
            (0..nx)
                .map(|x| {
                    let coord = wcs_out.pixel_to_world(x as f64, y as f64);
                    wcs_in
                        .world_to_pixel(&coord)
                        .and_then(|(xi, yi)| sample_bilinear(image, xi, yi))
                        .filter(|v| v.is_finite())
                        .map_or((f64::NAN, 0.0), |v| (v, 1.0))
                })
                .collect()
        })
        .collect();

    let mut values = Array2::from_elem((ny, nx), f64::NAN);
    let mut footprint = Array2::zeros((ny, nx));
    for (y, row) in rows.into_iter().enumerate() {
        for (x, (v, f)) in row.into_iter().enumerate() {
            values[(y, x)] = v;
            footprint[(y, x)] = f;
        }
    }
    (values, footprint)
}

/// Reproject every cutout onto `wcs_out` and combine them.
pub fn coadd(cutouts: &[&Cutout], wcs_out: &Wcs) -> MosaicResult {
    let shape = (wcs_out.height, wcs_out.width);
    let mut weighted = Array2::<f64>::zeros(shape);
    let mut footprint = Array2::<f64>::zeros(shape);

    for cutout in cutouts {
        let (values, fp) = reproject_interp(&cutout.image, &cutout.wcs, wcs_out);
        ndarray::Zip::from(&mut weighted)
            .and(&mut footprint)
            .and(&values)
            .and(&fp)
            .for_each(|w, f, &v, &fi| {
                if fi > 0.0 {
                    *w += v * fi;
                    *f += fi;
                }
            });
    }

    let array = ndarray::Zip::from(&weighted)
        .and(&footprint)
        .map_collect(|&w, &f| if f > 0.0 { w / f } else { f64::NAN });

    MosaicResult {
        wcs: wcs_out.clone(),
        array,
        footprint,
    }
}

/// Compose the mosaic of a set of cutouts, in any order.
pub fn compose(cutouts: &[&Cutout]) -> Result<MosaicResult, SkyPatchError> {
    let mut ordered: Vec<&Cutout> = cutouts.to_vec();
    ordered.sort_by(|a, b| canonical_cmp(a, b));

    let wcs_list: Vec<&Wcs> = ordered.iter().map(|c| &c.wcs).collect();
    let wcs_out = optimal_celestial_wcs(&wcs_list)?;
    log::info!(
        "mosaic of {} cutouts on a {}x{} grid centred on {}",
        ordered.len(),
        wcs_out.width,
        wcs_out.height,
        wcs_out.crval
    );
    Ok(coadd(&ordered, &wcs_out))
}

/// Compose the mosaic of every patch cutout.
///
/// Fails with [`SkyPatchError::InsufficientData`] when no patch carries an image.
pub fn compose_mosaic(patches: &[SkyPatch]) -> Result<MosaicResult, SkyPatchError> {
    let cutouts: Vec<&Cutout> = patches.iter().filter_map(SkyPatch::cutout).collect();
    if cutouts.is_empty() {
        return Err(SkyPatchError::InsufficientData(
            "no patch has a background image".into(),
        ));
    }
    if cutouts.len() < patches.len() {
        log::warn!(
            "{} of {} patches have no image and are left out of the mosaic",
            patches.len() - cutouts.len(),
            patches.len()
        );
    }
    compose(&cutouts)
}
