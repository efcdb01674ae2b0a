//! # Gnomonic world-coordinate mapping
//!
//! The cutouts returned by the image service, and the mosaic grid built from them, use the
//! tangent-plane (`TAN`) projection. A [`Wcs`] maps 0-based pixel positions (`x` along
//! `NAXIS1`, `y` along `NAXIS2`, pixel centres on integers) to ICRS coordinates and back.
//!
//! The linear part follows the FITS conventions: 1-based `CRPIX`, and either a `CDi_j` matrix,
//! a `PCi_j` matrix scaled by `CDELTi`, or `CDELTi` with an optional `CROTA2`.
//!
//! ```text
//! pixel (x, y) ──CD·(p + 1 − CRPIX)──▶ standard coordinates (ξ, η) ──TAN⁻¹──▶ (ra, dec)
//! ```
use nalgebra::{Matrix2, Vector2};

use crate::constants::{Degree, RADEG};
use crate::coordinates::SkyCoord;
use crate::fits::{FitsHeader, FitsValue};
use crate::skypatch_errors::SkyPatchError;

#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference point on the sky (`CRVAL1`, `CRVAL2`)
    pub crval: SkyCoord,
    /// 1-based reference pixel (`CRPIX1`, `CRPIX2`)
    pub crpix: Vector2<f64>,
    /// Linear transform from pixel offsets to standard coordinates, degrees per pixel
    pub cd: Matrix2<f64>,
    cd_inv: Matrix2<f64>,
    /// Image size (`NAXIS1`, `NAXIS2`)
    pub width: usize,
    pub height: usize,
}

impl Wcs {
    /// Build a TAN projection from its reference point and linear transform.
    pub fn new(
        crval: SkyCoord,
        crpix: Vector2<f64>,
        cd: Matrix2<f64>,
        width: usize,
        height: usize,
    ) -> Result<Self, SkyPatchError> {
        let cd_inv = cd
            .try_inverse()
            .filter(|m| m.iter().all(|v| v.is_finite()))
            .ok_or_else(|| SkyPatchError::WcsError("singular CD matrix".into()))?;
        Ok(Wcs {
            crval,
            crpix,
            cd,
            cd_inv,
            width,
            height,
        })
    }

    /// North-up, east-left TAN grid centred on `center`, rotated by `rotation` degrees.
    pub fn centered(
        center: SkyCoord,
        scale: Degree,
        width: usize,
        height: usize,
        rotation: Degree,
    ) -> Result<Self, SkyPatchError> {
        let (s, c) = (rotation * RADEG).sin_cos();
        // same orientation as CDELT1 = -scale, CDELT2 = scale, CROTA2 = rotation
        let cd = Matrix2::new(-scale * c, -scale * s, -scale * s, scale * c);
        let crpix = Vector2::new((width as f64 + 1.0) / 2.0, (height as f64 + 1.0) / 2.0);
        Wcs::new(center, crpix, cd, width, height)
    }

    /// Read the celestial TAN mapping of an image header.
    pub fn from_header(header: &FitsHeader) -> Result<Self, SkyPatchError> {
        let ctype1 = header.get_str("CTYPE1").unwrap_or("");
        let ctype2 = header.get_str("CTYPE2").unwrap_or("");
        if !(ctype1.starts_with("RA--") && ctype1.ends_with("TAN"))
            || !(ctype2.starts_with("DEC-") && ctype2.ends_with("TAN"))
        {
            return Err(SkyPatchError::WcsError(format!(
                "unsupported projection '{ctype1}' / '{ctype2}', expected RA---TAN / DEC--TAN"
            )));
        }

        let require = |key: &str| {
            header
                .get_f64(key)
                .ok_or_else(|| SkyPatchError::WcsError(format!("missing keyword {key}")))
        };

        let crval = SkyCoord::new(require("CRVAL1")?, require("CRVAL2")?)?;
        let crpix = Vector2::new(require("CRPIX1")?, require("CRPIX2")?);

        let cd = if header.get("CD1_1").is_some() {
            Matrix2::new(
                require("CD1_1")?,
                header.get_f64("CD1_2").unwrap_or(0.0),
                header.get_f64("CD2_1").unwrap_or(0.0),
                require("CD2_2")?,
            )
        } else {
            let cdelt = Matrix2::from_diagonal(&Vector2::new(require("CDELT1")?, require("CDELT2")?));
            let pc = if header.get("PC1_1").is_some() {
                Matrix2::new(
                    header.get_f64("PC1_1").unwrap_or(1.0),
                    header.get_f64("PC1_2").unwrap_or(0.0),
                    header.get_f64("PC2_1").unwrap_or(0.0),
                    header.get_f64("PC2_2").unwrap_or(1.0),
                )
            } else {
                let (s, c) = (header.get_f64("CROTA2").unwrap_or(0.0) * RADEG).sin_cos();
                // CROTA2 rotates the scaled axes, so the ratio of the CDELTs enters PC
                let ratio = cdelt[(0, 0)] / cdelt[(1, 1)];
                Matrix2::new(c, -s / ratio, s * ratio, c)
            };
            cdelt * pc
        };

        let axis = |key: &str| {
            header
                .get(key)
                .and_then(FitsValue::as_i64)
                .filter(|n| *n > 0)
                .map(|n| n as usize)
                .ok_or_else(|| SkyPatchError::WcsError(format!("missing keyword {key}")))
        };

        Wcs::new(crval, crpix, cd, axis("NAXIS1")?, axis("NAXIS2")?)
    }

    /// Header cards describing this mapping.
    pub fn to_header(&self) -> FitsHeader {
        let mut header = FitsHeader::new();
        header.set("NAXIS1", FitsValue::Integer(self.width as i64));
        header.set("NAXIS2", FitsValue::Integer(self.height as i64));
        header.set("CTYPE1", FitsValue::String("RA---TAN".into()));
        header.set("CTYPE2", FitsValue::String("DEC--TAN".into()));
        header.set("CRVAL1", FitsValue::Float(self.crval.ra));
        header.set("CRVAL2", FitsValue::Float(self.crval.dec));
        header.set("CRPIX1", FitsValue::Float(self.crpix.x));
        header.set("CRPIX2", FitsValue::Float(self.crpix.y));
        header.set("CD1_1", FitsValue::Float(self.cd[(0, 0)]));
        header.set("CD1_2", FitsValue::Float(self.cd[(0, 1)]));
        header.set("CD2_1", FitsValue::Float(self.cd[(1, 0)]));
        header.set("CD2_2", FitsValue::Float(self.cd[(1, 1)]));
        header.set("RADESYS", FitsValue::String("ICRS".into()));
        header
    }

    /// Sky position of the 0-based pixel `(x, y)`.
    pub fn pixel_to_world(&self, x: f64, y: f64) -> SkyCoord {
        let offset = Vector2::new(x + 1.0, y + 1.0) - self.crpix;
        let std = self.cd * offset * RADEG;
        let (xi, eta) = (std.x, std.y);

        let (sin_d0, cos_d0) = (self.crval.dec * RADEG).sin_cos();
        let denom = cos_d0 - eta * sin_d0;
        let ra = self.crval.ra * RADEG + xi.atan2(denom);
        let dec = (eta * cos_d0 + sin_d0).atan2(xi.hypot(denom));

        SkyCoord {
            ra: (ra / RADEG).rem_euclid(360.0),
            dec: dec / RADEG,
        }
    }

    /// 0-based pixel position of `coord`, or `None` when it lies on the far hemisphere.
    pub fn world_to_pixel(&self, coord: &SkyCoord) -> Option<(f64, f64)> {
        let (sin_d0, cos_d0) = (self.crval.dec * RADEG).sin_cos();
        let (sin_d, cos_d) = (coord.dec * RADEG).sin_cos();
        let (sin_da, cos_da) = ((coord.ra - self.crval.ra) * RADEG).sin_cos();

        let cos_c = sin_d0 * sin_d + cos_d0 * cos_d * cos_da;
        if cos_c <= 0.0 {
            return None;
        }

        let xi = cos_d * sin_da / cos_c;
        let eta = (cos_d0 * sin_d - sin_d0 * cos_d * cos_da) / cos_c;
        let p = self.cd_inv * (Vector2::new(xi, eta) / RADEG) + self.crpix;
        Some((p.x - 1.0, p.y - 1.0))
    }

    /// Mean pixel scale of the linear transform, degrees per pixel.
    pub fn pixel_scale(&self) -> Degree {
        self.cd.determinant().abs().sqrt()
    }

    /// Local pixel scale at `coord`, measured along the declination axis.
    pub fn pixel_scale_at(&self, coord: &SkyCoord) -> Option<Degree> {
        const STEP: Degree = 1.0 / 3600.0;
        let other_dec = if coord.dec + STEP <= 90.0 {
            coord.dec + STEP
        } else {
            coord.dec - STEP
        };
        let other = SkyCoord {
            ra: coord.ra,
            dec: other_dec,
        };
        let (x0, y0) = self.world_to_pixel(coord)?;
        let (x1, y1) = self.world_to_pixel(&other)?;
        let dist = (x1 - x0).hypot(y1 - y0);
        (dist > 0.0).then(|| STEP / dist)
    }

    /// Sky positions of the four outer pixel corners, in drawing order.
    pub fn corners(&self) -> [SkyCoord; 4] {
        let (w, h) = (self.width as f64 - 0.5, self.height as f64 - 0.5);
        [
            self.pixel_to_world(-0.5, -0.5),
            self.pixel_to_world(w, -0.5),
            self.pixel_to_world(w, h),
            self.pixel_to_world(-0.5, h),
        ]
    }

    /// Sky positions sampled along the image border, corners included.
    pub fn border(&self, samples_per_edge: usize) -> Vec<SkyCoord> {
        let n = samples_per_edge.max(1);
        let (w, h) = (self.width as f64, self.height as f64);
        let mut out = Vec::with_capacity(4 * n);
        for i in 0..n {
            let t = i as f64 / n as f64;
            out.push(self.pixel_to_world(-0.5 + t * w, -0.5));
            out.push(self.pixel_to_world(w - 0.5, -0.5 + t * h));
            out.push(self.pixel_to_world(w - 0.5 - t * w, h - 0.5));
            out.push(self.pixel_to_world(-0.5, h - 0.5 - t * h));
        }
        out
    }

    /// Whether the 0-based pixel `(x, y)` falls on the image.
    pub fn contains_pixel(&self, x: f64, y: f64) -> bool {
        x >= -0.5 && y >= -0.5 && x < self.width as f64 - 0.5 && y < self.height as f64 - 0.5
    }
}

/// A circle on the sky converted to the pixel grid of an image.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelCircle {
    pub x: f64,
    pub y: f64,
    /// Radius in pixels
    pub radius: f64,
}

impl PixelCircle {
    /// Project a sky circle of `radius` degrees around `center` onto `wcs`.
    ///
    /// The radius is converted with the local pixel scale at `center`.
    pub fn from_sky(wcs: &Wcs, center: &SkyCoord, radius: Degree) -> Result<Self, SkyPatchError> {
        let (x, y) = wcs.world_to_pixel(center).ok_or_else(|| {
            SkyPatchError::WcsError(format!("{center} is not on the projection plane"))
        })?;
        let scale = wcs.pixel_scale_at(center).ok_or_else(|| {
            SkyPatchError::WcsError(format!("degenerate pixel scale at {center}"))
        })?;
        Ok(PixelCircle {
            x,
            y,
            radius: radius / scale,
        })
    }

    /// Inclusive containment of a sky position, evaluated in pixel space.
    pub fn contains(&self, wcs: &Wcs, coord: &SkyCoord) -> bool {
        match wcs.world_to_pixel(coord) {
            Some((px, py)) => (px - self.x).hypot(py - self.y) <= self.radius,
            None => false,
        }
    }
}

#[cfg(test)]
mod wcs_test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_wcs() -> Wcs {
        let center = SkyCoord::new(150.0, 2.0).unwrap();
        Wcs::centered(center, 8.0 / 60.0 / 1000.0, 1000, 1000, 0.0).unwrap()
    }

    #[test]
    fn test_reference_pixel_maps_to_crval() {
        let wcs = sample_wcs();
        let c = wcs.pixel_to_world(499.5, 499.5);
        assert_abs_diff_eq!(c.ra, 150.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.dec, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip() {
        let wcs = Wcs::centered(SkyCoord::new(10.0, -60.0).unwrap(), 1e-3, 300, 200, 30.0)
            .unwrap();
        for (x, y) in [(0.0, 0.0), (299.0, 0.0), (12.5, 187.25), (150.0, 100.0)] {
            let c = wcs.pixel_to_world(x, y);
            let (bx, by) = wcs.world_to_pixel(&c).unwrap();
            assert_abs_diff_eq!(bx, x, epsilon = 1e-7);
            assert_abs_diff_eq!(by, y, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_east_is_left() {
        let wcs = sample_wcs();
        let east = SkyCoord::new(150.01, 2.0).unwrap();
        let (x, _) = wcs.world_to_pixel(&east).unwrap();
        assert!(x < 499.5);
        let north = SkyCoord::new(150.0, 2.01).unwrap();
        let (_, y) = wcs.world_to_pixel(&north).unwrap();
        assert!(y > 499.5);
    }

    #[test]
    fn test_far_side_is_rejected() {
        let wcs = sample_wcs();
        assert!(wcs.world_to_pixel(&SkyCoord::new(330.0, -2.0).unwrap()).is_none());
    }

    #[test]
    fn test_header_round_trip_and_cdelt() {
        let wcs = sample_wcs();
        let back = Wcs::from_header(&wcs.to_header()).unwrap();
        assert_abs_diff_eq!(back.cd, wcs.cd, epsilon = 1e-15);
        assert_eq!(back.width, 1000);

        let mut cdelt_header = FitsHeader::new();
        for (k, v) in wcs.to_header().cards() {
            if !k.starts_with("CD") {
                cdelt_header.set(k, v.clone());
            }
        }
        cdelt_header.set("CDELT1", FitsValue::Float(-1e-3));
        cdelt_header.set("CDELT2", FitsValue::Float(1e-3));
        let from_cdelt = Wcs::from_header(&cdelt_header).unwrap();
        assert_abs_diff_eq!(from_cdelt.pixel_scale(), 1e-3, epsilon = 1e-15);
    }

    #[test]
    fn test_rotation_matches_crota2() {
        let center = SkyCoord::new(150.0, 2.0).unwrap();
        let scale = 1.0 / 3600.0;
        let rotated = Wcs::centered(center, scale, 200, 100, 30.0).unwrap();

        let mut header = FitsHeader::new();
        for (k, v) in rotated.to_header().cards() {
            if !k.starts_with("CD") {
                header.set(k, v.clone());
            }
        }
        header.set("CDELT1", FitsValue::Float(-scale));
        header.set("CDELT2", FitsValue::Float(scale));
        header.set("CROTA2", FitsValue::Float(30.0));
        let from_crota = Wcs::from_header(&header).unwrap();
        assert_abs_diff_eq!(rotated.cd, from_crota.cd, epsilon = 1e-15);

        // both map the same pixel to the same sky position
        let a = rotated.pixel_to_world(10.0, 80.0);
        let b = from_crota.pixel_to_world(10.0, 80.0);
        assert_abs_diff_eq!(a.separation(&b), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_other_projections() {
        let mut header = sample_wcs().to_header();
        header.set("CTYPE1", FitsValue::String("RA---SIN".into()));
        assert!(matches!(
            Wcs::from_header(&header),
            Err(SkyPatchError::WcsError(_))
        ));
    }

    #[test]
    fn test_pixel_circle() {
        let wcs = sample_wcs();
        let center = SkyCoord::new(150.0, 2.0).unwrap();
        let circle = PixelCircle::from_sky(&wcs, &center, 0.5 / 60.0).unwrap();
        // 0.5 arcmin at 0.48 arcsec per pixel
        assert_abs_diff_eq!(circle.radius, 62.5, epsilon = 1e-3);

        let inside = SkyCoord::new(150.0, 2.0 + 0.4 / 60.0).unwrap();
        let outside = SkyCoord::new(150.0, 2.0 + 0.6 / 60.0).unwrap();
        assert!(circle.contains(&wcs, &inside));
        assert!(!circle.contains(&wcs, &outside));
    }
}
