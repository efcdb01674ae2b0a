//! # Celestial coordinates
//!
//! ICRS sky positions ([`SkyCoord`]), great-circle separations and the
//! observing-site geometry needed for the parallactic angle.
//!
//! Separations use the Vincenty formula, which stays accurate both for
//! coincident points and for antipodal ones.
use hifitime::Epoch;
use nalgebra::Vector3;

use crate::constants::{Degree, Radian, RADEG};
use crate::conversion::{parse_dec_to_deg, parse_ra_to_deg};
use crate::skypatch_errors::SkyPatchError;
use crate::time::gmst;

/// A position on the sky in the ICRS frame, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyCoord {
    pub ra: Degree,
    pub dec: Degree,
}

impl SkyCoord {
    /// Build a coordinate, wrapping `ra` into `[0, 360)` and rejecting `|dec| > 90`.
    pub fn new(ra: Degree, dec: Degree) -> Result<Self, SkyPatchError> {
        if !ra.is_finite() {
            return Err(SkyPatchError::invalid_input("ra", "right ascension is not finite"));
        }
        if !dec.is_finite() || !(-90.0..=90.0).contains(&dec) {
            return Err(SkyPatchError::invalid_input(
                "dec",
                "declination must lie within [-90, 90] degrees",
            ));
        }
        Ok(SkyCoord {
            ra: ra.rem_euclid(360.0),
            dec,
        })
    }

    /// Parse sexagesimal `hh:mm:ss` / `±dd:mm:ss` strings.
    pub fn from_sexagesimal(ra: &str, dec: &str) -> Result<Self, SkyPatchError> {
        SkyCoord::new(parse_ra_to_deg(ra)?, parse_dec_to_deg(dec)?)
    }

    /// Cartesian unit vector pointing at this coordinate.
    pub fn unit_vector(&self) -> Vector3<f64> {
        let (ra, dec) = (self.ra * RADEG, self.dec * RADEG);
        Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin())
    }

    /// Inverse of [`SkyCoord::unit_vector`]; the vector need not be normalized.
    pub fn from_vector(v: &Vector3<f64>) -> Option<Self> {
        let norm = v.norm();
        if norm == 0.0 || !norm.is_finite() {
            return None;
        }
        let u = v / norm;
        let dec = u.z.clamp(-1.0, 1.0).asin() / RADEG;
        let ra = u.y.atan2(u.x) / RADEG;
        Some(SkyCoord {
            ra: ra.rem_euclid(360.0),
            dec,
        })
    }

    /// Great-circle separation to `other`, in degrees.
    pub fn separation(&self, other: &SkyCoord) -> Degree {
        angular_separation(self.ra, self.dec, other.ra, other.dec)
    }
}

impl std::fmt::Display for SkyCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}°, {:+.6}°)", self.ra, self.dec)
    }
}

/// Great-circle separation between two (ra, dec) pairs, all in degrees.
pub fn angular_separation(ra1: Degree, dec1: Degree, ra2: Degree, dec2: Degree) -> Degree {
    let (ra1, dec1, ra2, dec2) = (ra1 * RADEG, dec1 * RADEG, ra2 * RADEG, dec2 * RADEG);
    let dra = ra2 - ra1;

    let (sin_d1, cos_d1) = dec1.sin_cos();
    let (sin_d2, cos_d2) = dec2.sin_cos();
    let (sin_dra, cos_dra) = dra.sin_cos();

    let num1 = cos_d2 * sin_dra;
    let num2 = cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_dra;
    let denominator = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_dra;

    num1.hypot(num2).atan2(denominator) / RADEG
}

/// A ground-based observing site.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservingSite {
    pub name: String,
    /// East-positive geodetic longitude
    pub longitude: Degree,
    pub latitude: Degree,
}

impl ObservingSite {
    /// ESO Paranal observatory.
    pub fn paranal() -> Self {
        ObservingSite {
            name: "Paranal".into(),
            longitude: -70.4045,
            latitude: -24.6272,
        }
    }

    /// Local mean sidereal time at `epoch`, in radians.
    ///
    /// UTC is used in place of UT1; the difference stays below one second of time.
    pub fn local_sidereal_time(&self, epoch: Epoch) -> Radian {
        (gmst(epoch.to_mjd_utc_days()) + self.longitude * RADEG).rem_euclid(std::f64::consts::TAU)
    }

    /// Parallactic angle of `coord` seen from this site at `epoch`, in degrees within (-180, 180].
    ///
    /// The angle between the direction to the celestial pole and the local zenith, measured
    /// at the target. Useful to orient the instrument (and the cutouts) along the horizon.
    pub fn parallactic_angle(&self, coord: &SkyCoord, epoch: Epoch) -> Degree {
        let hour_angle = self.local_sidereal_time(epoch) - coord.ra * RADEG;
        let phi = self.latitude * RADEG;
        let delta = coord.dec * RADEG;

        let q = hour_angle
            .sin()
            .atan2(phi.tan() * delta.cos() - delta.sin() * hour_angle.cos());
        q / RADEG
    }
}

#[cfg(test)]
mod coordinates_test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_new_wraps_ra() {
        let c = SkyCoord::new(-10.0, 5.0).unwrap();
        assert_abs_diff_eq!(c.ra, 350.0, epsilon = 1e-12);
        assert!(SkyCoord::new(10.0, 91.0).is_err());
        assert!(SkyCoord::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_separation() {
        let a = SkyCoord::new(10.0, 0.0).unwrap();
        let b = SkyCoord::new(10.0, 2.0 / 60.0).unwrap();
        assert_abs_diff_eq!(a.separation(&b), 2.0 / 60.0, epsilon = 1e-12);
        assert_abs_diff_eq!(a.separation(&a), 0.0, epsilon = 1e-15);

        let c = SkyCoord::new(190.0, 0.0).unwrap();
        assert_abs_diff_eq!(a.separation(&c), 180.0, epsilon = 1e-9);

        // wrap-around of right ascension
        let d = SkyCoord::new(359.5, 0.0).unwrap();
        let e = SkyCoord::new(0.5, 0.0).unwrap();
        assert_abs_diff_eq!(d.separation(&e), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unit_vector_round_trip() {
        let c = SkyCoord::new(123.456, -45.678).unwrap();
        let back = SkyCoord::from_vector(&(c.unit_vector() * 3.0)).unwrap();
        assert_abs_diff_eq!(back.ra, c.ra, epsilon = 1e-9);
        assert_abs_diff_eq!(back.dec, c.dec, epsilon = 1e-9);
        assert!(SkyCoord::from_vector(&Vector3::zeros()).is_none());
    }

    #[test]
    fn test_parallactic_angle_on_meridian() {
        let site = ObservingSite::paranal();
        let epoch = Epoch::from_gregorian_utc_hms(2024, 3, 1, 3, 0, 0);
        let lst = site.local_sidereal_time(epoch) / RADEG;

        // a target transiting south of zenith has q = 0
        let south = SkyCoord::new(lst, -60.0).unwrap();
        assert_abs_diff_eq!(site.parallactic_angle(&south, epoch), 0.0, epsilon = 1e-6);

        // a target transiting north of zenith has |q| = 180
        let north = SkyCoord::new(lst, 10.0).unwrap();
        assert_abs_diff_eq!(
            site.parallactic_angle(&north, epoch).abs(),
            180.0,
            epsilon = 1e-6
        );
    }
}
