//! # Primary-HDU FITS access
//!
//! The cutout service answers with a FITS file. Decoding goes through `cfitsio` (the
//! [`fitsio`] bindings), which needs a file on disk, so the payload is spooled into a
//! temporary directory first. Only the primary HDU is read, and cubes (colour surveys) are
//! reduced to their first plane. `cfitsio` applies `BSCALE`/`BZERO`; integer `BLANK` values
//! become `NaN`.
//!
//! The header is not kept whole: [`FitsHeader`] holds the image axes and the celestial WCS
//! keywords, which is everything [`crate::wcs::Wcs::from_header`] needs.
use std::path::Path;
use std::sync::Mutex;

use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use ndarray::Array2;
use once_cell::sync::Lazy;

use crate::skypatch_errors::SkyPatchError;

/// Largest image plane accepted from a header, in pixels.
pub const MAX_PLANE_PIXELS: usize = 1 << 26;

const STRING_KEYS: [&str; 3] = ["CTYPE1", "CTYPE2", "RADESYS"];
const FLOAT_KEYS: [&str; 15] = [
    "CRVAL1", "CRVAL2", "CRPIX1", "CRPIX2", "CD1_1", "CD1_2", "CD2_1", "CD2_2", "PC1_1",
    "PC1_2", "PC2_1", "PC2_2", "CDELT1", "CDELT2", "CROTA2",
];

// cfitsio is not built reentrant everywhere; the workers take turns.
static CFITSIO: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// FITS header value.
#[derive(Debug, Clone, PartialEq)]
pub enum FitsValue {
    String(String),
    Integer(i64),
    Float(f64),
}

impl FitsValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FitsValue::Float(f) => Some(*f),
            FitsValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FitsValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FitsValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered keyword/value records of a header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitsHeader {
    cards: Vec<(String, FitsValue)>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a keyword, replacing an earlier value in place.
    pub fn set(&mut self, key: &str, value: FitsValue) {
        let key = key.to_ascii_uppercase();
        match self.cards.iter_mut().find(|(k, _)| *k == key) {
            Some(card) => card.1 = value,
            None => self.cards.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FitsValue> {
        self.cards
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FitsValue::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FitsValue::as_str)
    }

    pub fn cards(&self) -> &[(String, FitsValue)] {
        &self.cards
    }
}

/// One image plane with its header.
#[derive(Debug, Clone, PartialEq)]
pub struct FitsImage {
    pub header: FitsHeader,
    /// Shape `(NAXIS2, NAXIS1)`: rows are the FITS `y` axis.
    pub data: Array2<f64>,
}

fn fits_error(err: fitsio::errors::Error) -> SkyPatchError {
    SkyPatchError::FitsParse(err.to_string())
}

fn read_key_optional<T: fitsio::headers::ReadsKey>(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    key: &str,
) -> Option<T> {
    hdu.read_key(fptr, key).ok()
}

/// Read the header and first image plane of the primary HDU.
///
/// Arguments
/// -----------------
/// * `bytes`: a complete FITS file, as returned by the image service.
///
/// Return
/// ----------
/// * The first image plane and its WCS keywords, or [`SkyPatchError::FitsParse`] when the
///   payload is not a FITS image or its declared plane exceeds [`MAX_PLANE_PIXELS`].
pub fn read_primary_image(bytes: &[u8]) -> Result<FitsImage, SkyPatchError> {
    let dir = tempfile::Builder::new().prefix("skypatch-").tempdir()?;
    let path = dir.path().join("cutout.fits");
    std::fs::write(&path, bytes)?;

    let _guard = CFITSIO.lock().unwrap_or_else(|e| e.into_inner());
    read_file(&path)
}

fn read_file(path: &Path) -> Result<FitsImage, SkyPatchError> {
    let mut fptr = FitsFile::open(path).map_err(fits_error)?;
    let hdu = fptr.primary_hdu().map_err(fits_error)?;

    let (shape, is_integer) = match &hdu.info {
        HduInfo::ImageInfo { shape, image_type } => (
            shape.clone(),
            !matches!(image_type, ImageType::Float | ImageType::Double),
        ),
        _ => return Err(SkyPatchError::FitsParse("primary HDU is not an image".into())),
    };
    // shape is in C order: [.., NAXIS2, NAXIS1]
    if shape.len() < 2 {
        return Err(SkyPatchError::FitsParse(format!(
            "expected an image, found NAXIS = {}",
            shape.len()
        )));
    }
    let width = shape[shape.len() - 1];
    let height = shape[shape.len() - 2];
    let plane = width
        .checked_mul(height)
        .filter(|n| (1..=MAX_PLANE_PIXELS).contains(n))
        .ok_or_else(|| {
            SkyPatchError::FitsParse(format!("unsupported image plane {width} x {height}"))
        })?;

    let mut values: Vec<f64> = hdu.read_section(&mut fptr, 0, plane).map_err(fits_error)?;
    if values.len() != plane {
        return Err(SkyPatchError::FitsParse("truncated data unit".into()));
    }

    let blank = read_key_optional::<i64>(&hdu, &mut fptr, "BLANK").filter(|_| is_integer);
    if let Some(blank) = blank {
        let bscale = read_key_optional::<f64>(&hdu, &mut fptr, "BSCALE").unwrap_or(1.0);
        let bzero = read_key_optional::<f64>(&hdu, &mut fptr, "BZERO").unwrap_or(0.0);
        let blank_value = bzero + bscale * blank as f64;
        values
            .iter_mut()
            .filter(|v| **v == blank_value)
            .for_each(|v| *v = f64::NAN);
    }

    let mut header = FitsHeader::new();
    header.set("NAXIS1", FitsValue::Integer(width as i64));
    header.set("NAXIS2", FitsValue::Integer(height as i64));
    for key in STRING_KEYS {
        if let Some(value) = read_key_optional::<String>(&hdu, &mut fptr, key) {
            header.set(key, FitsValue::String(value.trim().to_string()));
        }
    }
    for key in FLOAT_KEYS {
        if let Some(value) = read_key_optional::<f64>(&hdu, &mut fptr, key) {
            header.set(key, FitsValue::Float(value));
        }
    }

    let data = Array2::from_shape_vec((height, width), values)
        .map_err(|e| SkyPatchError::FitsParse(e.to_string()))?;
    Ok(FitsImage { header, data })
}

impl FitsImage {
    /// Encode as a single-HDU FITS file of doubles.
    ///
    /// The axes come from the array shape; `NAXISn` cards of the header are ignored.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SkyPatchError> {
        let dir = tempfile::Builder::new().prefix("skypatch-").tempdir()?;
        let path = dir.path().join("image.fits");
        {
            let _guard = CFITSIO.lock().unwrap_or_else(|e| e.into_inner());
            self.write_file(&path)?;
        }
        Ok(std::fs::read(&path)?)
    }

    fn write_file(&self, path: &Path) -> Result<(), SkyPatchError> {
        let (height, width) = self.data.dim();
        let description = ImageDescription {
            data_type: ImageType::Double,
            dimensions: &[height, width],
        };
        let mut fptr = FitsFile::create(path)
            .with_custom_primary(&description)
            .open()
            .map_err(fits_error)?;
        let hdu = fptr.primary_hdu().map_err(fits_error)?;

        for (key, value) in self.header.cards() {
            if key.starts_with("NAXIS") {
                continue;
            }
            let written = match value {
                FitsValue::String(s) => hdu.write_key(&mut fptr, key, s.as_str()),
                FitsValue::Integer(i) => hdu.write_key(&mut fptr, key, *i),
                FitsValue::Float(f) => hdu.write_key(&mut fptr, key, *f),
            };
            written.map_err(fits_error)?;
        }

        let values: Vec<f64> = self.data.iter().copied().collect();
        hdu.write_image(&mut fptr, &values).map_err(fits_error)
    }
}

#[cfg(test)]
mod fits_test {
    use super::*;
    use ndarray::array;

    /// Hand-made header blocks followed by `data`, padded the way FITS requires.
    fn raw_fits(cards: &[&str], data: &[u8]) -> Vec<u8> {
        let mut bytes: Vec<u8> = cards
            .iter()
            .chain(std::iter::once(&"END"))
            .flat_map(|c| format!("{c:<80}").into_bytes())
            .collect();
        bytes.resize(bytes.len().div_ceil(2880) * 2880, b' ');
        bytes.extend_from_slice(data);
        bytes.resize(bytes.len().div_ceil(2880) * 2880, 0);
        bytes
    }

    #[test]
    fn test_read_int16_with_scaling() {
        let mut data = 5i16.to_be_bytes().to_vec();
        data.extend_from_slice(&(-1i16).to_be_bytes());
        let bytes = raw_fits(
            &[
                "SIMPLE  =                    T",
                "BITPIX  =                   16",
                "NAXIS   =                    2",
                "NAXIS1  =                    2",
                "NAXIS2  =                    1",
                "BZERO   =                 10.0",
                "BLANK   =                   -1",
                "COMMENT synthetic header",
            ],
            &data,
        );

        let image = read_primary_image(&bytes).unwrap();
        assert_eq!(image.data.dim(), (1, 2));
        assert_eq!(image.data[[0, 0]], 15.0);
        assert!(image.data[[0, 1]].is_nan());
    }

    #[test]
    fn test_encode_then_read() {
        let mut header = FitsHeader::new();
        header.set("CTYPE1", FitsValue::String("RA---TAN".into()));
        header.set("CRVAL1", FitsValue::Float(150.25));
        let image = FitsImage {
            header,
            data: array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
        };

        let decoded = read_primary_image(&image.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.data, image.data);
        assert_eq!(decoded.header.get_str("CTYPE1"), Some("RA---TAN"));
        assert_eq!(decoded.header.get_f64("CRVAL1"), Some(150.25));
        assert_eq!(decoded.header.get_f64("NAXIS1"), Some(3.0));
    }

    #[test]
    fn test_oversized_plane_is_rejected() {
        let bytes = raw_fits(
            &[
                "SIMPLE  =                    T",
                "BITPIX  =                  -64",
                "NAXIS   =                    2",
                "NAXIS1  =           8589934592",
                "NAXIS2  =           8589934592",
            ],
            &[0; 16],
        );
        assert!(matches!(
            read_primary_image(&bytes),
            Err(SkyPatchError::FitsParse(_))
        ));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(
            read_primary_image(b"SIMPLE"),
            Err(SkyPatchError::FitsParse(_))
        ));
    }
}
