//! # HiPS cutout client
//!
//! Background images come from the CDS `hips2fits` service, which resamples a hierarchical
//! survey onto a requested TAN grid and returns a FITS file. The primary HDU is decoded with
//! [`crate::fits`] and its header turned into a [`Wcs`](crate::wcs::Wcs).
use crate::env_state::PlannerEnv;
use crate::fits::read_primary_image;
use crate::services::{Cutout, CutoutRequest, CutoutService};
use crate::skypatch_errors::{SkyPatchError, Stage};
use crate::wcs::Wcs;

pub const HIPS2FITS_URL: &str = "https://alasky.cds.unistra.fr/hips-image-services/hips2fits";

#[derive(Debug, Clone)]
pub struct HipsClient {
    env: PlannerEnv,
    url: String,
}

impl HipsClient {
    pub fn new(env: PlannerEnv) -> Self {
        HipsClient {
            env,
            url: HIPS2FITS_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

fn query_params(request: &CutoutRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("hips", request.survey_id.clone()),
        ("ra", format!("{:.8}", request.center.ra)),
        ("dec", format!("{:.8}", request.center.dec)),
        ("fov", format!("{}", request.fov)),
        ("width", request.width.to_string()),
        ("height", request.height.to_string()),
        ("projection", "TAN".to_string()),
        ("format", "fits".to_string()),
    ];
    if let Some(rotation) = request.rotation {
        params.push(("rotation_angle", format!("{rotation}")));
    }
    params
}

impl CutoutService for HipsClient {
    fn cutout(&self, request: &CutoutRequest) -> Result<Cutout, SkyPatchError> {
        let bytes = self.env.get_bytes(
            Stage::Cutout,
            &request.survey_id,
            &self.url,
            &query_params(request),
        )?;
        decode_cutout(&request.survey_id, &bytes)
    }
}

/// Decode a FITS cutout into an image plane and its WCS.
///
/// Any decoding failure is reported as [`SkyPatchError::ImageFetch`] for `survey_id`.
pub fn decode_cutout(survey_id: &str, bytes: &[u8]) -> Result<Cutout, SkyPatchError> {
    let fetch_error = |e: SkyPatchError| SkyPatchError::ImageFetch {
        identifier: survey_id.to_string(),
        reason: e.to_string(),
    };
    let image = read_primary_image(bytes).map_err(fetch_error)?;
    let wcs = Wcs::from_header(&image.header).map_err(fetch_error)?;
    Cutout::new(image.data, wcs).map_err(fetch_error)
}

#[cfg(test)]
mod hips_test {
    use super::*;
    use crate::coordinates::SkyCoord;
    use crate::fits::FitsImage;
    use ndarray::Array2;

    #[test]
    fn test_decode_cutout() {
        let center = SkyCoord::new(10.0, -30.0).unwrap();
        let wcs = Wcs::centered(center, 1.0 / 3600.0, 20, 10, 0.0).unwrap();
        let data = Array2::from_shape_fn((10, 20), |(y, x)| (y * 20 + x) as f64);
        let bytes = FitsImage {
            header: wcs.to_header(),
            data: data.clone(),
        }
        .to_bytes()
        .unwrap();

        let cutout = decode_cutout("DSS", &bytes).unwrap();
        assert_eq!(cutout.image, data);
        assert_eq!(cutout.wcs.width, 20);
        assert_eq!(cutout.wcs.height, 10);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_cutout("DSS", b"not a fits file"),
            Err(SkyPatchError::ImageFetch { ref identifier, .. }) if identifier == "DSS"
        ));
    }

    #[test]
    fn test_query_params() {
        let request = CutoutRequest {
            center: SkyCoord::new(10.0, -30.0).unwrap(),
            fov: 8.0 / 60.0,
            width: 1000,
            height: 1000,
            survey_id: "DSS".into(),
            rotation: Some(45.0),
        };
        let params = query_params(&request);
        assert!(params.contains(&("hips", "DSS".to_string())));
        assert!(params.contains(&("rotation_angle", "45".to_string())));
        assert!(params.contains(&("projection", "TAN".to_string())));
    }

    #[test]
    #[ignore = "requires network access to hips2fits"]
    fn test_hips_request() {
        let client = HipsClient::new(PlannerEnv::new());
        let request = CutoutRequest {
            center: SkyCoord::new(150.0, 2.0).unwrap(),
            fov: 8.0 / 60.0,
            width: 200,
            height: 200,
            survey_id: "DSS".into(),
            rotation: None,
        };
        let cutout = client.cutout(&request).unwrap();
        assert_eq!(cutout.image.dim(), (200, 200));
    }
}
