//! # skypatch environment state
//!
//! This module defines [`crate::env_state::PlannerEnv`], the **shared HTTP environment** used by
//! every service client of the crate (ephemeris, catalog cone-search, image cutouts).
//!
//! ## Overview
//!
//! 1. Manage a single [`ureq::Agent`] with a global timeout, reused across requests so that the
//!    per-patch workers share one connection pool.
//! 2. Provide GET helpers returning text or raw bytes.
//! 3. Translate transport failures into the crate's error taxonomy: a timeout becomes
//!    [`SkyPatchError::ServiceTimeout`] tagged with the stage and the identifier being queried,
//!    and is never retried here. Other failures become the query error of their stage.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use skypatch::env_state::PlannerEnv;
//! use skypatch::skypatch_errors::Stage;
//!
//! let env = PlannerEnv::new();
//! let body = env
//!     .get_text(Stage::Ephemeris, "Ceres", "https://ssd.jpl.nasa.gov/api/horizons.api", &[])
//!     .unwrap();
//! ```
use std::time::Duration;
use ureq::Agent;

use crate::skypatch_errors::{SkyPatchError, Stage};

/// Upper bound on a downloaded body; cutouts of 1000x1000 doubles stay well below.
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Shared HTTP agent handed to the service clients.
#[derive(Debug, Clone)]
pub struct PlannerEnv {
    pub http_client: Agent,
}

impl Default for PlannerEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl PlannerEnv {
    /// Create an environment whose requests time out after 30 seconds.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        let agent: Agent = config.into();

        PlannerEnv { http_client: agent }
    }

    fn get(
        &self,
        stage: Stage,
        identifier: &str,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<ureq::http::Response<ureq::Body>, SkyPatchError> {
        log::debug!("{stage} request for {identifier}: {url}");
        self.http_client
            .get(url)
            .query_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .call()
            .map_err(|e| classify(e, stage, identifier))
    }

    /// GET `url` with query `params` and return the body as text.
    pub fn get_text(
        &self,
        stage: Stage,
        identifier: &str,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<String, SkyPatchError> {
        self.get(stage, identifier, url, params)?
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_string()
            .map_err(|e| classify(e, stage, identifier))
    }

    /// GET `url` with query `params` and return the raw body.
    pub fn get_bytes(
        &self,
        stage: Stage,
        identifier: &str,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<u8>, SkyPatchError> {
        self.get(stage, identifier, url, params)?
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(|e| classify(e, stage, identifier))
    }
}

/// Map a transport error onto the error of the stage that issued the request.
fn classify(err: ureq::Error, stage: Stage, identifier: &str) -> SkyPatchError {
    if matches!(err, ureq::Error::Timeout(_)) {
        return SkyPatchError::ServiceTimeout {
            stage,
            identifier: identifier.to_string(),
        };
    }
    match stage {
        Stage::Ephemeris => SkyPatchError::EphemerisQuery {
            identifier: identifier.to_string(),
            reason: err.to_string(),
        },
        Stage::Catalog => SkyPatchError::CatalogQuery {
            identifier: identifier.to_string(),
            reason: err.to_string(),
        },
        Stage::Cutout => SkyPatchError::ImageFetch {
            identifier: identifier.to_string(),
            reason: err.to_string(),
        },
    }
}
