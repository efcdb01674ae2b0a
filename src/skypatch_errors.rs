use thiserror::Error;

/// Pipeline stage in which a service failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ephemeris,
    Catalog,
    Cutout,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Ephemeris => write!(f, "ephemeris"),
            Stage::Catalog => write!(f, "catalog"),
            Stage::Cutout => write!(f, "cutout"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SkyPatchError {
    #[error("Invalid input for field '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Invalid observing window: {0}")]
    InvalidWindow(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Unable to parse the ephemeris reply: {0}")]
    EphemerisParse(String),

    #[error("Connection timeout during the {stage} stage for {identifier}")]
    ServiceTimeout { stage: Stage, identifier: String },

    #[error("Ephemeris query failed for {identifier}: {reason}")]
    EphemerisQuery { identifier: String, reason: String },

    #[error("Catalog query failed for {identifier}: {reason}")]
    CatalogQuery { identifier: String, reason: String },

    #[error("Image fetch failed for {identifier}: {reason}")]
    ImageFetch { identifier: String, reason: String },

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("FITS parsing error: {0}")]
    FitsParse(String),

    #[error("WCS error: {0}")]
    WcsError(String),

    #[error("Observing block parsing error: {0}")]
    ObservingBlockParse(String),

    #[error("Invalid planner configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),
}

impl SkyPatchError {
    /// Shorthand for a per-field validation failure.
    pub fn invalid_input(field: &str, reason: impl Into<String>) -> Self {
        SkyPatchError::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the caller can fix the request and resubmit it unchanged otherwise.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            SkyPatchError::InvalidInput { .. } | SkyPatchError::InvalidWindow(_)
        )
    }
}

impl From<rayon::ThreadPoolBuildError> for SkyPatchError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        SkyPatchError::WorkerPool(err.to_string())
    }
}

impl PartialEq for SkyPatchError {
    fn eq(&self, other: &Self) -> bool {
        use SkyPatchError::*;
        match (self, other) {
            (
                InvalidInput {
                    field: f1,
                    reason: r1,
                },
                InvalidInput {
                    field: f2,
                    reason: r2,
                },
            ) => f1 == f2 && r1 == r2,
            (InvalidWindow(a), InvalidWindow(b)) => a == b,
            (TargetNotFound(a), TargetNotFound(b)) => a == b,
            (EphemerisParse(a), EphemerisParse(b)) => a == b,
            (
                ServiceTimeout {
                    stage: s1,
                    identifier: i1,
                },
                ServiceTimeout {
                    stage: s2,
                    identifier: i2,
                },
            ) => s1 == s2 && i1 == i2,
            (
                EphemerisQuery {
                    identifier: i1,
                    reason: r1,
                },
                EphemerisQuery {
                    identifier: i2,
                    reason: r2,
                },
            ) => i1 == i2 && r1 == r2,
            (
                CatalogQuery {
                    identifier: i1,
                    reason: r1,
                },
                CatalogQuery {
                    identifier: i2,
                    reason: r2,
                },
            ) => i1 == i2 && r1 == r2,
            (
                ImageFetch {
                    identifier: i1,
                    reason: r1,
                },
                ImageFetch {
                    identifier: i2,
                    reason: r2,
                },
            ) => i1 == i2 && r1 == r2,
            (EmptyResult(a), EmptyResult(b)) => a == b,
            (InsufficientData(a), InsufficientData(b)) => a == b,
            (FitsParse(a), FitsParse(b)) => a == b,
            (WcsError(a), WcsError(b)) => a == b,
            (ObservingBlockParse(a), ObservingBlockParse(b)) => a == b,
            (InvalidConfig(a), InvalidConfig(b)) => a == b,
            (WorkerPool(a), WorkerPool(b)) => a == b,

            // IO errors are not comparable: same variant means equal
            (IoError(_), IoError(_)) => true,

            _ => false,
        }
    }
}
