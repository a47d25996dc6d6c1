use thiserror::Error;

use crate::algorithm::area::FunctionalGroup;

/// Errors raised by the spectral processing stages.
#[derive(Debug, Error)]
pub enum FtirError {
    /// Non-monotonic, non-finite or too short input curve.
    #[error("invalid spectrum: {0}")]
    InvalidSpectrum(String),

    /// Degenerate or singular linear system.
    #[error("numerical error: {0}")]
    NumericalError(String),

    /// No qualifying peak inside the search range of a mandatory group.
    #[error("no {group} peak found near {center} cm^-1, try a window around {hint:?}")]
    PeakNotFound {
        group: FunctionalGroup,
        center: f64,
        hint: (f64, f64),
    },

    /// The nonlinear fit did not produce a physically valid component.
    #[error("gaussian fit failed: {0}")]
    GaussianFitFailed(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("malformed configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FtirError>;
