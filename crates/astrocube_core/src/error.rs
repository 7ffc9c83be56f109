//! Error taxonomy shared by every kernel entry point.

use thiserror::Error;

use crate::volume::DataKind;

/// Failure modes of a cube operation.
///
/// Numeric degeneracies (near-zero moment denominators, empty profile bins)
/// are not errors; they resolve to the documented 0/NaN sentinels instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CubeError {
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("unsupported data kind {0:?}, expected Float32 or Float64")]
    UnsupportedDataKind(DataKind),
    #[error("volume has {0} components per voxel, expected 1")]
    UnsupportedComponents(usize),
    #[error("degenerate parameters: {0}")]
    DegenerateParameters(String),
    #[error("operation canceled")]
    Canceled,
}

impl CubeError {
    /// Whether this error is the user-initiated stop rather than a fault.
    pub fn is_canceled(&self) -> bool {
        matches!(self, CubeError::Canceled)
    }
}

/// Result alias used across the crate.
pub type CubeResult<T> = Result<T, CubeError>;
