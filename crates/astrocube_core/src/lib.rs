//! Astronomical Data Cube Core Library
//!
//! Smoothing, masking and reduction kernels for 3-D scalar cubes (spectral
//! line data: two sky axes and one velocity axis). Kernels are generic over
//! `f32`/`f64`, run on rayon, and cooperate with a shared progress token for
//! progress reporting and cancellation. Header and WCS handling stay with the
//! host, which injects the spectral axis transform and beam geometry.

pub mod bounds;
pub mod error;
pub mod exec;
pub mod float_trait;
pub mod gradient;
pub mod grid;
pub mod jobs;
pub mod kernels;
pub mod masking;
pub mod moments;
pub mod noise_estimation;
pub mod orchestration;
pub mod profile;
pub mod progress;
pub mod separable;
pub mod smoothing;
pub mod statistics;
pub mod volume;
pub mod wavelet;
pub mod world;

// Re-export commonly used types at the crate root
pub use bounds::{Region, VoxelBounds};
pub use error::{CubeError, CubeResult};
pub use exec::ExecConfig;
pub use float_trait::CubeFloat;
pub use grid::{CubeAxis, Grid};
pub use jobs::{JobManager, JobState};
pub use masking::{
    apply_blank, apply_crop, apply_mask, mask_bounds, recenter_reference_pixel, BlankValue,
    CropResult, MaskConfig, MaskOperation, MaskOutput,
};
pub use moments::{compute_moments, MomentConfig, MomentMaps};
pub use noise_estimation::NoiseEstimator;
pub use orchestration::{
    mask_volume, moment_maps, smooth_volume, spectral_profile, volume_statistics, AnyMomentMaps,
    AnyProfile, MaskedVolume,
};
pub use profile::{compute_profile, ProfileConfig, SpectralProfile};
pub use progress::{ProgressToken, STATUS_CANCEL_REQUESTED, STATUS_DONE, STATUS_IDLE};
pub use smoothing::{apply_smoothing, SmoothingConfig, SmoothingFilter};
pub use statistics::{
    compute_statistics, StatisticsConfig, StatisticsFlags, StatisticsRecord, StatisticsTable,
};
pub use volume::{AnyVolume, DataKind, MaskVolume, ScalarVolume};
pub use wavelet::{WaveletKind, WaveletParams};
pub use world::{AxisTransform, BeamInfo, FnAxis, LinearAxis, VelocityUnit};
