//! Error types for volume and cache operations

use thiserror::Error;

/// Main error type for voxel volume and cache operations.
///
/// The enum is `Clone` so that a single loader failure can be delivered
/// to every caller awaiting the same in-flight cache entry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VolumeError {
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    #[error("Pixel format constraint violated: {0}")]
    FormatConstraintViolation(String),

    #[error("Voxel limit exceeded: {voxels} voxels requested, limit is {limit}")]
    LimitExceeded { voxels: usize, limit: usize },

    #[error("Dimension already fixed")]
    AlreadyInitialized,

    #[error("Dimension not set")]
    DimensionNotSet,

    #[error("Voxel size not set")]
    VoxelSizeNotSet,

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Buffer too small: expected at least {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("Volume not fully loaded: {0}")]
    NotLoaded(String),

    #[error("No display window supplied and no default window configured")]
    WindowRequired,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Loader error: {0}")]
    Loader(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

/// Specialized Result type for volume operations
pub type Result<T> = std::result::Result<T, VolumeError>;
