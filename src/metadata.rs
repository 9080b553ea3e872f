//! Display windowing and the read-only volume metadata snapshot

use crate::format::PixelFormat;
use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Linear intensity window mapping a voxel value range to display range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Full width of the input range.
    pub width: f64,
    /// Center of the input range.
    pub level: f64,
}

impl Window {
    pub fn new(width: f64, level: f64) -> Self {
        Self { width, level }
    }

    /// Maps `[level - width/2, level + width/2]` linearly to `[0, 255]`,
    /// rounding and clamping.
    pub fn apply(&self, value: f64) -> f64 {
        let mapped = ((value - self.level + self.width / 2.0) * (255.0 / self.width)).round();
        mapped.clamp(0.0, 255.0)
    }
}

/// Read-only snapshot of a volume's descriptive state.
///
/// Serializes to JSON for the serving layer; nothing in here allows
/// mutating the volume it was taken from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMetadata {
    /// Number of voxels along x, y, z.
    pub voxel_count: [usize; 3],

    /// Size of one voxel in millimeters, if known.
    pub voxel_size: Option<DVec3>,

    /// Pixel format of the stored voxels.
    pub pixel_format: PixelFormat,

    /// Default display window, if configured.
    pub default_window: Option<Window>,

    /// Loaded z-slice ranges (inclusive).
    pub loaded_ranges: Vec<(usize, usize)>,
}
