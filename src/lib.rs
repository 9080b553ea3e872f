//! mpr-volume - voxel volume core for on-demand MPR
//!
//! Serves arbitrary cross-sections cut through large 3-D scans (CT/MR)
//! without re-decoding a volume per request and without holding more
//! decoded data than a configured byte budget.
//!
//! # Features
//!
//! - Raw voxel container over several pixel formats, including bit-packed
//!   binary masks, with progressive slice loading
//! - Trilinear sampling and oblique-plane scanning with intensity
//!   windowing
//! - Pure section/plane geometry shared by the scanner and the overlay
//!   compositor
//! - Voxel cloud annotations composited into RGBA patches
//! - An async, size-bounded, deduplicating LRU cache of loaded volumes
//!
//! The crate performs no network or file I/O and encodes no image
//! formats; volumes come from an injected [`VolumeLoader`] and scan
//! results are plain numeric arrays for a separate encoder to consume.
//!
//! # Example
//!
//! ```rust,ignore
//! use glam::DVec3;
//! use mpr_volume::{Section, VolumeCache, VolumeCacheConfig};
//!
//! # async fn example(loader: std::sync::Arc<dyn mpr_volume::VolumeLoader>) -> mpr_volume::Result<()> {
//! let cache = VolumeCache::new(
//!     loader,
//!     Box::new(|v| v.data_size().unwrap_or(0)),
//!     VolumeCacheConfig { max_bytes: 2 << 30 },
//! );
//!
//! let volume = cache.get("1.2.840.113619.2.5.1762583153").await?;
//! let section = Section::new(
//!     DVec3::new(0.0, 0.0, 60.0),
//!     DVec3::new(240.0, 0.0, 0.0),
//!     DVec3::new(0.0, 240.0, 0.0),
//! );
//! let mut image = vec![0.0; 512 * 512];
//! volume.scan_section_mm(&section, [512, 512], &mut image, None)?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod format;
pub mod geometry;
pub mod metadata;
pub mod overlay;
pub mod ranges;
pub mod utils;
pub mod volume;

// Re-exports
pub use cache::{SizeFn, VolumeCache, VolumeCacheConfig, VolumeLoader};
pub use error::{Result, VolumeError};
pub use format::PixelFormat;
pub use geometry::{Box3, LineSegment, Rect, Section};
pub use metadata::{VolumeMetadata, Window};
pub use overlay::{composite_cloud, OverlayPatch, VoxelCloud};
pub use ranges::RangeSet;
pub use volume::{IndexBox, MprImage, OrthogonalAxis, VoxelVolume, DEFAULT_VOXEL_LIMIT};

/// Version of the mpr-volume implementation
pub const MPR_VOLUME_VERSION: &str = env!("CARGO_PKG_VERSION");
