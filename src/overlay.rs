//! Voxel cloud annotations and the overlay compositor
//!
//! A [`VoxelCloud`] is a binary mask volume placed at an integer offset
//! inside a parent volume's index space. [`composite_cloud`] computes the
//! part of a cloud visible on the current section and renders it into an
//! RGBA patch aligned to the output canvas. Clouds are typically numerous
//! and small relative to the parent volume, so everything here is built
//! around early exits: a cloud that misses the section plane or the
//! canvas costs only a few intersection tests.

use crate::error::{Result, VolumeError};
use crate::format::PixelFormat;
use crate::geometry::{
    intersect_box_plane, intersect_rects, screen_to_volume, volume_to_screen, Box3, Rect, Section,
};
use crate::volume::{IndexBox, VoxelVolume};
use glam::{DVec2, DVec3};

/// A binary-mask annotation (voxel label) inside a parent volume.
///
/// The cloud shares the parent's voxel grid: its physical placement is
/// `origin * voxel_size` of the parent. It does not own the parent.
#[derive(Debug)]
pub struct VoxelCloud {
    /// Mask volume; the pixel format must be [`PixelFormat::Binary`].
    pub volume: VoxelVolume,
    /// Placement of the mask's origin, in parent voxel indices.
    pub origin: [i32; 3],
    /// Display color.
    pub color: [u8; 3],
    /// Alpha in `[0, 1]`.
    pub alpha: f64,
}

/// RGBA image patch aligned to the output canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayPatch {
    /// Top-left canvas pixel of the patch.
    pub origin: [i32; 2],
    pub width: usize,
    pub height: usize,
    /// Row-major RGBA bytes (`width * height * 4`); unset mask voxels
    /// stay fully transparent.
    pub rgba: Vec<u8>,
}

impl VoxelCloud {
    pub fn new(volume: VoxelVolume, origin: [i32; 3], color: [u8; 3], alpha: f64) -> Result<Self> {
        if volume.pixel_format()? != PixelFormat::Binary {
            return Err(VolumeError::FormatConstraintViolation(
                "voxel cloud volume must use the binary pixel format".to_string(),
            ));
        }
        Ok(Self {
            volume,
            origin,
            color,
            alpha,
        })
    }

    /// Shrinks the mask volume to the bounding box of its set voxels and
    /// moves the placement origin accordingly. An all-zero cloud
    /// collapses to a minimal box at its current origin.
    pub fn shrink_to_minimum(&mut self) -> Result<()> {
        let mut bb = self
            .volume
            .bounding_box_of_nonzero()?
            .unwrap_or(IndexBox::new([0, 0, 0], [1, 1, 1]));
        // keep the slice area a multiple of 8 for the packed format
        bb.size[0] = (bb.size[0] + 7) / 8 * 8;
        self.volume.transform_bounding_box(&bb)?;
        self.origin[0] += bb.origin[0];
        self.origin[1] += bb.origin[1];
        self.origin[2] += bb.origin[2];
        Ok(())
    }

    /// Expands the mask volume so it covers the whole parent volume.
    pub fn expand_to(&mut self, parent_dim: [usize; 3]) -> Result<()> {
        let current = self.volume.dimension()?;
        if self.origin == [0, 0, 0] && current == parent_dim {
            return Ok(());
        }
        let new_box = IndexBox::new(
            [-self.origin[0], -self.origin[1], -self.origin[2]],
            [
                parent_dim[0] as i32,
                parent_dim[1] as i32,
                parent_dim[2] as i32,
            ],
        );
        self.volume.transform_bounding_box(&new_box)?;
        self.origin = [0, 0, 0];
        Ok(())
    }
}

/// Renders the part of `cloud` visible on `section` into an RGBA patch
/// aligned to a `resolution`-sized canvas.
///
/// `voxel_size` is the parent volume's voxel size in mm. Returns
/// `Ok(None)` when the cloud's bounding box does not intersect the
/// section plane, or when its projection does not intersect the canvas;
/// neither case is an error.
pub fn composite_cloud(
    cloud: &VoxelCloud,
    voxel_size: DVec3,
    section: &Section,
    resolution: [usize; 2],
) -> Result<Option<OverlayPatch>> {
    if cloud.volume.pixel_format()? != PixelFormat::Binary {
        return Err(VolumeError::FormatConstraintViolation(
            "voxel cloud volume must use the binary pixel format".to_string(),
        ));
    }

    let dim = cloud.volume.dimension()?;
    let mm_origin = DVec3::new(
        f64::from(cloud.origin[0]),
        f64::from(cloud.origin[1]),
        f64::from(cloud.origin[2]),
    ) * voxel_size;
    let mm_size = DVec3::new(dim[0] as f64, dim[1] as f64, dim[2] as f64) * voxel_size;

    // Does the cloud's bounding box cross the section plane at all?
    let Some(intersections) = intersect_box_plane(&Box3::new(mm_origin, mm_size), section) else {
        return Ok(None);
    };

    // Pixel-aligned bounding rectangle of the crossings on screen.
    let screen_points = intersections
        .iter()
        .map(|&p| volume_to_screen(section, resolution, p));
    let Some(bounds) = Rect::bounding(screen_points) else {
        return Ok(None);
    };

    // Clip against the canvas.
    let canvas = Rect::new(
        DVec2::ZERO,
        DVec2::new(resolution[0] as f64, resolution[1] as f64),
    );
    let Some(visible) = intersect_rects(&canvas, &bounds.grown_to_pixels()) else {
        return Ok(None);
    };
    let out_rect = visible.grown_to_pixels();
    let out_width = out_rect.size.x as usize;
    let out_height = out_rect.size.y as usize;
    if out_width == 0 || out_height == 0 {
        return Ok(None);
    }

    // The sub-section covering just the visible rectangle, relative to
    // the cloud's own origin and in the cloud's index space.
    let p00 = screen_to_volume(section, resolution, out_rect.origin);
    let p10 = screen_to_volume(
        section,
        resolution,
        out_rect.origin + DVec2::new(out_rect.size.x, 0.0),
    );
    let p01 = screen_to_volume(
        section,
        resolution,
        out_rect.origin + DVec2::new(0.0, out_rect.size.y),
    );
    let cloud_section =
        Section::new(p00 - mm_origin, p10 - p00, p01 - p00).to_index_space(voxel_size);

    let mut mask = vec![0.0f64; out_width * out_height];
    cloud
        .volume
        .scan_section(&cloud_section, [out_width, out_height], &mut mask, None)?;

    let alpha = (cloud.alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut rgba = vec![0u8; out_width * out_height * 4];
    for (i, &m) in mask.iter().enumerate() {
        if m != 0.0 {
            let o = i * 4;
            rgba[o] = cloud.color[0];
            rgba[o + 1] = cloud.color[1];
            rgba[o + 2] = cloud.color[2];
            rgba[o + 3] = alpha;
        }
    }

    Ok(Some(OverlayPatch {
        origin: [out_rect.origin.x as i32, out_rect.origin.y as i32],
        width: out_width,
        height: out_height,
        rgba,
    }))
}
