//! Example: load a synthetic volume through the cache and scan an
//! oblique section through it.
//!
//! Run with: cargo run --example oblique_scan

use async_trait::async_trait;
use glam::DVec3;
use mpr_volume::utils::format_bytes;
use mpr_volume::{
    PixelFormat, Result, Section, VolumeCache, VolumeCacheConfig, VolumeLoader, VoxelVolume,
    Window,
};
use std::sync::Arc;

/// Stands in for a DICOM-reading collaborator: produces a 64^3 volume
/// holding the distance from the volume center.
struct SphereLoader;

#[async_trait]
impl VolumeLoader for SphereLoader {
    async fn load(&self, key: &str) -> Result<VoxelVolume> {
        println!("loading volume for key {}...", key);
        let mut volume = VoxelVolume::new();
        volume.set_dimension(64, 64, 64, PixelFormat::UInt16)?;
        volume.set_voxel_size(1.0, 1.0, 1.0);
        volume.fill_with(|x, y, z| {
            let dx = x as f64 - 31.5;
            let dy = y as f64 - 31.5;
            let dz = z as f64 - 31.5;
            (dx * dx + dy * dy + dz * dz).sqrt() * 30.0
        })?;
        for z in 0..64 {
            volume.mark_slice_loaded(z)?;
        }
        Ok(volume)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cache = VolumeCache::new(
        Arc::new(SphereLoader),
        Box::new(|v| v.data_size().unwrap_or(0)),
        VolumeCacheConfig {
            max_bytes: 16 << 20,
        },
    );

    let volume = cache.get("demo-series").await?;
    let metadata = volume.metadata()?;
    println!(
        "volume: {}x{}x{} ({}), {} cached",
        metadata.voxel_count[0],
        metadata.voxel_count[1],
        metadata.voxel_count[2],
        metadata.pixel_format,
        format_bytes(cache.total_bytes()),
    );

    // a plane tilted 45 degrees around the x axis, through the center
    let section = Section::new(
        DVec3::new(0.0, 8.0, 8.0),
        DVec3::new(64.0, 0.0, 0.0),
        DVec3::new(0.0, 45.0, 45.0),
    );

    let out_size = [32, 32];
    let mut image = vec![0.0; out_size[0] * out_size[1]];
    volume.scan_section_mm(&section, out_size, &mut image, Some(Window::new(1600.0, 800.0)))?;

    println!("oblique scan ({}x{}):", out_size[0], out_size[1]);
    const SHADES: &[u8] = b" .:-=+*#%@";
    for row in image.chunks(out_size[0]) {
        let line: String = row
            .iter()
            .map(|&v| SHADES[(v as usize * (SHADES.len() - 1)) / 255] as char)
            .collect();
        println!("{}", line);
    }

    // the second request is served from the cache
    let again = cache.get("demo-series").await?;
    println!(
        "cache hit: same instance = {}",
        Arc::ptr_eq(&volume, &again)
    );

    Ok(())
}
