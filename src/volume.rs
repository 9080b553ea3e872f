//! Raw voxel container with MPR support
//!
//! [`VoxelVolume`] owns a contiguous byte buffer of voxels in one
//! [`PixelFormat`] and samples it at arbitrary, non-axis-aligned planes
//! with trilinear interpolation. Slices are inserted progressively and
//! tracked in a [`RangeSet`], so consumers can check readiness before
//! running scans that need the whole volume.

use crate::error::{Result, VolumeError};
use crate::format::{PixelFormat, ReadFn, WriteFn};
use crate::geometry::Section;
use crate::metadata::{VolumeMetadata, Window};
use crate::ranges::RangeSet;
use bytes::Bytes;
use glam::DVec3;

/// Default ceiling on the total voxel count of one volume.
pub const DEFAULT_VOXEL_LIMIT: usize = 1024 * 1024 * 1024;

/// Integer box in voxel index space. Origins may be negative; bulk
/// operations clamp to the volume bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBox {
    pub origin: [i32; 3],
    pub size: [i32; 3],
}

impl IndexBox {
    pub fn new(origin: [i32; 3], size: [i32; 3]) -> Self {
        Self { origin, size }
    }
}

/// Orthogonal reconstruction axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrthogonalAxis {
    /// Perpendicular to z; one stored slice.
    Axial,
    /// Perpendicular to x.
    Sagittal,
    /// Perpendicular to y.
    Coronal,
}

/// A single windowed MPR image in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct MprImage {
    pub pixels: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

/// Allocated state of a volume: fixed after `set_dimension`.
#[derive(Debug)]
struct Storage {
    size: [usize; 3],
    format: PixelFormat,
    data: Vec<u8>,
    read: ReadFn,
    write: WriteFn,
    loaded: RangeSet,
}

impl Storage {
    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + (y + z * self.size[1]) * self.size[0]
    }

    #[inline]
    fn read_at(&self, pos: usize) -> f64 {
        (self.read)(&self.data, pos)
    }

    #[inline]
    fn write_at(&mut self, pos: usize, value: f64) {
        (self.write)(&mut self.data, pos, value)
    }

    fn slice_bytes(&self) -> usize {
        self.format.byte_length(self.size[0] * self.size[1])
    }

    /// 4-neighbor interpolation within one z-slice.
    ///
    /// `ix`/`iy` address the top-left voxel of the 2x2 cell and `fx`/`fy`
    /// are the fractional weights toward the right/bottom neighbors.
    fn bilinear(&self, ix: usize, fx: f64, iy: usize, fy: f64, iz: usize) -> f64 {
        let rx = self.size[0];
        let ixp = (ix + 1).min(rx - 1);
        let row = iy * rx;
        let row_p = (iy + 1).min(self.size[1] - 1) * rx;
        let offset = rx * self.size[1] * iz;

        let p0 = self.read_at(offset + ix + row);
        let p1 = self.read_at(offset + ixp + row);
        let p2 = self.read_at(offset + ix + row_p);
        let p3 = self.read_at(offset + ixp + row_p);

        let v0 = p0 * (1.0 - fx) + p1 * fx;
        let v1 = p2 * (1.0 - fx) + p3 * fx;
        v0 * (1.0 - fy) + v1 * fy
    }

    fn sample_trilinear(&self, x: f64, y: f64, z: f64) -> f64 {
        let [rx, ry, rz] = self.size;
        let x_end = (rx - 1) as f64;
        let y_end = (ry - 1) as f64;
        let z_end = (rz - 1) as f64;
        if !(0.0..=x_end).contains(&x)
            || !(0.0..=y_end).contains(&y)
            || !(0.0..=z_end).contains(&z)
        {
            return 0.0;
        }

        let (ix, fx) = cell(x, rx);
        let (iy, fy) = cell(y, ry);
        let (iz, fz) = cell(z, rz);

        let near = self.bilinear(ix, fx, iy, fy, iz);
        let far = self.bilinear(ix, fx, iy, fy, (iz + 1).min(rz - 1));
        near * (1.0 - fz) + far * fz
    }
}

/// Splits a coordinate into a cell index and fractional weight. A
/// coordinate exactly on the far edge lands in the last cell with weight
/// 1.0, so interpolation never reads past the final voxel.
#[inline]
fn cell(coord: f64, size: usize) -> (usize, f64) {
    if size == 1 {
        return (0, 0.0);
    }
    let end = size - 1;
    let mut i = coord.floor() as usize;
    if i >= end {
        i = end - 1;
    }
    (i, coord - i as f64)
}

/// Raw voxel container.
///
/// Created empty; the dimension is fixed exactly once with
/// [`set_dimension`](Self::set_dimension) and immutable afterwards,
/// except through a full-volume [`convert`](Self::convert).
#[derive(Debug)]
pub struct VoxelVolume {
    storage: Option<Storage>,
    voxel_size: Option<DVec3>,
    voxel_limit: usize,
    default_window: Option<Window>,
}

impl Default for VoxelVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl VoxelVolume {
    pub fn new() -> Self {
        Self {
            storage: None,
            voxel_size: None,
            voxel_limit: DEFAULT_VOXEL_LIMIT,
            default_window: None,
        }
    }

    /// Overrides the allocation ceiling. Only meaningful before
    /// [`set_dimension`](Self::set_dimension).
    pub fn with_voxel_limit(mut self, limit: usize) -> Self {
        self.voxel_limit = limit;
        self
    }

    /// Fixes the volume size and allocates zeroed storage.
    pub fn set_dimension(&mut self, x: usize, y: usize, z: usize, format: PixelFormat) -> Result<()> {
        if x == 0 || y == 0 || z == 0 {
            return Err(VolumeError::InvalidDimension(format!(
                "volume size must be positive, got {}x{}x{}",
                x, y, z
            )));
        }
        if self.storage.is_some() {
            return Err(VolumeError::AlreadyInitialized);
        }
        let voxels = x
            .checked_mul(y)
            .and_then(|xy| xy.checked_mul(z))
            .unwrap_or(usize::MAX);
        if voxels > self.voxel_limit {
            return Err(VolumeError::LimitExceeded {
                voxels,
                limit: self.voxel_limit,
            });
        }
        if format.is_bit_packed() && (x * y) % 8 != 0 {
            return Err(VolumeError::FormatConstraintViolation(
                "slice area of a bit-packed volume must be a multiple of 8 voxels".to_string(),
            ));
        }

        let (read, write) = format.accessor();
        self.storage = Some(Storage {
            size: [x, y, z],
            format,
            data: vec![0u8; format.byte_length(voxels)],
            read,
            write,
            loaded: RangeSet::new(),
        });
        Ok(())
    }

    fn storage(&self) -> Result<&Storage> {
        self.storage.as_ref().ok_or(VolumeError::DimensionNotSet)
    }

    fn storage_mut(&mut self) -> Result<&mut Storage> {
        self.storage.as_mut().ok_or(VolumeError::DimensionNotSet)
    }

    /// Voxel count along x, y, z.
    pub fn dimension(&self) -> Result<[usize; 3]> {
        Ok(self.storage()?.size)
    }

    pub fn pixel_format(&self) -> Result<PixelFormat> {
        Ok(self.storage()?.format)
    }

    /// Byte size of the backing buffer.
    pub fn data_size(&self) -> Result<usize> {
        Ok(self.storage()?.data.len())
    }

    /// Sets the size of one voxel in millimeters.
    pub fn set_voxel_size(&mut self, width: f64, height: f64, depth: f64) {
        self.voxel_size = Some(DVec3::new(width, height, depth));
    }

    pub fn voxel_size(&self) -> Result<DVec3> {
        self.voxel_size.ok_or(VolumeError::VoxelSizeNotSet)
    }

    /// Physical extent of the volume in millimeters.
    pub fn mm_dimension(&self) -> Result<DVec3> {
        let [x, y, z] = self.dimension()?;
        Ok(DVec3::new(x as f64, y as f64, z as f64) * self.voxel_size()?)
    }

    pub fn set_default_window(&mut self, window: Window) {
        self.default_window = Some(window);
    }

    pub fn default_window(&self) -> Option<Window> {
        self.default_window
    }

    /// Voxel value at integer coordinates.
    ///
    /// This is the O(1) hot path; bounds and initialization are the
    /// caller's contract. Panics when the dimension is not set or the
    /// coordinates are out of range.
    #[inline]
    pub fn voxel_at(&self, x: usize, y: usize, z: usize) -> f64 {
        let storage = self.storage.as_ref().expect("dimension not set");
        debug_assert!(x < storage.size[0] && y < storage.size[1] && z < storage.size[2]);
        storage.read_at(storage.index(x, y, z))
    }

    /// Writes a voxel value at integer coordinates. Same contract as
    /// [`voxel_at`](Self::voxel_at).
    #[inline]
    pub fn write_voxel(&mut self, value: f64, x: usize, y: usize, z: usize) {
        let storage = self.storage.as_mut().expect("dimension not set");
        debug_assert!(x < storage.size[0] && y < storage.size[1] && z < storage.size[2]);
        let pos = storage.index(x, y, z);
        storage.write_at(pos, value);
    }

    /// Overwrites one entire z-slice with native-endian bytes and marks
    /// it loaded.
    pub fn insert_slice(&mut self, z: usize, data: &[u8]) -> Result<()> {
        let storage = self.storage_mut()?;
        if z >= storage.size[2] {
            return Err(VolumeError::OutOfRange(format!(
                "z-index {} out of bounds (depth {})",
                z, storage.size[2]
            )));
        }
        let byte_length = storage.slice_bytes();
        if data.len() < byte_length {
            return Err(VolumeError::BufferTooSmall {
                expected: byte_length,
                actual: data.len(),
            });
        }
        let offset = byte_length * z;
        storage.data[offset..offset + byte_length].copy_from_slice(&data[..byte_length]);
        storage.loaded.insert(z);
        Ok(())
    }

    /// Returns a copy of one z-slice's raw bytes.
    pub fn slice_at(&self, z: usize) -> Result<Bytes> {
        let storage = self.storage()?;
        if z >= storage.size[2] {
            return Err(VolumeError::OutOfRange(format!(
                "z-index {} out of bounds (depth {})",
                z, storage.size[2]
            )));
        }
        let byte_length = storage.slice_bytes();
        let offset = byte_length * z;
        Ok(Bytes::copy_from_slice(
            &storage.data[offset..offset + byte_length],
        ))
    }

    /// Marks a z-slice as loaded without writing data (for callers that
    /// fill voxels individually).
    pub fn mark_slice_loaded(&mut self, z: usize) -> Result<()> {
        let storage = self.storage_mut()?;
        if z >= storage.size[2] {
            return Err(VolumeError::OutOfRange(format!(
                "z-index {} out of bounds (depth {})",
                z, storage.size[2]
            )));
        }
        storage.loaded.insert(z);
        Ok(())
    }

    /// Which z-slices have been written so far.
    pub fn loaded_slices(&self) -> Result<&RangeSet> {
        Ok(&self.storage()?.loaded)
    }

    pub fn is_fully_loaded(&self) -> bool {
        match &self.storage {
            Some(storage) => storage.loaded.len() == storage.size[2],
            None => false,
        }
    }

    /// Trilinear sample at floating-point coordinates.
    ///
    /// Returns 0 outside `[0, dim - 1]` on any axis. A coordinate exactly
    /// on the far edge is clamped into the last cell with fractional
    /// weight 1.0, so the sample never reads past the final voxel. Panics
    /// when the dimension is not set.
    pub fn sample_trilinear(&self, x: f64, y: f64, z: f64) -> f64 {
        let storage = self.storage.as_ref().expect("dimension not set");
        storage.sample_trilinear(x, y, z)
    }

    /// Scans the volume along an arbitrary plane, writing one rounded
    /// sample per output pixel in row-major order.
    ///
    /// `eu` and `ev` are per-output-pixel step vectors in index units:
    /// the walk starts at `origin`, advancing by `eu` per column and `ev`
    /// per row. Positions outside the volume produce 0 (and are never
    /// windowed). With a window, in-bounds samples are mapped to
    /// `[0, 255]` first.
    pub fn scan_oblique(
        &self,
        origin: DVec3,
        eu: DVec3,
        ev: DVec3,
        out_size: [usize; 2],
        out: &mut [f64],
        window: Option<Window>,
    ) -> Result<()> {
        let storage = self.storage()?;
        let [out_width, out_height] = out_size;
        if out.len() < out_width * out_height {
            return Err(VolumeError::BufferTooSmall {
                expected: out_width * out_height,
                actual: out.len(),
            });
        }

        let [rx, ry, rz] = storage.size;
        let x_end = (rx - 1) as f64;
        let y_end = (ry - 1) as f64;
        let z_end = (rz - 1) as f64;

        let mut offset = 0;
        let mut row_start = origin;
        for _ in 0..out_height {
            let mut pos = row_start;
            for _ in 0..out_width {
                let value = if pos.x >= 0.0
                    && pos.y >= 0.0
                    && pos.z >= 0.0
                    && pos.x <= x_end
                    && pos.y <= y_end
                    && pos.z <= z_end
                {
                    let sample = storage.sample_trilinear(pos.x, pos.y, pos.z);
                    match window {
                        Some(w) => w.apply(sample),
                        None => sample,
                    }
                } else {
                    0.0
                };
                out[offset] = value.round();
                offset += 1;
                pos += eu;
            }
            row_start += ev;
        }
        Ok(())
    }

    /// Convenience wrapper deriving the per-pixel steps from a section
    /// whose origin and axes are already in index units.
    pub fn scan_section(
        &self,
        section: &Section,
        out_size: [usize; 2],
        out: &mut [f64],
        window: Option<Window>,
    ) -> Result<()> {
        let eu = section.x_axis / out_size[0] as f64;
        let ev = section.y_axis / out_size[1] as f64;
        self.scan_oblique(section.origin, eu, ev, out_size, out, window)
    }

    /// Like [`scan_section`](Self::scan_section) for a section expressed
    /// in millimeters; requires the voxel size to be set.
    pub fn scan_section_mm(
        &self,
        section: &Section,
        out_size: [usize; 2],
        out: &mut [f64],
        window: Option<Window>,
    ) -> Result<()> {
        let voxel_size = self.voxel_size()?;
        self.scan_section(&section.to_index_space(voxel_size), out_size, out, window)
    }

    /// Produces a windowed orthogonal MPR image.
    ///
    /// Sagittal and coronal reconstructions read across every slice and
    /// require the volume to be fully loaded; axial reads only the target
    /// slice. The window falls back to the volume's default window.
    pub fn orthogonal_mpr(
        &self,
        axis: OrthogonalAxis,
        index: usize,
        window: Option<Window>,
    ) -> Result<MprImage> {
        let window = window
            .or(self.default_window)
            .ok_or(VolumeError::WindowRequired)?;
        let storage = self.storage()?;
        let [rx, ry, rz] = storage.size;

        let axis_len = match axis {
            OrthogonalAxis::Axial => rz,
            OrthogonalAxis::Sagittal => rx,
            OrthogonalAxis::Coronal => ry,
        };
        if index >= axis_len {
            return Err(VolumeError::OutOfRange(format!(
                "index {} out of bounds for {:?} axis (length {})",
                index, axis, axis_len
            )));
        }
        if !matches!(axis, OrthogonalAxis::Axial) && storage.loaded.len() != rz {
            return Err(VolumeError::NotLoaded(
                "volume must be fully loaded for sagittal/coronal reconstruction".to_string(),
            ));
        }

        match axis {
            OrthogonalAxis::Axial => {
                let mut pixels = Vec::with_capacity(rx * ry);
                for y in 0..ry {
                    for x in 0..rx {
                        pixels.push(window.apply(storage.read_at(storage.index(x, y, index))) as u8);
                    }
                }
                Ok(MprImage {
                    pixels,
                    width: rx,
                    height: ry,
                })
            }
            OrthogonalAxis::Sagittal => {
                let mut pixels = Vec::with_capacity(ry * rz);
                for z in 0..rz {
                    for y in 0..ry {
                        pixels.push(window.apply(storage.read_at(storage.index(index, y, z))) as u8);
                    }
                }
                Ok(MprImage {
                    pixels,
                    width: ry,
                    height: rz,
                })
            }
            OrthogonalAxis::Coronal => {
                let mut pixels = Vec::with_capacity(rx * rz);
                for z in 0..rz {
                    for x in 0..rx {
                        pixels.push(window.apply(storage.read_at(storage.index(x, index, z))) as u8);
                    }
                }
                Ok(MprImage {
                    pixels,
                    width: rx,
                    height: rz,
                })
            }
        }
    }

    /// Fills the entire volume with one value.
    pub fn fill(&mut self, value: f64) -> Result<()> {
        let whole = self.whole_box()?;
        self.fill_region(&whole, value)
    }

    /// Fills the entire volume from a generator over voxel coordinates.
    pub fn fill_with(&mut self, f: impl Fn(usize, usize, usize) -> f64) -> Result<()> {
        let whole = self.whole_box()?;
        self.fill_region_with(&whole, f)
    }

    /// Fills a region with one value; the region is clamped to the
    /// volume bounds.
    pub fn fill_region(&mut self, region: &IndexBox, value: f64) -> Result<()> {
        self.fill_region_with(region, |_, _, _| value)
    }

    /// Fills a region from a generator; the generator receives absolute
    /// voxel coordinates.
    pub fn fill_region_with(
        &mut self,
        region: &IndexBox,
        f: impl Fn(usize, usize, usize) -> f64,
    ) -> Result<()> {
        let storage = self.storage_mut()?;
        let [xr, yr, zr] = clamp_box(region, storage.size);
        for z in zr[0]..zr[1] {
            for y in yr[0]..yr[1] {
                for x in xr[0]..xr[1] {
                    let pos = storage.index(x, y, z);
                    storage.write_at(pos, f(x, y, z));
                }
            }
        }
        Ok(())
    }

    /// Copies voxels from `src`, reading through the source accessor and
    /// writing through this volume's, so values convert implicitly
    /// between pixel formats.
    ///
    /// `src_box` defaults to the whole source; `dest_offset` is where the
    /// box's origin lands in this volume and may be negative. The copied
    /// range is clamped to both volumes.
    pub fn copy_region(
        &mut self,
        src: &VoxelVolume,
        src_box: Option<IndexBox>,
        dest_offset: [i32; 3],
    ) -> Result<()> {
        let src_storage = src.storage()?;
        let src_dim = src_storage.size;
        let src_box = src_box.unwrap_or(IndexBox::new(
            [0, 0, 0],
            [src_dim[0] as i32, src_dim[1] as i32, src_dim[2] as i32],
        ));
        let dst = self.storage_mut()?;

        // per-axis half-open range of box-local coordinates that stay
        // inside both volumes
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for axis in 0..3 {
            let off = i64::from(dest_offset[axis]);
            let so = i64::from(src_box.origin[axis]);
            let min = 0i64.max(-off).max(-so);
            let max = i64::from(src_box.size[axis])
                .min(dst.size[axis] as i64 - off)
                .min(src_dim[axis] as i64 - so);
            lo[axis] = min.max(0) as usize;
            hi[axis] = max.max(min) as usize;
        }

        let so = src_box.origin;
        let off = dest_offset;
        for z in lo[2]..hi[2] {
            for y in lo[1]..hi[1] {
                for x in lo[0]..hi[0] {
                    let sx = (so[0] as i64 + x as i64) as usize;
                    let sy = (so[1] as i64 + y as i64) as usize;
                    let sz = (so[2] as i64 + z as i64) as usize;
                    let value = src_storage.read_at(src_storage.index(sx, sy, sz));

                    let dx = (off[0] as i64 + x as i64) as usize;
                    let dy = (off[1] as i64 + y as i64) as usize;
                    let dz = (off[2] as i64 + z as i64) as usize;
                    let pos = dst.index(dx, dy, dz);
                    dst.write_at(pos, value);
                }
            }
        }
        Ok(())
    }

    /// Re-encodes every voxel into `format` on a fresh buffer and swaps
    /// it in.
    pub fn convert(&mut self, format: PixelFormat) -> Result<()> {
        self.convert_with(format, |v| v)
    }

    /// Like [`convert`](Self::convert), mapping each value through
    /// `mapper` first.
    pub fn convert_with(&mut self, format: PixelFormat, mapper: impl Fn(f64) -> f64) -> Result<()> {
        let storage = self.storage_mut()?;
        let [rx, ry, rz] = storage.size;
        if format.is_bit_packed() && (rx * ry) % 8 != 0 {
            return Err(VolumeError::FormatConstraintViolation(
                "slice area of a bit-packed volume must be a multiple of 8 voxels".to_string(),
            ));
        }

        let voxels = rx * ry * rz;
        let (read, write) = format.accessor();
        let mut data = vec![0u8; format.byte_length(voxels)];
        for pos in 0..voxels {
            write(&mut data, pos, mapper(storage.read_at(pos)));
        }

        storage.format = format;
        storage.data = data;
        storage.read = read;
        storage.write = write;
        Ok(())
    }

    /// Reallocates the volume to a new index-space bounding box, keeping
    /// the voxels covered by both the old and new boxes.
    ///
    /// `new_box` is expressed in the current index space; the voxel at
    /// `new_box.origin` ends up at the new origin. Loaded-slice tracking
    /// resets.
    pub fn transform_bounding_box(&mut self, new_box: &IndexBox) -> Result<()> {
        let format = self.storage()?.format;
        if new_box.size.iter().any(|&v| v <= 0) {
            return Err(VolumeError::InvalidDimension(format!(
                "bounding box size must be positive, got {:?}",
                new_box.size
            )));
        }

        let mut next = VoxelVolume::new().with_voxel_limit(self.voxel_limit);
        next.set_dimension(
            new_box.size[0] as usize,
            new_box.size[1] as usize,
            new_box.size[2] as usize,
            format,
        )?;
        next.copy_region(
            self,
            None,
            [
                -new_box.origin[0],
                -new_box.origin[1],
                -new_box.origin[2],
            ],
        )?;
        self.storage = next.storage;
        Ok(())
    }

    /// Smallest index box containing every non-zero voxel, or `None` for
    /// an all-zero volume.
    pub fn bounding_box_of_nonzero(&self) -> Result<Option<IndexBox>> {
        let storage = self.storage()?;
        let [rx, ry, rz] = storage.size;
        let mut min = [usize::MAX; 3];
        let mut max = [0usize; 3];
        let mut found = false;

        for z in 0..rz {
            for y in 0..ry {
                for x in 0..rx {
                    if storage.read_at(storage.index(x, y, z)) != 0.0 {
                        found = true;
                        min = [min[0].min(x), min[1].min(y), min[2].min(z)];
                        max = [max[0].max(x), max[1].max(y), max[2].max(z)];
                    }
                }
            }
        }

        if !found {
            return Ok(None);
        }
        Ok(Some(IndexBox::new(
            [min[0] as i32, min[1] as i32, min[2] as i32],
            [
                (max[0] - min[0] + 1) as i32,
                (max[1] - min[1] + 1) as i32,
                (max[2] - min[2] + 1) as i32,
            ],
        )))
    }

    /// Read-only metadata snapshot for the serving layer.
    pub fn metadata(&self) -> Result<VolumeMetadata> {
        let storage = self.storage()?;
        Ok(VolumeMetadata {
            voxel_count: storage.size,
            voxel_size: self.voxel_size,
            pixel_format: storage.format,
            default_window: self.default_window,
            loaded_ranges: storage.loaded.ranges().to_vec(),
        })
    }

    fn whole_box(&self) -> Result<IndexBox> {
        let [x, y, z] = self.dimension()?;
        Ok(IndexBox::new([0, 0, 0], [x as i32, y as i32, z as i32]))
    }
}

/// Clamps an index box to `size`, producing per-axis half-open ranges.
fn clamp_box(region: &IndexBox, size: [usize; 3]) -> [[usize; 2]; 3] {
    let mut out = [[0usize; 2]; 3];
    for axis in 0..3 {
        let start = region.origin[axis].max(0) as usize;
        let end = (i64::from(region.origin[axis]) + i64::from(region.size[axis]))
            .clamp(0, size[axis] as i64) as usize;
        let start = start.min(size[axis]);
        out[axis] = [start, end.max(start)];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::typed_data_to_bytes;
    use approx::assert_relative_eq;

    fn volume(x: usize, y: usize, z: usize, format: PixelFormat) -> VoxelVolume {
        let mut v = VoxelVolume::new();
        v.set_dimension(x, y, z, format).unwrap();
        v
    }

    #[test]
    fn test_binary_slice_bit_pattern() {
        let mut v = volume(8, 8, 8, PixelFormat::Binary);
        let mut slice = [0u8; 8]; // 64 bits in a slice
        slice[0] = 0xAA; // 0b10101010
        v.insert_slice(0, &slice).unwrap();
        assert_eq!(v.voxel_at(0, 0, 0), 1.0);
        assert_eq!(v.voxel_at(1, 0, 0), 0.0);
        assert_eq!(v.voxel_at(2, 0, 0), 1.0);
        assert_eq!(v.voxel_at(3, 0, 0), 0.0);
    }

    fn read_write_round_trip(format: PixelFormat, w: usize, h: usize, d: usize) {
        let mut v = volume(w, h, d, format);
        let lo = format.min_value() as i64;
        let hi = format.max_value() as i64;
        let span = hi - lo + 1;
        let expected = |x: usize, y: usize, z: usize| ((x + y + z) as i64 % span + lo) as f64;

        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    v.write_voxel(expected(x, y, z), x, y, z);
                }
            }
        }
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    assert_eq!(v.voxel_at(x, y, z), expected(x, y, z));
                }
            }
        }
    }

    #[test]
    fn test_read_write_uint8() {
        read_write_round_trip(PixelFormat::UInt8, 32, 32, 10);
    }

    #[test]
    fn test_read_write_int8() {
        read_write_round_trip(PixelFormat::Int8, 32, 32, 10);
    }

    #[test]
    fn test_read_write_uint16() {
        read_write_round_trip(PixelFormat::UInt16, 32, 32, 10);
    }

    #[test]
    fn test_read_write_int16() {
        read_write_round_trip(PixelFormat::Int16, 32, 32, 10);
    }

    #[test]
    fn test_read_write_binary() {
        read_write_round_trip(PixelFormat::Binary, 32, 32, 10);
    }

    #[test]
    fn test_set_dimension_rejects_zero_axis() {
        let mut v = VoxelVolume::new();
        assert!(matches!(
            v.set_dimension(0, 8, 8, PixelFormat::UInt8),
            Err(VolumeError::InvalidDimension(_))
        ));
    }

    #[test]
    fn test_set_dimension_rejects_second_call() {
        let mut v = volume(4, 4, 4, PixelFormat::UInt8);
        assert_eq!(
            v.set_dimension(4, 4, 4, PixelFormat::UInt8),
            Err(VolumeError::AlreadyInitialized)
        );
    }

    #[test]
    fn test_set_dimension_rejects_unaligned_binary_slice() {
        let mut v = VoxelVolume::new();
        assert!(matches!(
            v.set_dimension(3, 3, 4, PixelFormat::Binary),
            Err(VolumeError::FormatConstraintViolation(_))
        ));
    }

    #[test]
    fn test_set_dimension_enforces_voxel_limit() {
        let mut v = VoxelVolume::new().with_voxel_limit(100);
        assert_eq!(
            v.set_dimension(10, 10, 2, PixelFormat::UInt8),
            Err(VolumeError::LimitExceeded {
                voxels: 200,
                limit: 100
            })
        );
    }

    #[test]
    fn test_insert_slice_errors() {
        let mut v = volume(4, 4, 4, PixelFormat::UInt8);
        assert!(matches!(
            v.insert_slice(4, &[0u8; 16]),
            Err(VolumeError::OutOfRange(_))
        ));
        assert_eq!(
            v.insert_slice(0, &[0u8; 15]),
            Err(VolumeError::BufferTooSmall {
                expected: 16,
                actual: 15
            })
        );
    }

    #[test]
    fn test_insert_slice_tracks_loading() {
        let mut v = volume(4, 4, 3, PixelFormat::UInt8);
        assert!(!v.is_fully_loaded());
        v.insert_slice(0, &[1u8; 16]).unwrap();
        v.insert_slice(2, &[3u8; 16]).unwrap();
        assert_eq!(v.loaded_slices().unwrap().ranges(), &[(0, 0), (2, 2)]);
        assert!(!v.is_fully_loaded());
        v.insert_slice(1, &[2u8; 16]).unwrap();
        assert!(v.is_fully_loaded());
        assert_eq!(v.voxel_at(0, 0, 1), 2.0);
    }

    #[test]
    fn test_slice_at_returns_inserted_bytes() {
        let mut v = volume(4, 4, 2, PixelFormat::UInt16);
        let values: Vec<u16> = (0..16).map(|i| i * 100).collect();
        let bytes = typed_data_to_bytes(&values);
        v.insert_slice(1, &bytes).unwrap();
        assert_eq!(&v.slice_at(1).unwrap()[..], &bytes[..]);
        assert_eq!(v.voxel_at(3, 0, 1), 300.0);
    }

    #[test]
    fn test_trilinear_matches_grid_points() {
        let mut v = volume(4, 4, 4, PixelFormat::UInt8);
        v.fill_with(|x, y, z| (x * 16 + y * 4 + z) as f64).unwrap();
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    assert_eq!(
                        v.sample_trilinear(x as f64, y as f64, z as f64),
                        v.voxel_at(x, y, z)
                    );
                }
            }
        }
    }

    #[test]
    fn test_trilinear_outside_returns_zero() {
        let mut v = volume(4, 4, 4, PixelFormat::UInt8);
        v.fill(200.0).unwrap();
        assert_eq!(v.sample_trilinear(-0.001, 0.0, 0.0), 0.0);
        assert_eq!(v.sample_trilinear(0.0, 3.001, 0.0), 0.0);
        assert_eq!(v.sample_trilinear(0.0, 0.0, 4.0), 0.0);
    }

    #[test]
    fn test_trilinear_midpoint() {
        let mut v = volume(2, 2, 2, PixelFormat::UInt8);
        v.fill_with(|x, y, z| ((x + y + z) * 10) as f64).unwrap();
        // average of the 8 surrounding voxels: 10 * (0+1+1+1+2+2+2+3) / 8
        assert_relative_eq!(v.sample_trilinear(0.5, 0.5, 0.5), 15.0);
    }

    #[test]
    fn test_trilinear_far_edge_clamps_into_last_cell() {
        let mut v = volume(3, 3, 3, PixelFormat::UInt8);
        v.fill_with(|x, _, _| (x * 100) as f64).unwrap();
        // exactly on the far x edge: last cell with fractional weight 1.0
        assert_relative_eq!(v.sample_trilinear(2.0, 1.0, 1.0), 200.0);
        assert_relative_eq!(v.sample_trilinear(1.5, 1.0, 1.0), 150.0);
    }

    #[test]
    fn test_scan_oblique_axial_identity() {
        let mut v = volume(8, 8, 4, PixelFormat::UInt8);
        v.fill_with(|x, y, z| ((x + y * 8 + z) % 256) as f64).unwrap();

        let mut out = vec![0.0; 64];
        v.scan_oblique(
            DVec3::new(0.0, 0.0, 2.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            [8, 8],
            &mut out,
            None,
        )
        .unwrap();

        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(out[y * 8 + x], v.voxel_at(x, y, 2));
            }
        }
    }

    #[test]
    fn test_scan_oblique_out_of_volume_writes_zero() {
        let mut v = volume(4, 4, 4, PixelFormat::UInt8);
        v.fill(9.0).unwrap();
        let mut out = vec![0.0; 8 * 4];
        // walks off the +x edge halfway through each row
        v.scan_oblique(
            DVec3::ZERO,
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            [8, 4],
            &mut out,
            None,
        )
        .unwrap();
        assert_eq!(out[0], 9.0);
        assert_eq!(out[3], 9.0);
        assert_eq!(out[4], 0.0);
        assert_eq!(out[7], 0.0);
    }

    #[test]
    fn test_scan_section_with_window() {
        let mut v = volume(4, 4, 4, PixelFormat::UInt16);
        v.fill(1000.0).unwrap();
        let section = Section::new(
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(4.0, 0.0, 0.0),
            DVec3::new(0.0, 4.0, 0.0),
        );
        let mut out = vec![0.0; 16];
        v.scan_section(&section, [4, 4], &mut out, Some(Window::new(2000.0, 1000.0)))
            .unwrap();
        // 1000 sits exactly at the window level
        assert_eq!(out[0], 128.0);
    }

    #[test]
    fn test_scan_section_mm_converts_through_voxel_size() {
        let mut v = volume(8, 8, 4, PixelFormat::UInt8);
        v.set_voxel_size(0.5, 0.5, 2.0);
        v.fill_with(|x, y, z| (x + y + z) as f64).unwrap();

        // an axial plane at z index 2 expressed in millimeters
        let section = Section::new(
            DVec3::new(0.0, 0.0, 4.0),
            DVec3::new(4.0, 0.0, 0.0),
            DVec3::new(0.0, 4.0, 0.0),
        );
        let mut out = vec![0.0; 64];
        v.scan_section_mm(&section, [8, 8], &mut out, None).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(out[y * 8 + x], v.voxel_at(x, y, 2));
            }
        }
    }

    #[test]
    fn test_scan_rejects_short_buffer() {
        let v = volume(4, 4, 4, PixelFormat::UInt8);
        let mut out = vec![0.0; 15];
        assert!(matches!(
            v.scan_oblique(
                DVec3::ZERO,
                DVec3::new(1.0, 0.0, 0.0),
                DVec3::new(0.0, 1.0, 0.0),
                [4, 4],
                &mut out,
                None
            ),
            Err(VolumeError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_orthogonal_mpr_axial() {
        let mut v = volume(4, 4, 2, PixelFormat::UInt16);
        v.fill_with(|x, y, z| ((x + y * 4 + z * 16) * 10) as f64).unwrap();
        let image = v
            .orthogonal_mpr(OrthogonalAxis::Axial, 1, Some(Window::new(400.0, 200.0)))
            .unwrap();
        assert_eq!((image.width, image.height), (4, 4));
        // voxel (0,0,1) = 160 -> (160 - 200 + 200) * 255/400
        assert_eq!(image.pixels[0], 102);
    }

    #[test]
    fn test_orthogonal_mpr_requires_full_load_across_slices() {
        let mut v = volume(4, 4, 4, PixelFormat::UInt8);
        v.insert_slice(0, &[0u8; 16]).unwrap();
        let err = v
            .orthogonal_mpr(OrthogonalAxis::Sagittal, 0, Some(Window::new(256.0, 128.0)))
            .unwrap_err();
        assert!(matches!(err, VolumeError::NotLoaded(_)));

        // axial needs only its own slice
        assert!(v
            .orthogonal_mpr(OrthogonalAxis::Axial, 0, Some(Window::new(256.0, 128.0)))
            .is_ok());
    }

    #[test]
    fn test_orthogonal_mpr_window_fallback() {
        let mut v = volume(4, 4, 1, PixelFormat::UInt8);
        assert_eq!(
            v.orthogonal_mpr(OrthogonalAxis::Axial, 0, None),
            Err(VolumeError::WindowRequired)
        );
        v.set_default_window(Window::new(256.0, 128.0));
        assert!(v.orthogonal_mpr(OrthogonalAxis::Axial, 0, None).is_ok());
    }

    #[test]
    fn test_fill_region_clamps_to_volume() {
        let mut v = volume(4, 4, 4, PixelFormat::UInt8);
        v.fill_region(&IndexBox::new([2, 2, -1], [10, 1, 3]), 7.0)
            .unwrap();
        assert_eq!(v.voxel_at(2, 2, 0), 7.0);
        assert_eq!(v.voxel_at(3, 2, 1), 7.0);
        assert_eq!(v.voxel_at(1, 2, 0), 0.0);
        assert_eq!(v.voxel_at(2, 3, 0), 0.0);
        assert_eq!(v.voxel_at(2, 2, 2), 0.0);
    }

    #[test]
    fn test_copy_region_with_offset_and_conversion() {
        let mut src = volume(4, 4, 4, PixelFormat::UInt16);
        src.fill_with(|x, _, _| (x * 100) as f64).unwrap();

        let mut dst = volume(4, 4, 4, PixelFormat::UInt8);
        dst.copy_region(&src, None, [1, 0, 0]).unwrap();

        assert_eq!(dst.voxel_at(1, 0, 0), 0.0);
        assert_eq!(dst.voxel_at(2, 0, 0), 100.0);
        // 300 saturates in the destination format
        assert_eq!(dst.voxel_at(3, 1, 2), 200.0);
        let mut dst2 = volume(4, 4, 4, PixelFormat::UInt8);
        dst2.copy_region(&src, None, [0, 0, 0]).unwrap();
        assert_eq!(dst2.voxel_at(3, 0, 0), 255.0);
    }

    #[test]
    fn test_copy_region_negative_offset() {
        let mut src = volume(4, 4, 4, PixelFormat::UInt8);
        src.fill_with(|x, y, z| (x + y + z) as f64).unwrap();
        let mut dst = volume(4, 4, 4, PixelFormat::UInt8);
        dst.copy_region(&src, None, [-2, 0, 0]).unwrap();
        assert_eq!(dst.voxel_at(0, 0, 0), 2.0);
        assert_eq!(dst.voxel_at(1, 1, 1), 5.0);
        assert_eq!(dst.voxel_at(3, 0, 0), 0.0);
    }

    #[test]
    fn test_convert_round_trip_same_bit_width() {
        let mut v = volume(4, 4, 4, PixelFormat::UInt16);
        v.fill_with(|x, y, z| ((x + y + z) * 100) as f64).unwrap();
        let original: Vec<f64> = (0..4)
            .flat_map(|z| (0..4).flat_map(move |y| (0..4).map(move |x| ((x + y + z) * 100) as f64)))
            .collect();

        v.convert(PixelFormat::Int16).unwrap();
        assert_eq!(v.pixel_format().unwrap(), PixelFormat::Int16);
        v.convert(PixelFormat::UInt16).unwrap();

        let mut i = 0;
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    assert_eq!(v.voxel_at(x, y, z), original[i]);
                    i += 1;
                }
            }
        }
    }

    #[test]
    fn test_convert_with_mapper() {
        let mut v = volume(2, 2, 2, PixelFormat::UInt16);
        v.fill(1000.0).unwrap();
        v.convert_with(PixelFormat::UInt8, |value| value / 10.0).unwrap();
        assert_eq!(v.voxel_at(0, 0, 0), 100.0);
        assert_eq!(v.data_size().unwrap(), 8);
    }

    #[test]
    fn test_convert_rejects_unaligned_binary() {
        let mut v = volume(3, 3, 2, PixelFormat::UInt8);
        assert!(matches!(
            v.convert(PixelFormat::Binary),
            Err(VolumeError::FormatConstraintViolation(_))
        ));
    }

    #[test]
    fn test_transform_bounding_box() {
        let mut v = volume(4, 4, 4, PixelFormat::UInt8);
        v.fill_with(|x, y, z| (x + y * 4 + z * 16) as f64).unwrap();
        v.transform_bounding_box(&IndexBox::new([1, 1, 1], [2, 2, 2]))
            .unwrap();
        assert_eq!(v.dimension().unwrap(), [2, 2, 2]);
        assert_eq!(v.voxel_at(0, 0, 0), 1.0 + 4.0 + 16.0);
        assert_eq!(v.voxel_at(1, 1, 1), 2.0 + 8.0 + 32.0);
    }

    #[test]
    fn test_bounding_box_of_nonzero() {
        let mut v = volume(8, 8, 8, PixelFormat::UInt8);
        assert_eq!(v.bounding_box_of_nonzero().unwrap(), None);
        v.write_voxel(1.0, 2, 3, 4);
        v.write_voxel(1.0, 5, 3, 6);
        assert_eq!(
            v.bounding_box_of_nonzero().unwrap(),
            Some(IndexBox::new([2, 3, 4], [4, 1, 3]))
        );
    }

    #[test]
    fn test_metadata_snapshot() {
        let mut v = volume(8, 8, 4, PixelFormat::Int16);
        v.set_voxel_size(0.5, 0.5, 1.25);
        v.set_default_window(Window::new(400.0, 40.0));
        v.insert_slice(0, &[0u8; 128]).unwrap();

        let metadata = v.metadata().unwrap();
        assert_eq!(metadata.voxel_count, [8, 8, 4]);
        assert_eq!(metadata.pixel_format, PixelFormat::Int16);
        assert_eq!(metadata.loaded_ranges, vec![(0, 0)]);
        assert!(serde_json::to_string(&metadata).unwrap().contains("Int16"));
    }

    #[test]
    fn test_accessors_before_dimension() {
        let v = VoxelVolume::new();
        assert_eq!(v.dimension(), Err(VolumeError::DimensionNotSet));
        assert_eq!(v.data_size(), Err(VolumeError::DimensionNotSet));
        assert!(!v.is_fully_loaded());
    }
}
