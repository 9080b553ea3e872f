//! Small helpers for byte buffers and log formatting

use crate::error::{Result, VolumeError};

/// Reinterprets a typed slice as raw bytes in the machine's native byte
/// order, e.g. for building slice buffers to insert into a volume.
pub fn typed_data_to_bytes<T: bytemuck::NoUninit>(data: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(data).to_vec()
}

/// Reinterprets native-endian bytes as typed values. Fails when the byte
/// length is not a multiple of the value size.
pub fn bytes_to_typed_data<T: bytemuck::AnyBitPattern>(bytes: &[u8]) -> Result<Vec<T>> {
    bytemuck::try_cast_slice(bytes)
        .map(|slice: &[T]| slice.to_vec())
        .map_err(|e| VolumeError::InvalidData(e.to_string()))
}

/// Formats a byte count in human-readable form for log messages.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}
