//! Utility functions

use crate::error::{CubeError, Result};
use std::mem;

/// Convert raw bytes to typed data
pub fn bytes_to_typed_data<T: Copy>(bytes: &[u8]) -> Result<Vec<T>> {
    if bytes.len() % mem::size_of::<T>() != 0 {
        return Err(CubeError::Parse(
            "Byte length not aligned with element type size".to_string(),
        ));
    }

    let count = bytes.len() / mem::size_of::<T>();
    let mut data = Vec::with_capacity(count);

    unsafe {
        let ptr = bytes.as_ptr() as *const T;
        for i in 0..count {
            data.push(ptr.add(i).read_unaligned());
        }
    }

    Ok(data)
}

/// Convert typed data to raw bytes
pub fn typed_data_to_bytes<T: Copy>(data: &[T]) -> Vec<u8> {
    let byte_len = std::mem::size_of_val(data);
    let mut bytes = Vec::with_capacity(byte_len);

    unsafe {
        let ptr = data.as_ptr() as *const u8;
        for i in 0..byte_len {
            bytes.push(*ptr.add(i));
        }
    }

    bytes
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Table name for one fragment of a datacube
pub fn fragment_table(datacube: &str, relative_index: u64) -> String {
    format!("fact_{}_{}", datacube, relative_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_conversion() {
        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let bytes = typed_data_to_bytes(&data);
        assert_eq!(bytes.len(), data.len() * 4);

        let recovered: Vec<f32> = bytes_to_typed_data(&bytes).unwrap();
        assert_eq!(data, recovered);
    }

    #[test]
    fn test_misaligned_bytes_rejected() {
        let bytes = [0u8; 7];
        assert!(bytes_to_typed_data::<f64>(&bytes).is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_fragment_table() {
        assert_eq!(fragment_table("tos", 3), "fact_tos_3");
    }
}
