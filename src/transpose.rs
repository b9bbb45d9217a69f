//! Buffer transposition between a source axis layout and canonical order
//!
//! The destination buffer is addressed by the canonical axis order (outermost
//! axis varies slowest). A recursive odometer over the axis limits computes,
//! for every destination position, the matching flat element offset in the
//! source as the dot product of the counters with the source strides, then
//! copies one element. Cost is the full product of the limits; the engine is
//! invoked once per fragment or cache block, never per row.

use crate::error::{CubeError, Result};

/// Element strides of the canonical axes inside the source's native layout
///
/// `limits` are the axis limits in canonical order; `source_order[j]` names
/// the canonical axis sitting at position `j` of the source layout, outermost
/// first. The stride of a canonical axis is the product of the limits of all
/// axes that vary faster than it in the source.
pub fn source_strides(limits: &[u64], source_order: &[usize]) -> Result<Vec<u64>> {
    if source_order.len() != limits.len() {
        return Err(CubeError::InvalidDimensions(format!(
            "source order rank {} does not match limit rank {}",
            source_order.len(),
            limits.len()
        )));
    }
    let mut strides = vec![0u64; limits.len()];
    let mut stride = 1u64;
    for &axis in source_order.iter().rev() {
        if axis >= limits.len() || strides[axis] != 0 {
            return Err(CubeError::InvalidDimensions(format!(
                "source order is not a permutation of 0..{}",
                limits.len()
            )));
        }
        strides[axis] = stride;
        stride *= limits[axis];
    }
    Ok(strides)
}

/// Canonical row-major strides; reordering with these is the identity
pub fn canonical_strides(limits: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; limits.len()];
    for i in (0..limits.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * limits[i + 1];
    }
    strides
}

/// Permute `src` into canonical axis order
///
/// `src` holds `Π limits` elements of `element_size` bytes addressed by the
/// source layout described by `strides` (in elements). The returned buffer is
/// addressed by canonical order.
pub fn reorder(
    src: &[u8],
    limits: &[u64],
    strides: &[u64],
    element_size: usize,
) -> Result<Vec<u8>> {
    if element_size == 0 {
        return Err(CubeError::InvalidDimensions(
            "element size must be positive".to_string(),
        ));
    }
    if limits.len() != strides.len() {
        return Err(CubeError::InvalidDimensions(format!(
            "limit rank {} does not match stride rank {}",
            limits.len(),
            strides.len()
        )));
    }
    if limits.iter().any(|&limit| limit == 0) {
        return Err(CubeError::InvalidDimensions(
            "axis limits must be positive".to_string(),
        ));
    }
    let total: u64 = limits.iter().product();
    let expected = total as usize * element_size;
    if src.len() != expected {
        return Err(CubeError::ShapeMismatch {
            expected: total as usize,
            actual: src.len() / element_size,
        });
    }
    let reach: u64 = limits
        .iter()
        .zip(strides.iter())
        .map(|(limit, stride)| (limit - 1) * stride)
        .sum();
    if total > 0 && reach >= total {
        return Err(CubeError::OutOfRange(format!(
            "strides address element {} in a buffer of {}",
            reach, total
        )));
    }

    let mut dest = Vec::new();
    dest.try_reserve_exact(expected)?;
    copy_axis(src, &mut dest, limits, strides, element_size, 0);
    Ok(dest)
}

fn copy_axis(
    src: &[u8],
    dest: &mut Vec<u8>,
    limits: &[u64],
    strides: &[u64],
    element_size: usize,
    base: u64,
) {
    match limits {
        [] => {
            let offset = base as usize * element_size;
            dest.extend_from_slice(&src[offset..offset + element_size]);
        }
        [limit, rest @ ..] => {
            for counter in 0..*limit {
                copy_axis(
                    src,
                    dest,
                    rest,
                    &strides[1..],
                    element_size,
                    base + counter * strides[0],
                );
            }
        }
    }
}
