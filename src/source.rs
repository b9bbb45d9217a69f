//! Typed source-array handles supplied by format-specific readers
//!
//! The import engine needs exactly one capability from any scientific-format
//! backend: hand over the dimension descriptors in the file's native axis
//! order and read an arbitrary hyper-rectangle of elements in that order.
//! NetCDF, FITS or SAC style readers adapt to [`ArraySource`];
//! [`MemoryArraySource`] is the in-crate implementation over an
//! [`ndarray::ArrayD`], used by tests and demos.

use crate::error::{CubeError, Result};
use crate::types::{DimensionDescriptor, ElementType};
use crate::utils::typed_data_to_bytes;
use ndarray::{ArrayD, Slice};

/// Marker trait tying a Rust scalar to its wire element type
pub trait Element: Copy + Send + Sync + 'static {
    const ELEMENT_TYPE: ElementType;
}

impl Element for i8 {
    const ELEMENT_TYPE: ElementType = ElementType::Byte;
}

impl Element for i16 {
    const ELEMENT_TYPE: ElementType = ElementType::Short;
}

impl Element for i32 {
    const ELEMENT_TYPE: ElementType = ElementType::Int;
}

impl Element for i64 {
    const ELEMENT_TYPE: ElementType = ElementType::Long;
}

impl Element for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::Float;
}

impl Element for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::Double;
}

/// A shaped, typed source array open for block reads
pub trait ArraySource: Send + Sync {
    /// Element type of the measure
    fn element_type(&self) -> ElementType;

    /// Dimension descriptors in the source's native axis order
    fn dimensions(&self) -> &[DimensionDescriptor];

    /// Read the hyper-rectangle `[origin, origin + shape)` into `out`
    ///
    /// `origin` is 0-based absolute source indices in native axis order; the
    /// buffer is cleared and filled in native row-major order.
    fn read_block(&self, origin: &[u64], shape: &[u64], out: &mut Vec<u8>) -> Result<()>;
}

/// In-memory source array backed by an `ndarray::ArrayD`
pub struct MemoryArraySource<A: Element> {
    data: ArrayD<A>,
    dimensions: Vec<DimensionDescriptor>,
}

impl<A: Element> MemoryArraySource<A> {
    /// Wrap an array, checking that descriptors match its shape axis by axis
    pub fn new(data: ArrayD<A>, dimensions: Vec<DimensionDescriptor>) -> Result<Self> {
        if data.ndim() != dimensions.len() {
            return Err(CubeError::InvalidDimensions(format!(
                "array rank {} does not match {} descriptors",
                data.ndim(),
                dimensions.len()
            )));
        }
        for (axis, dim) in dimensions.iter().enumerate() {
            if data.shape()[axis] as u64 != dim.size {
                return Err(CubeError::InvalidDimensions(format!(
                    "dimension {:?} declares length {} but axis {} has {}",
                    dim.name,
                    dim.size,
                    axis,
                    data.shape()[axis]
                )));
            }
        }
        Ok(Self { data, dimensions })
    }
}

impl<A: Element> ArraySource for MemoryArraySource<A> {
    fn element_type(&self) -> ElementType {
        A::ELEMENT_TYPE
    }

    fn dimensions(&self) -> &[DimensionDescriptor] {
        &self.dimensions
    }

    fn read_block(&self, origin: &[u64], shape: &[u64], out: &mut Vec<u8>) -> Result<()> {
        if origin.len() != self.data.ndim() || shape.len() != self.data.ndim() {
            return Err(CubeError::InvalidDimensions(format!(
                "block rank {} does not match array rank {}",
                origin.len(),
                self.data.ndim()
            )));
        }
        for axis in 0..origin.len() {
            if origin[axis] + shape[axis] > self.data.shape()[axis] as u64 {
                return Err(CubeError::OutOfRange(format!(
                    "block [{}, {}) outside axis {} of length {}",
                    origin[axis],
                    origin[axis] + shape[axis],
                    axis,
                    self.data.shape()[axis]
                )));
            }
        }

        let view = self.data.slice_each_axis(|ax| {
            let axis = ax.axis.index();
            Slice::from(origin[axis] as usize..(origin[axis] + shape[axis]) as usize)
        });
        let elements: Vec<A> = view.iter().copied().collect();
        out.clear();
        out.extend_from_slice(&typed_data_to_bytes(&elements));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn descriptor(name: &str, size: u64, explicit: bool, level: u16) -> DimensionDescriptor {
        DimensionDescriptor::new(name, ElementType::Double, size, explicit, level, 0, size - 1)
            .unwrap()
    }

    fn sample_source() -> MemoryArraySource<f64> {
        let data = Array::from_iter((0..24).map(f64::from))
            .into_shape_with_order(vec![2, 3, 4])
            .unwrap();
        let dims = vec![
            descriptor("lat", 2, true, 1),
            descriptor("lon", 3, true, 2),
            descriptor("time", 4, false, 1),
        ];
        MemoryArraySource::new(data, dims).unwrap()
    }

    #[test]
    fn test_shape_validation() {
        let data = Array::from_iter((0..6).map(f64::from))
            .into_shape_with_order(vec![2, 3])
            .unwrap();
        let dims = vec![descriptor("lat", 2, true, 1), descriptor("lon", 4, true, 2)];
        assert!(MemoryArraySource::new(data, dims).is_err());
    }

    #[test]
    fn test_read_block_native_order() {
        let source = sample_source();
        let mut out = Vec::new();
        source.read_block(&[1, 2, 0], &[1, 1, 4], &mut out).unwrap();
        let values: Vec<f64> = crate::utils::bytes_to_typed_data(&out).unwrap();
        assert_eq!(values, vec![20.0, 21.0, 22.0, 23.0]);
    }

    #[test]
    fn test_read_block_spans_axes() {
        let source = sample_source();
        let mut out = Vec::new();
        source.read_block(&[0, 1, 1], &[2, 2, 2], &mut out).unwrap();
        let values: Vec<f64> = crate::utils::bytes_to_typed_data(&out).unwrap();
        assert_eq!(values, vec![5.0, 6.0, 9.0, 10.0, 17.0, 18.0, 21.0, 22.0]);
    }

    #[test]
    fn test_read_block_bounds() {
        let source = sample_source();
        let mut out = Vec::new();
        assert!(source.read_block(&[1, 2, 2], &[1, 1, 4], &mut out).is_err());
        assert!(source.read_block(&[0, 0], &[1, 1], &mut out).is_err());
    }
}
