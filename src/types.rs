//! Core data types for datacube dimensions and measures

use crate::error::{CubeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element types storable in a measure or dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementType {
    /// Signed 8-bit integer
    Byte = 0,
    /// Signed 16-bit integer
    Short = 1,
    /// Signed 32-bit integer
    Int = 2,
    /// Signed 64-bit integer
    Long = 3,
    /// 32-bit floating point
    Float = 4,
    /// 64-bit floating point
    Double = 5,
}

impl ElementType {
    /// Size in bytes of this element type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ElementType::Byte => 1,
            ElementType::Short => 2,
            ElementType::Int | ElementType::Float => 4,
            ElementType::Long | ElementType::Double => 8,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, ElementType::Float | ElementType::Double)
    }

    /// Parse a type name as used by format readers
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "byte" => Ok(ElementType::Byte),
            "short" => Ok(ElementType::Short),
            "int" => Ok(ElementType::Int),
            "long" => Ok(ElementType::Long),
            "float" => Ok(ElementType::Float),
            "double" => Ok(ElementType::Double),
            other => Err(CubeError::Parse(format!("unknown element type: {}", other))),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Byte => "byte",
            ElementType::Short => "short",
            ElementType::Int => "int",
            ElementType::Long => "long",
            ElementType::Float => "float",
            ElementType::Double => "double",
        };
        write!(f, "{}", name)
    }
}

/// Descriptor of one source-array dimension
///
/// Explicit dimensions select which fragment and row a value lives in;
/// implicit dimensions select the position inside a row's binary measure
/// array. `level` is the 1-based nesting rank among dimensions of the same
/// class: level 1 is the primary shard-key component for explicit dimensions
/// and the fastest-varying axis for implicit dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionDescriptor {
    /// Dimension name (e.g., "lat", "lon", "time")
    pub name: String,
    /// Element type of the dimension variable
    pub element_type: ElementType,
    /// Total length of the dimension in the source array
    pub size: u64,
    /// Whether this dimension is part of the fragment/row key
    pub explicit: bool,
    /// 1-based concept level within the explicit or implicit class
    pub level: u16,
    /// Inclusive 0-based start of the subset window into the source
    pub start_index: u64,
    /// Inclusive 0-based end of the subset window into the source
    pub end_index: u64,
}

impl DimensionDescriptor {
    /// Create a new descriptor, validating the subset window and level
    pub fn new(
        name: impl Into<String>,
        element_type: ElementType,
        size: u64,
        explicit: bool,
        level: u16,
        start_index: u64,
        end_index: u64,
    ) -> Result<Self> {
        if level == 0 {
            return Err(CubeError::InvalidDimensions(
                "Concept level must be 1-based".to_string(),
            ));
        }
        if start_index > end_index || end_index >= size {
            return Err(CubeError::InvalidDimensions(format!(
                "Subset window [{}, {}] invalid for dimension of length {}",
                start_index, end_index, size
            )));
        }
        Ok(Self {
            name: name.into(),
            element_type,
            size,
            explicit,
            level,
            start_index,
            end_index,
        })
    }

    /// Number of source indices covered by the subset window
    ///
    /// A collapsed window (`start_index == end_index`) contributes extent 1
    /// regardless of the underlying source length.
    pub fn subset_extent(&self) -> u64 {
        self.end_index - self.start_index + 1
    }
}

/// Indices of the explicit dimensions in canonical order
///
/// Canonical order is outermost first: ascending concept level, so the
/// level-1 dimension is the most significant shard-key component.
pub fn explicit_order(dims: &[DimensionDescriptor]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..dims.len()).filter(|&i| dims[i].explicit).collect();
    order.sort_by_key(|&i| dims[i].level);
    order
}

/// Indices of the implicit dimensions in canonical order
///
/// Canonical order is outermost first: descending concept level, so the
/// level-1 dimension varies fastest inside a row's measure array.
pub fn implicit_order(dims: &[DimensionDescriptor]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..dims.len()).filter(|&i| !dims[i].explicit).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(dims[i].level));
    order
}

/// Validate that concept levels within each class form the set 1..=k
pub fn validate_levels(dims: &[DimensionDescriptor]) -> Result<()> {
    for explicit in [true, false] {
        let mut levels: Vec<u16> = dims
            .iter()
            .filter(|d| d.explicit == explicit)
            .map(|d| d.level)
            .collect();
        levels.sort_unstable();
        for (rank, level) in levels.iter().enumerate() {
            if *level != rank as u16 + 1 {
                return Err(CubeError::InvalidDimensions(format!(
                    "{} dimension levels must be contiguous from 1, found level {}",
                    if explicit { "explicit" } else { "implicit" },
                    level
                )));
            }
        }
    }
    Ok(())
}

/// Number of elements in one row's measure array
pub fn array_length(dims: &[DimensionDescriptor]) -> u64 {
    dims.iter()
        .filter(|d| !d.explicit)
        .map(|d| d.subset_extent())
        .product()
}

/// Total number of rows across the whole datacube
pub fn total_tuples(dims: &[DimensionDescriptor]) -> u64 {
    dims.iter()
        .filter(|d| d.explicit)
        .map(|d| d.subset_extent())
        .product()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(name: &str, size: u64, explicit: bool, level: u16) -> DimensionDescriptor {
        DimensionDescriptor::new(name, ElementType::Double, size, explicit, level, 0, size - 1)
            .unwrap()
    }

    #[test]
    fn test_element_type_sizes() {
        assert_eq!(ElementType::Byte.size_in_bytes(), 1);
        assert_eq!(ElementType::Short.size_in_bytes(), 2);
        assert_eq!(ElementType::Float.size_in_bytes(), 4);
        assert_eq!(ElementType::Double.size_in_bytes(), 8);
    }

    #[test]
    fn test_element_type_parse() {
        assert_eq!(ElementType::parse("double").unwrap(), ElementType::Double);
        assert_eq!(ElementType::parse("int").unwrap(), ElementType::Int);
        assert!(ElementType::parse("complex").is_err());
    }

    #[test]
    fn test_subset_window_validation() {
        assert!(DimensionDescriptor::new("lat", ElementType::Float, 10, true, 1, 3, 2).is_err());
        assert!(DimensionDescriptor::new("lat", ElementType::Float, 10, true, 1, 0, 10).is_err());
        let d = DimensionDescriptor::new("lat", ElementType::Float, 10, true, 1, 4, 4).unwrap();
        assert_eq!(d.subset_extent(), 1);
    }

    #[test]
    fn test_canonical_orders() {
        let dims = vec![
            dim("time", 24, false, 1),
            dim("lon", 360, true, 2),
            dim("lat", 180, true, 1),
            dim("depth", 6, false, 2),
        ];
        // Explicit: level ascending, outermost first.
        assert_eq!(explicit_order(&dims), vec![2, 1]);
        // Implicit: level descending, so level 1 (time) is innermost.
        assert_eq!(implicit_order(&dims), vec![3, 0]);
        assert_eq!(array_length(&dims), 24 * 6);
        assert_eq!(total_tuples(&dims), 360 * 180);
    }

    #[test]
    fn test_level_validation() {
        let dims = vec![dim("lat", 180, true, 1), dim("lon", 360, true, 3)];
        assert!(validate_levels(&dims).is_err());
        let dims = vec![dim("lat", 180, true, 1), dim("lon", 360, true, 2)];
        assert!(validate_levels(&dims).is_ok());
    }
}
