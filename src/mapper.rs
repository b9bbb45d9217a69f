//! Mixed-radix mapping between flat tuple ids and dimension coordinates
//!
//! Extent vectors are ordered outermost first (slowest varying at index 0),
//! so a tuple id and its coordinate are two spellings of the same mixed-radix
//! number. Tuple ids and digits are 1-based throughout; callers subtract 1
//! before indexing 0-based storage.

use crate::error::{CubeError, Result};

fn checked_total(extents: &[u64]) -> Result<u64> {
    let mut total = 1u64;
    for &extent in extents {
        if extent == 0 {
            return Err(CubeError::InvalidDimensions(
                "dimension extents must be positive".to_string(),
            ));
        }
        total = total
            .checked_mul(extent)
            .ok_or_else(|| CubeError::OutOfRange("extent product overflows u64".to_string()))?;
    }
    Ok(total)
}

fn decompose(residual: u64, extents: &[u64], out: &mut Vec<u64>) {
    match extents {
        [] => {}
        [_] => out.push(residual + 1),
        [_, rest @ ..] => {
            let weight: u64 = rest.iter().product();
            out.push(residual / weight + 1);
            decompose(residual % weight, rest, out);
        }
    }
}

/// Decompose a 1-based tuple id into its per-dimension coordinate
///
/// An empty extent vector yields an empty coordinate.
pub fn tuple_to_coordinate(tuple_id: u64, extents: &[u64]) -> Result<Vec<u64>> {
    let total = checked_total(extents)?;
    if tuple_id == 0 || tuple_id > total {
        return Err(CubeError::OutOfRange(format!(
            "tuple id {} outside [1, {}]",
            tuple_id, total
        )));
    }
    let mut coordinate = Vec::with_capacity(extents.len());
    decompose(tuple_id - 1, extents, &mut coordinate);
    Ok(coordinate)
}

/// Recompose a coordinate into its 1-based tuple id (exact inverse of
/// [`tuple_to_coordinate`])
pub fn coordinate_to_tuple(coordinate: &[u64], extents: &[u64]) -> Result<u64> {
    if coordinate.len() != extents.len() {
        return Err(CubeError::InvalidDimensions(format!(
            "coordinate rank {} does not match extent rank {}",
            coordinate.len(),
            extents.len()
        )));
    }
    checked_total(extents)?;
    let mut tuple_id = 1u64;
    let mut weight = 1u64;
    for (digit, extent) in coordinate.iter().zip(extents.iter()).rev() {
        if *digit == 0 || digit > extent {
            return Err(CubeError::OutOfRange(format!(
                "digit {} outside [1, {}]",
                digit, extent
            )));
        }
        tuple_id += (digit - 1) * weight;
        weight *= extent;
    }
    Ok(tuple_id)
}

/// Advance a coordinate to the next tuple id, or `None` past the last one
///
/// The innermost digit increments first; a carry resets it and moves one
/// dimension out, exactly the odometer used by drill-down readers that
/// enumerate positions one at a time.
pub fn advance_coordinate(coordinate: &[u64], extents: &[u64]) -> Result<Option<Vec<u64>>> {
    if coordinate.len() != extents.len() {
        return Err(CubeError::InvalidDimensions(format!(
            "coordinate rank {} does not match extent rank {}",
            coordinate.len(),
            extents.len()
        )));
    }
    let mut next = coordinate.to_vec();
    for i in (0..next.len()).rev() {
        if next[i] < extents[i] {
            next[i] += 1;
            return Ok(Some(next));
        }
        next[i] = 1;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_by_three_decomposition() {
        // Positions 1,2,3 sit in the first outer group, 4,5,6 in the second.
        assert_eq!(tuple_to_coordinate(4, &[2, 3]).unwrap(), vec![2, 1]);
        assert_eq!(tuple_to_coordinate(1, &[2, 3]).unwrap(), vec![1, 1]);
        assert_eq!(tuple_to_coordinate(6, &[2, 3]).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_bijection() {
        let extents = [3u64, 4, 5];
        let total: u64 = extents.iter().product();
        let mut seen = Vec::new();
        for tuple_id in 1..=total {
            let coordinate = tuple_to_coordinate(tuple_id, &extents).unwrap();
            assert_eq!(coordinate_to_tuple(&coordinate, &extents).unwrap(), tuple_id);
            seen.push(coordinate);
        }
        seen.dedup();
        assert_eq!(seen.len(), total as usize);
    }

    #[test]
    fn test_odometer_reaches_last_coordinate() {
        let extents = [2u64, 3, 2];
        let total: u64 = extents.iter().product();
        let mut coordinate = vec![1u64; extents.len()];
        for _ in 0..total - 1 {
            coordinate = advance_coordinate(&coordinate, &extents).unwrap().unwrap();
        }
        assert_eq!(
            coordinate,
            tuple_to_coordinate(total, &extents).unwrap()
        );
        assert!(advance_coordinate(&coordinate, &extents).unwrap().is_none());
    }

    #[test]
    fn test_rank_zero_is_a_no_op() {
        assert_eq!(tuple_to_coordinate(1, &[]).unwrap(), Vec::<u64>::new());
        assert_eq!(coordinate_to_tuple(&[], &[]).unwrap(), 1);
        assert!(advance_coordinate(&[], &[]).unwrap().is_none());
    }

    #[test]
    fn test_out_of_range_inputs() {
        assert!(tuple_to_coordinate(0, &[2, 3]).is_err());
        assert!(tuple_to_coordinate(7, &[2, 3]).is_err());
        assert!(tuple_to_coordinate(1, &[2, 0]).is_err());
        assert!(coordinate_to_tuple(&[1, 4], &[2, 3]).is_err());
        assert!(coordinate_to_tuple(&[1], &[2, 3]).is_err());
    }
}
