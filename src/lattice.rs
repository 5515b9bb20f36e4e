//! Abs-grid construction and the packed 4-bit magnitude encoding.
//!
//! The abs grid holds 256 non-negative half-integer rows: the 227 distinct
//! magnitude patterns of the even-sum points of `Z^8 + 1/2` inside the ball of
//! squared radius 10, followed by 29 hand-picked rows of squared norm 12.
//! Every codeword of the full grid is one of these rows with signs applied and
//! a `±1/4` coset shift.

use std::collections::BTreeSet;

use crate::E8pError;

/// Number of coordinates per codeword.
pub const CODESZ: usize = 8;

/// Number of rows in the abs grid (one byte of the 16-bit index).
pub const ABS_GRID_ROWS: usize = 256;

/// Number of rows produced by the squared-norm <= 10 enumeration.
pub const ENUMERATED_ROWS: usize = 227;

/// Squared norm bound for the enumeration, in doubled coordinates (4 * 10).
const DOUBLED_NORM_BOUND: i32 = 40;

/// Storage order of coordinates inside a packed row: position `k` holds
/// coordinate `PACK_ORDER[k]`. The fused decode kernels read nibbles in this
/// order.
pub const PACK_ORDER: [usize; CODESZ] = [0, 2, 4, 6, 1, 3, 5, 7];

/// Inverse of [`PACK_ORDER`]: coordinate `i` is stored at position `UNPACK_ORDER[i]`.
pub const UNPACK_ORDER: [usize; CODESZ] = [0, 4, 1, 5, 2, 6, 3, 7];

/// A point on the half-integer grid, possibly shifted by 1/4.
pub type LatticePoint = [f32; CODESZ];

/// The 29 squared-norm-12 rows (five 3/2 and three 1/2), stored doubled.
/// Row order is part of the index space and must not change.
const NORM12_DOUBLED: [[u8; CODESZ]; 29] = [
    [3, 1, 1, 1, 3, 3, 3, 3],
    [1, 3, 1, 1, 3, 3, 3, 3],
    [1, 1, 3, 1, 3, 3, 3, 3],
    [1, 1, 1, 3, 3, 3, 3, 3],
    [3, 3, 3, 1, 3, 3, 1, 1],
    [3, 3, 3, 1, 3, 1, 3, 1],
    [3, 3, 3, 1, 1, 3, 3, 1],
    [3, 3, 3, 1, 3, 1, 1, 3],
    [3, 3, 3, 1, 1, 3, 1, 3],
    [3, 3, 3, 1, 1, 1, 3, 3],
    [3, 3, 1, 3, 3, 3, 1, 1],
    [3, 3, 1, 3, 3, 1, 3, 1],
    [3, 3, 1, 3, 1, 3, 3, 1],
    [3, 3, 1, 3, 3, 1, 1, 3],
    [3, 3, 1, 3, 1, 3, 1, 3],
    [3, 3, 1, 3, 1, 1, 3, 3],
    [3, 1, 3, 3, 3, 3, 1, 1],
    [3, 1, 3, 3, 3, 1, 3, 1],
    [3, 1, 3, 3, 1, 3, 3, 1],
    [3, 1, 3, 3, 3, 1, 1, 3],
    [3, 1, 3, 3, 1, 3, 1, 3],
    [1, 3, 3, 3, 1, 1, 3, 3],
    [1, 3, 3, 3, 3, 3, 1, 1],
    [1, 3, 3, 3, 3, 1, 3, 1],
    [1, 3, 3, 3, 1, 3, 3, 1],
    [1, 3, 3, 3, 3, 1, 1, 3],
    [1, 3, 3, 3, 1, 3, 1, 3],
    [1, 1, 3, 3, 1, 3, 3, 3],
    [3, 3, 1, 1, 3, 3, 3, 1],
];

/// Enumerate the distinct magnitude patterns of `{x in Z^8 + 1/2 : sum(x) even, |x|^2 <= 10}`,
/// in doubled coordinates and sorted lexicographically.
fn enumerate_doubled_abs_rows() -> BTreeSet<[u8; CODESZ]> {
    fn recurse(
        depth: usize,
        current: &mut [i32; CODESZ],
        norm: i32,
        sum: i32,
        out: &mut BTreeSet<[u8; CODESZ]>,
    ) {
        if depth == CODESZ {
            // doubled sum is 2 * sum(x); sum(x) even <=> doubled sum divisible by 4
            if sum.rem_euclid(4) == 0 {
                let mut row = [0u8; CODESZ];
                for (dst, &v) in row.iter_mut().zip(current.iter()) {
                    *dst = v.unsigned_abs() as u8;
                }
                out.insert(row);
            }
            return;
        }
        // doubled coordinates of -3.5, -2.5, ..., 3.5
        for v in (-7..=7).step_by(2) {
            let next = norm + v * v;
            if next > DOUBLED_NORM_BOUND {
                continue;
            }
            current[depth] = v;
            recurse(depth + 1, current, next, sum + v, out);
        }
    }

    let mut out = BTreeSet::new();
    recurse(0, &mut [0; CODESZ], 0, 0, &mut out);
    out
}

/// Build the 256-row abs grid in natural coordinate order, without the
/// parity flip applied by [`encode_abs_row`].
///
/// Fails if the enumeration or the norm-12 table does not produce the
/// expected number of rows.
pub fn build_abs_grid() -> Result<Vec<LatticePoint>, E8pError> {
    let enumerated = enumerate_doubled_abs_rows();
    if enumerated.len() != ENUMERATED_ROWS {
        return Err(E8pError::CorruptTable(format!(
            "enumerated {} abs rows, expected {ENUMERATED_ROWS}",
            enumerated.len()
        )));
    }
    if NORM12_DOUBLED.len() + ENUMERATED_ROWS != ABS_GRID_ROWS {
        return Err(E8pError::CorruptTable(format!(
            "norm-12 table has {} rows, expected {}",
            NORM12_DOUBLED.len(),
            ABS_GRID_ROWS - ENUMERATED_ROWS
        )));
    }
    if let Some(row) = NORM12_DOUBLED
        .iter()
        .find(|row| row.iter().map(|&v| (v as u32) * (v as u32)).sum::<u32>() != 48)
    {
        return Err(E8pError::CorruptTable(format!(
            "norm-12 row {row:?} does not have squared norm 12"
        )));
    }

    let grid = enumerated
        .iter()
        .chain(NORM12_DOUBLED.iter())
        .map(|doubled| doubled.map(|v| v as f32 * 0.5))
        .collect();
    Ok(grid)
}

/// Sum of the coordinates of a half-integer row, as an integer.
#[inline]
pub fn half_integer_sum(row: &LatticePoint) -> i32 {
    let doubled: i32 = row.iter().map(|&v| (v * 2.0).round() as i32).sum();
    doubled / 2
}

/// `true` if the coordinates of `row` sum to an odd integer.
#[inline]
pub fn is_odd_row(row: &LatticePoint) -> bool {
    half_integer_sum(row).rem_euclid(2) == 1
}

/// Pack one abs-grid row into eight 4-bit codes (`value * 2 + 8`), position
/// `k` holding coordinate [`PACK_ORDER`]`[k]` in bits `4k..4k+4`. Rows with
/// an odd coordinate sum have their last coordinate negated first so every
/// packed row has even parity.
pub fn encode_abs_row(row: &LatticePoint) -> u32 {
    let mut permuted = PACK_ORDER.map(|src| row[src]);
    if is_odd_row(&permuted) {
        permuted[CODESZ - 1] = -permuted[CODESZ - 1];
    }

    permuted
        .iter()
        .enumerate()
        .fold(0u32, |acc, (position, &value)| {
            let code = (value * 2.0 + 8.0).round() as u32 & 0xF;
            acc | (code << (4 * position))
        })
}

/// Magnitude stored at packed position `position` of `word`.
#[inline]
pub fn packed_value(word: u32, position: usize) -> f32 {
    (((word >> (4 * position)) & 0xF) as i32 - 8) as f32 * 0.5
}

/// Decode a packed row back to natural coordinate order. Odd rows come back
/// with their last coordinate negative, exactly as the decode kernels see them.
pub fn decode_abs_row(word: u32) -> LatticePoint {
    UNPACK_ORDER.map(|position| packed_value(word, position))
}

/// The 256 packed abs rows handed to the decoder verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedAbsTable {
    words: Box<[u32; ABS_GRID_ROWS]>,
}

impl PackedAbsTable {
    /// Pack every row of `abs_grid`.
    pub fn from_abs_grid(abs_grid: &[LatticePoint]) -> Result<Self, E8pError> {
        if abs_grid.len() != ABS_GRID_ROWS {
            return Err(E8pError::CorruptTable(format!(
                "abs grid has {} rows, expected {ABS_GRID_ROWS}",
                abs_grid.len()
            )));
        }
        let mut words = Box::new([0u32; ABS_GRID_ROWS]);
        for (word, row) in words.iter_mut().zip(abs_grid) {
            *word = encode_abs_row(row);
        }
        Ok(Self { words })
    }

    /// Wrap words read from storage.
    pub fn from_words(words: &[u32]) -> Result<Self, E8pError> {
        let words: [u32; ABS_GRID_ROWS] = words.try_into().map_err(|_| {
            E8pError::CorruptTable(format!(
                "packed abs table has {} words, expected {ABS_GRID_ROWS}",
                words.len()
            ))
        })?;
        Ok(Self {
            words: Box::new(words),
        })
    }

    #[inline]
    pub fn word(&self, row: usize) -> u32 {
        self.words[row]
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.words[..]
    }

    /// Little-endian byte image of the table.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_yields_expected_row_count() {
        assert_eq!(enumerate_doubled_abs_rows().len(), ENUMERATED_ROWS);
    }

    #[test]
    fn abs_grid_is_sorted_then_norm12() {
        let grid = build_abs_grid().unwrap();
        assert_eq!(grid.len(), ABS_GRID_ROWS);
        assert_eq!(grid[0], [0.5; 8]);
        assert_eq!(grid[1], [0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 1.5]);
        assert_eq!(grid[2], [0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 2.5]);
        assert_eq!(grid[227], [1.5, 0.5, 0.5, 0.5, 1.5, 1.5, 1.5, 1.5]);
        assert_eq!(grid[255], [1.5, 1.5, 0.5, 0.5, 1.5, 1.5, 1.5, 0.5]);
        for pair in grid[..ENUMERATED_ROWS].windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn orders_are_inverse() {
        for i in 0..CODESZ {
            assert_eq!(PACK_ORDER[UNPACK_ORDER[i]], i);
        }
    }

    #[test]
    fn packed_words_match_literal_values() {
        let grid = build_abs_grid().unwrap();
        let table = PackedAbsTable::from_abs_grid(&grid).unwrap();
        let expected_head = [
            0x9999_9999u32,
            0x5999_9999,
            0xd999_9999,
            0x7999_b999,
            0xb999_b999,
            0x3999_b999,
            0x9999_d999,
            0x5999_d999,
        ];
        assert_eq!(&table.as_slice()[..8], &expected_head);
        assert_eq!(table.word(226), 0x799b_999d);
        assert_eq!(table.word(227), 0x5b99_bb9b);
        assert_eq!(table.word(255), 0x7b9b_bb9b);

        let xor = table.as_slice().iter().fold(0u32, |acc, w| acc ^ w);
        let sum = table.as_slice().iter().fold(0u32, |acc, w| acc.wrapping_add(*w));
        assert_eq!(xor, 0xc202_0000);
        assert_eq!(sum, 0xf9bd_7714);
    }

    #[test]
    fn decoding_packed_row_restores_magnitudes() {
        let grid = build_abs_grid().unwrap();
        for row in &grid {
            let decoded = decode_abs_row(encode_abs_row(row));
            assert_eq!(decoded.map(f32::abs), *row);
            assert_eq!(decoded[7] < 0.0, is_odd_row(row));
            assert!(!is_odd_row(&decoded));
        }
    }

    #[test]
    fn table_rejects_wrong_length() {
        assert!(matches!(
            PackedAbsTable::from_words(&[0u32; 12]),
            Err(E8pError::CorruptTable(_))
        ));
    }
}
