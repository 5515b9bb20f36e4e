//! Full and partial grid expansion.
//!
//! A 16-bit index `(row << 8) | signs` names one codeword: abs row `row` with
//! the sign bits applied and a `+1/4` shift when the sign bits have even
//! parity, `-1/4` when odd. Odd sign patterns toggle bit 0 before the signs
//! are applied, so the effective sign pattern is always even.
//!
//! Quantization never searches the 65536-entry full grid. It searches the
//! partial grid: the `-1/4` half shifted back to the half-integer frame and
//! restricted to rows with at most one negative entry (and no entry below
//! `-1/2`) among the first seven coordinates.

use std::sync::OnceLock;

use rayon::prelude::*;

use crate::lattice::{
    build_abs_grid, is_odd_row, packed_value, LatticePoint, PackedAbsTable, CODESZ, UNPACK_ORDER,
};
use crate::math::{l2_norm_sqr, round_batch};
use crate::E8pError;

/// Number of codewords in the full grid.
pub const FULL_GRID_ROWS: usize = 1 << 16;

/// Coset offset applied to every codeword.
pub const COSET_SHIFT: f32 = 0.25;

/// Expand a 16-bit index into its codeword using the packed abs table.
/// Also returns the parity of the raw sign byte (`true` selects the `-1/4` coset).
#[inline]
pub fn expand_index(index: u16, packed_abs: &PackedAbsTable) -> (LatticePoint, bool) {
    let raw_signs = (index & 0xFF) as u32;
    let row = (index >> 8) as usize;
    let parity = raw_signs.count_ones() & 1;
    let signs = raw_signs ^ parity;
    let shift = if parity == 1 { -COSET_SHIFT } else { COSET_SHIFT };

    let word = packed_abs.word(row);
    let mut point = [0.0f32; CODESZ];
    for (coord, &position) in point.iter_mut().zip(UNPACK_ORDER.iter()) {
        let magnitude = packed_value(word, position);
        let signed = if (signs >> position) & 1 == 1 {
            -magnitude
        } else {
            magnitude
        };
        *coord = signed + shift;
    }
    (point, parity == 1)
}

/// Immutable lookup tables backing the codebook.
#[derive(Debug, Clone)]
pub struct CodebookTables {
    abs_grid: Vec<LatticePoint>,
    abs_odd: Vec<bool>,
    packed_abs: PackedAbsTable,
    full_grid: Vec<LatticePoint>,
    full_norms: Vec<f32>,
    parity_set: Vec<u16>,
    partial_grid: Vec<LatticePoint>,
    partial_norms: Vec<f32>,
    partial_to_abs: Vec<u8>,
}

static TABLES: OnceLock<CodebookTables> = OnceLock::new();

/// Process-wide codebook tables, built on first use.
///
/// # Panics
/// Panics if the constant tables are malformed; a partially built codebook
/// is never published.
pub fn tables() -> &'static CodebookTables {
    TABLES.get_or_init(|| match CodebookTables::build() {
        Ok(tables) => tables,
        Err(err) => panic!("failed to build E8P codebook tables: {err}"),
    })
}

impl CodebookTables {
    /// Build every table from scratch. The result depends on no input and is
    /// identical across calls.
    pub fn build() -> Result<Self, E8pError> {
        let abs_grid = build_abs_grid()?;
        let packed_abs = PackedAbsTable::from_abs_grid(&abs_grid)?;
        let abs_odd: Vec<bool> = abs_grid.iter().map(is_odd_row).collect();
        let abs_norms: Vec<f32> = abs_grid.iter().map(l2_norm_sqr).collect();

        let expanded: Vec<(LatticePoint, bool)> = (0..FULL_GRID_ROWS)
            .into_par_iter()
            .map(|index| expand_index(index as u16, &packed_abs))
            .collect();

        let mut full_grid = Vec::with_capacity(FULL_GRID_ROWS);
        let mut parity_set = Vec::with_capacity(FULL_GRID_ROWS / 2);
        for (index, (point, odd)) in expanded.into_iter().enumerate() {
            if odd {
                parity_set.push(index as u16);
            }
            full_grid.push(point);
        }
        let full_norms: Vec<f32> = full_grid.par_iter().map(l2_norm_sqr).collect();

        let partial_grid: Vec<LatticePoint> = parity_set
            .iter()
            .map(|&index| full_grid[index as usize].map(|v| v + COSET_SHIFT))
            .filter(|point| {
                let head = &point[..CODESZ - 1];
                let negatives = head.iter().filter(|&&v| v < 0.0).count();
                let min = head.iter().copied().fold(f32::INFINITY, f32::min);
                negatives <= 1 && min >= -0.5
            })
            .collect();
        let partial_norms: Vec<f32> = partial_grid.iter().map(l2_norm_sqr).collect();

        let magnitudes: Vec<LatticePoint> =
            partial_grid.iter().map(|point| point.map(f32::abs)).collect();
        let partial_to_abs = round_batch(&magnitudes, &abs_grid, &abs_norms)
            .into_iter()
            .zip(&magnitudes)
            .map(|((nearest, row), magnitude)| {
                if nearest != *magnitude {
                    return Err(E8pError::CorruptTable(format!(
                        "partial grid magnitudes {magnitude:?} have no exact abs grid match"
                    )));
                }
                Ok(row as u8)
            })
            .collect::<Result<Vec<u8>, E8pError>>()?;

        tracing::debug!(
            abs_rows = abs_grid.len(),
            odd_abs_rows = abs_odd.iter().filter(|&&odd| odd).count(),
            full_rows = full_grid.len(),
            parity_rows = parity_set.len(),
            partial_rows = partial_grid.len(),
            "built E8P codebook tables"
        );

        Ok(Self {
            abs_grid,
            abs_odd,
            packed_abs,
            full_grid,
            full_norms,
            parity_set,
            partial_grid,
            partial_norms,
            partial_to_abs,
        })
    }

    /// The 256 canonical non-negative rows, natural coordinate order.
    pub fn abs_grid(&self) -> &[LatticePoint] {
        &self.abs_grid
    }

    /// Whether each abs row sums to an odd integer.
    pub fn abs_odd(&self) -> &[bool] {
        &self.abs_odd
    }

    pub fn packed_abs(&self) -> &PackedAbsTable {
        &self.packed_abs
    }

    /// All 65536 codewords, position = 16-bit index.
    pub fn full_grid(&self) -> &[LatticePoint] {
        &self.full_grid
    }

    pub fn full_norms(&self) -> &[f32] {
        &self.full_norms
    }

    /// Indices whose raw sign byte has odd parity (the `-1/4` coset).
    pub fn parity_set(&self) -> &[u16] {
        &self.parity_set
    }

    pub fn partial_grid(&self) -> &[LatticePoint] {
        &self.partial_grid
    }

    pub fn partial_norms(&self) -> &[f32] {
        &self.partial_norms
    }

    /// Abs row of each partial grid row.
    pub fn partial_to_abs(&self) -> &[u8] {
        &self.partial_to_abs
    }

    /// Codeword for a 16-bit index.
    #[inline]
    pub fn codeword(&self, index: u16) -> &LatticePoint {
        &self.full_grid[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::ABS_GRID_ROWS;

    #[test]
    fn table_sizes_are_fixed() {
        let tables = tables();
        assert_eq!(tables.abs_grid().len(), ABS_GRID_ROWS);
        assert_eq!(tables.full_grid().len(), FULL_GRID_ROWS);
        assert_eq!(tables.full_norms().len(), FULL_GRID_ROWS);
        assert_eq!(tables.parity_set().len(), FULL_GRID_ROWS / 2);
        assert_eq!(tables.partial_grid().len(), 1366);
        assert_eq!(tables.partial_to_abs().len(), 1366);
        assert_eq!(tables.abs_odd().iter().filter(|&&odd| odd).count(), 149);
    }

    #[test]
    fn rebuild_is_deterministic() {
        let first = CodebookTables::build().unwrap();
        let second = tables();
        assert_eq!(first.full_grid(), second.full_grid());
        assert_eq!(first.partial_grid(), second.partial_grid());
        assert_eq!(first.partial_to_abs(), second.partial_to_abs());
        assert_eq!(first.packed_abs(), second.packed_abs());
    }

    #[test]
    fn expand_index_matches_literal_codewords() {
        let tables = tables();
        assert_eq!(*tables.codeword(0x0000), [0.75; 8]);
        assert_eq!(*tables.codeword(0x0001), [0.25; 8]);
        assert_eq!(*tables.codeword(0x00FF), [-0.25; 8]);
        assert_eq!(
            *tables.codeword(0x0103),
            [-0.25, 0.75, -0.25, 0.75, 0.75, 0.75, 0.75, -1.25]
        );
    }

    #[test]
    fn codewords_sit_on_quarter_shifted_half_integers() {
        let tables = tables();
        for (index, point) in tables.full_grid().iter().enumerate() {
            let odd = tables.parity_set().binary_search(&(index as u16)).is_ok();
            let shift = if odd { -COSET_SHIFT } else { COSET_SHIFT };
            for &v in point {
                let base = v - shift;
                assert_eq!((base * 2.0).fract().abs(), 0.0);
                assert!((base * 2.0) as i32 % 2 != 0, "{point:?}");
            }
        }
    }

    #[test]
    fn full_grid_norms_are_bounded() {
        let tables = tables();
        let min = tables.full_norms().iter().copied().fold(f32::INFINITY, f32::min);
        let max = tables.full_norms().iter().copied().fold(0.0f32, f32::max);
        assert_eq!(min, 0.5);
        assert_eq!(max, 16.5);
    }

    #[test]
    fn partial_grid_respects_symmetry_restriction() {
        let tables = tables();
        assert_eq!(tables.partial_grid()[0], [0.5; 8]);
        assert_eq!(
            tables.partial_grid()[1],
            [-0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, -0.5]
        );
        for (point, &row) in tables.partial_grid().iter().zip(tables.partial_to_abs()) {
            let negatives = point[..7].iter().filter(|&&v| v < 0.0).count();
            assert!(negatives <= 1);
            assert!(point[..7].iter().all(|&v| v >= -0.5));
            assert_eq!(point.map(f32::abs), tables.abs_grid()[row as usize]);
        }
        let norm_sum: f32 = tables.partial_norms().iter().sum();
        assert_eq!(norm_sum, 12044.0);
    }
}
