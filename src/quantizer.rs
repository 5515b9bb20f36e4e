//! Nearest-codeword quantization over the E8P grid.
//!
//! An input `x` is tried against both cosets: `x + 1/4` is rounded onto the
//! half-integer frame to reach the `-1/4` coset, `x - 1/4` to reach the
//! `+1/4` coset, and the branch with the smaller reconstruction error wins.
//! Each branch folds signs away (`|y|`, with the last coordinate negated when
//! `y` has an odd number of negative entries) and searches only the partial
//! grid.

use rayon::prelude::*;

use crate::config::CodebookConfig;
use crate::decode::decode_packed;
use crate::grid::{tables, CodebookTables, COSET_SHIFT};
use crate::lattice::{LatticePoint, PackedAbsTable, CODESZ, PACK_ORDER};
use crate::math::{l2_distance_sqr, nearest_row, to_point};
use crate::matrix::{IndexMatrix, Matrix};
use crate::packing::{pack_indices, PackedIndexMatrix};
use crate::E8pError;

/// Result of quantizing one 8-wide vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizedVector {
    /// Chosen codeword.
    pub value: LatticePoint,
    /// `(abs_row << 8) | sign_bits`.
    pub index: u16,
    /// Euclidean distance between the input and `value`.
    pub error: f32,
}

impl QuantizedVector {
    #[inline]
    pub fn abs_row(&self) -> u8 {
        (self.index >> 8) as u8
    }

    #[inline]
    pub fn sign_bits(&self) -> u8 {
        self.index as u8
    }
}

/// The E8P codebook: quantize, index and pack.
#[derive(Debug, Clone, Copy)]
pub struct E8pCodebook {
    tables: &'static CodebookTables,
    config: CodebookConfig,
}

impl Default for E8pCodebook {
    fn default() -> Self {
        Self {
            tables: tables(),
            config: CodebookConfig::default(),
        }
    }
}

impl E8pCodebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CodebookConfig) -> Result<Self, E8pError> {
        config.validate()?;
        Ok(Self {
            tables: tables(),
            config,
        })
    }

    pub fn config(&self) -> &CodebookConfig {
        &self.config
    }

    pub fn tables(&self) -> &'static CodebookTables {
        self.tables
    }

    /// The packed abs table the decoder needs alongside packed indices.
    pub fn packed_abs(&self) -> &'static PackedAbsTable {
        self.tables.packed_abs()
    }

    /// Quantize `y` onto one coset. `plus` selects the `-1/4` coset reached
    /// from `x + 1/4`. Returned values are still in the half-integer frame.
    fn quantize_coset(&self, y: &LatticePoint, plus: bool) -> QuantizedVector {
        let tables = self.tables;

        let mut magnitudes = y.map(f32::abs);
        let mut mask = y.map(|v| if v < 0.0 { -1.0f32 } else { 1.0 });
        let negatives = y.iter().filter(|&&v| v < 0.0).count();
        if negatives % 2 == 1 {
            magnitudes[CODESZ - 1] = -magnitudes[CODESZ - 1];
            mask[CODESZ - 1] = -mask[CODESZ - 1];
        }

        let part_row = nearest_row(&magnitudes, tables.partial_grid(), tables.partial_norms());
        let rounded = &tables.partial_grid()[part_row];

        let mut value = [0.0f32; CODESZ];
        for ((out, &r), &m) in value.iter_mut().zip(rounded).zip(&mask) {
            *out = r * m;
        }
        let error = l2_distance_sqr(y, &value).sqrt();

        let abs_row = tables.partial_to_abs()[part_row];
        let mut sign_bits = 0u8;
        for (position, &coord) in PACK_ORDER.iter().enumerate() {
            if (rounded[coord] < 0.0) != (mask[coord] < 0.0) {
                sign_bits |= 1 << position;
            }
        }
        if tables.abs_odd()[abs_row as usize] {
            sign_bits ^= 0x80;
        }
        if plus {
            sign_bits ^= 0x01;
        }

        QuantizedVector {
            value,
            index: ((abs_row as u16) << 8) | sign_bits as u16,
            error,
        }
    }

    /// Quantize one vector to its nearest codeword.
    pub fn quantize_point(&self, x: &LatticePoint) -> QuantizedVector {
        let plus = self.quantize_coset(&x.map(|v| v + COSET_SHIFT), true);
        let minus = self.quantize_coset(&x.map(|v| v - COSET_SHIFT), false);

        if plus.error < minus.error {
            QuantizedVector {
                value: plus.value.map(|v| v - COSET_SHIFT),
                ..plus
            }
        } else {
            QuantizedVector {
                value: minus.value.map(|v| v + COSET_SHIFT),
                ..minus
            }
        }
    }

    /// Quantize one vector given as a slice; it must have exactly 8 entries.
    pub fn quantize(&self, x: &[f32]) -> Result<QuantizedVector, E8pError> {
        if x.len() != CODESZ {
            return Err(E8pError::DimensionMismatch {
                expected: CODESZ,
                got: x.len(),
            });
        }
        Ok(self.quantize_point(&to_point(x)))
    }

    /// Quantize a batch of vectors.
    pub fn quantize_batch(&self, xs: &[LatticePoint]) -> Vec<QuantizedVector> {
        if xs.len() < self.config.parallel_min_rows {
            xs.iter().map(|x| self.quantize_point(x)).collect()
        } else {
            xs.par_iter().map(|x| self.quantize_point(x)).collect()
        }
    }

    /// Quantize a flat buffer of consecutive 8-wide vectors, returning the
    /// flat quantized values and one index per vector.
    pub fn quantize_flat(&self, data: &[f32]) -> Result<(Vec<f32>, Vec<u16>), E8pError> {
        if data.len() % CODESZ != 0 {
            return Err(E8pError::DimensionMismatch {
                expected: data.len().next_multiple_of(CODESZ),
                got: data.len(),
            });
        }
        let quantize_chunk = |chunk: &[f32]| self.quantize_point(&to_point(chunk));
        let results: Vec<QuantizedVector> = if data.len() / CODESZ < self.config.parallel_min_rows {
            data.chunks_exact(CODESZ).map(quantize_chunk).collect()
        } else {
            data.par_chunks_exact(CODESZ).map(quantize_chunk).collect()
        };

        let mut values = Vec::with_capacity(data.len());
        let mut indices = Vec::with_capacity(results.len());
        for result in results {
            values.extend_from_slice(&result.value);
            indices.push(result.index);
        }
        Ok((values, indices))
    }

    /// Quantize every 8-wide block of every row. Returns the dequantized
    /// matrix and the `rows x cols / 8` index matrix.
    pub fn quantize_matrix(&self, weights: &Matrix) -> Result<(Matrix, IndexMatrix), E8pError> {
        if weights.cols() % CODESZ != 0 {
            return Err(E8pError::InvalidShape {
                rows: weights.rows(),
                cols: weights.cols(),
                reason: "column count must be a multiple of 8",
            });
        }
        let (values, indices) = self.quantize_flat(weights.as_slice())?;
        let quantized = Matrix::new(weights.rows(), weights.cols(), values)?;
        let indices = IndexMatrix::new(weights.rows(), weights.cols() / CODESZ, indices)?;
        Ok((quantized, indices))
    }

    /// Quantize `weights * scale` and divide the result by `scale`.
    pub fn quantize_matrix_scaled(
        &self,
        weights: &Matrix,
        scale: f32,
    ) -> Result<(Matrix, IndexMatrix), E8pError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(E8pError::InvalidConfig("quantization scale must be positive"));
        }
        let scaled: Vec<f32> = weights.as_slice().iter().map(|v| v * scale).collect();
        let scaled = Matrix::new(weights.rows(), weights.cols(), scaled)?;
        let (quantized, indices) = self.quantize_matrix(&scaled)?;
        let values = quantized.into_vec().into_iter().map(|v| v / scale).collect();
        Ok((Matrix::new(weights.rows(), weights.cols(), values)?, indices))
    }

    /// Quantize a weight matrix and pack its indices for storage. The row
    /// count must be a multiple of 16 and the column count a multiple of 64.
    pub fn quantize_and_pack(&self, weights: &Matrix) -> Result<PackedIndexMatrix, E8pError> {
        let (_, indices) = self.quantize_matrix(weights)?;
        pack_indices(&indices)
    }

    /// Decode packed indices with this codebook's abs table.
    pub fn decode(&self, packed: &PackedIndexMatrix) -> Matrix {
        decode_packed(packed, self.packed_abs())
    }

    /// Exhaustive nearest codeword over all 65536 entries.
    pub fn nearest_codeword(&self, x: &LatticePoint) -> (u16, f32) {
        let row = nearest_row(x, self.tables.full_grid(), self.tables.full_norms());
        let distance = l2_distance_sqr(x, &self.tables.full_grid()[row]).sqrt();
        (row as u16, distance)
    }
}

/// Mean squared error between two equally sized matrices.
pub fn quantization_mse(original: &Matrix, quantized: &Matrix) -> Result<f64, E8pError> {
    if original.rows() != quantized.rows() || original.cols() != quantized.cols() {
        return Err(E8pError::DimensionMismatch {
            expected: original.as_slice().len(),
            got: quantized.as_slice().len(),
        });
    }
    let len = original.as_slice().len();
    if len == 0 {
        return Ok(0.0);
    }
    let total: f64 = original
        .as_slice()
        .iter()
        .zip(quantized.as_slice())
        .map(|(&a, &b)| {
            let d = (a - b) as f64;
            d * d
        })
        .sum();
    Ok(total / len as f64)
}
