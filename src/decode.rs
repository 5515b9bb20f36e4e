//! CPU reference for the packed decode path: turns packed words plus the
//! packed abs table back into the real matrix the fused kernels produce.

use rayon::prelude::*;

use crate::grid::expand_index;
use crate::lattice::{LatticePoint, PackedAbsTable, CODESZ};
use crate::matrix::Matrix;
use crate::packing::PackedIndexMatrix;
use crate::E8pError;

pub use crate::packing::unpack_indices;

/// Codeword named by a 16-bit index.
#[inline]
pub fn decode_index(index: u16, packed_abs: &PackedAbsTable) -> LatticePoint {
    expand_index(index, packed_abs).0
}

/// Decode packed codes of an `R x C` index matrix into the `R x 8C` matrix of
/// codeword values. Index `(r, c)` fills columns `8c..8c + 8` of row `r`.
pub fn decode_packed(packed: &PackedIndexMatrix, packed_abs: &PackedAbsTable) -> Matrix {
    let indices = unpack_indices(packed);
    let cols = indices.cols() * CODESZ;
    let mut data = vec![0.0f32; indices.rows() * cols];
    data.par_chunks_mut(CODESZ)
        .zip(indices.as_slice().par_iter())
        .for_each(|(out, &index)| out.copy_from_slice(&decode_index(index, packed_abs)));
    Matrix::new(indices.rows(), cols, data).expect("decoded buffer matches index shape")
}

/// [`decode_packed`] followed by division by the consuming layer's scale.
pub fn decode_packed_scaled(
    packed: &PackedIndexMatrix,
    packed_abs: &PackedAbsTable,
    scale: f32,
) -> Result<Matrix, E8pError> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(E8pError::InvalidConfig("decode scale must be positive"));
    }
    let decoded = decode_packed(packed, packed_abs);
    let (rows, cols) = (decoded.rows(), decoded.cols());
    let data = decoded.into_vec().into_iter().map(|v| v / scale).collect();
    Matrix::new(rows, cols, data)
}
