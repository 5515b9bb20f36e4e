//! Packed index layout consumed by the fused E8P decode kernels.
//!
//! Each 64-bit word stores a 2x2 tile of 16-bit indices. The low half holds
//! the four abs-row bytes; the high half interleaves the four sign bytes so
//! bit `j` of member `i` lands at bit `4j + i`. Members are ordered
//! `(r, c), (r + 1, c), (r, c + 1), (r + 1, c + 1)`.
//!
//! Words are then grouped into 8x4 blocks (16 index rows by 8 index columns)
//! stored contiguously, block rows outermost.

use rayon::prelude::*;

use crate::config::PACKSZ;
use crate::matrix::IndexMatrix;
use crate::E8pError;

/// Index rows covered by one packed block.
pub const TILE_ROWS: usize = 16;
/// Index columns covered by one packed block.
pub const TILE_COLS: usize = 8;

const BLOCK_ROWS: usize = TILE_ROWS / 2;
const BLOCK_COLS: usize = TILE_COLS / 2;

/// Pack four indices of a 2x2 tile into one word.
#[inline]
pub fn pack_tile(members: [u16; PACKSZ]) -> u64 {
    let mut abs_word = 0u32;
    let mut sign_word = 0u32;
    for (member, &index) in members.iter().enumerate() {
        abs_word |= ((index >> 8) as u32) << (8 * member);
        for bit in 0..8 {
            sign_word |= (((index >> bit) & 1) as u32) << (4 * bit + member);
        }
    }
    ((sign_word as u64) << 32) | abs_word as u64
}

/// Inverse of [`pack_tile`].
#[inline]
pub fn unpack_tile(word: u64) -> [u16; PACKSZ] {
    let abs_word = word as u32;
    let sign_word = (word >> 32) as u32;
    let mut members = [0u16; PACKSZ];
    for (member, index) in members.iter_mut().enumerate() {
        let mut signs = 0u16;
        for bit in 0..8 {
            signs |= (((sign_word >> (4 * bit + member)) & 1) as u16) << bit;
        }
        let row = ((abs_word >> (8 * member)) & 0xFF) as u16;
        *index = (row << 8) | signs;
    }
    members
}

/// Packed indices of an `index_rows x index_cols` index matrix.
///
/// Holds `index_rows * index_cols / 4` words, viewed row-major as an
/// `index_rows x index_cols / 4` matrix or as `(rows / 16, cols / 8, 8, 4)` blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedIndexMatrix {
    index_rows: usize,
    index_cols: usize,
    words: Vec<u64>,
}

impl PackedIndexMatrix {
    /// Wrap words produced by [`pack_indices`] (for example after loading them).
    pub fn from_words(
        index_rows: usize,
        index_cols: usize,
        words: Vec<u64>,
    ) -> Result<Self, E8pError> {
        check_tiling(index_rows, index_cols)?;
        let expected = index_rows * index_cols / PACKSZ;
        if words.len() != expected {
            return Err(E8pError::DimensionMismatch {
                expected,
                got: words.len(),
            });
        }
        Ok(Self {
            index_rows,
            index_cols,
            words,
        })
    }

    /// Rows of the original index matrix.
    pub fn index_rows(&self) -> usize {
        self.index_rows
    }

    /// Columns of the original index matrix.
    pub fn index_cols(&self) -> usize {
        self.index_cols
    }

    /// Rows of the row-major word view.
    pub fn rows(&self) -> usize {
        self.index_rows
    }

    /// Columns of the row-major word view.
    pub fn cols(&self) -> usize {
        self.index_cols / PACKSZ
    }

    /// Shape of the blocked view read by the decode kernels.
    pub fn block_shape(&self) -> [usize; 4] {
        [
            self.index_rows / TILE_ROWS,
            self.index_cols / TILE_COLS,
            BLOCK_ROWS,
            BLOCK_COLS,
        ]
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u64> {
        self.words
    }
}

fn check_tiling(rows: usize, cols: usize) -> Result<(), E8pError> {
    if rows == 0 || cols == 0 {
        return Err(E8pError::InvalidShape {
            rows,
            cols,
            reason: "index matrix must not be empty",
        });
    }
    if rows % TILE_ROWS != 0 {
        return Err(E8pError::InvalidShape {
            rows,
            cols,
            reason: "row count must be a multiple of 16",
        });
    }
    if cols % TILE_COLS != 0 {
        return Err(E8pError::InvalidShape {
            rows,
            cols,
            reason: "column count must be a multiple of 8",
        });
    }
    Ok(())
}

/// Offset of tile `(tile_row, tile_col)` in the packed word buffer.
#[inline]
fn word_offset(tile_row: usize, tile_col: usize, index_cols: usize) -> usize {
    let block_cols = index_cols / TILE_COLS;
    let (block_row, ai) = (tile_row / BLOCK_ROWS, tile_row % BLOCK_ROWS);
    let (block_col, bi) = (tile_col / BLOCK_COLS, tile_col % BLOCK_COLS);
    ((block_row * block_cols + block_col) * BLOCK_ROWS + ai) * BLOCK_COLS + bi
}

/// Pack an index matrix whose row count is a multiple of 16 and column count
/// a multiple of 8.
pub fn pack_indices(indices: &IndexMatrix) -> Result<PackedIndexMatrix, E8pError> {
    let (rows, cols) = (indices.rows(), indices.cols());
    check_tiling(rows, cols)?;

    let tile_cols = cols / 2;
    let block_cols = cols / TILE_COLS;
    let mut words = vec![0u64; rows * cols / PACKSZ];

    words
        .par_chunks_mut(BLOCK_ROWS * tile_cols)
        .enumerate()
        .for_each(|(block_row, chunk)| {
            for block_col in 0..block_cols {
                for ai in 0..BLOCK_ROWS {
                    for bi in 0..BLOCK_COLS {
                        let r = 2 * (block_row * BLOCK_ROWS + ai);
                        let c = 2 * (block_col * BLOCK_COLS + bi);
                        let members = [
                            indices.get(r, c),
                            indices.get(r + 1, c),
                            indices.get(r, c + 1),
                            indices.get(r + 1, c + 1),
                        ];
                        chunk[(block_col * BLOCK_ROWS + ai) * BLOCK_COLS + bi] =
                            pack_tile(members);
                    }
                }
            }
        });

    tracing::trace!(rows, cols, words = words.len(), "packed index matrix");

    Ok(PackedIndexMatrix {
        index_rows: rows,
        index_cols: cols,
        words,
    })
}

/// Recover the index matrix from its packed form.
pub fn unpack_indices(packed: &PackedIndexMatrix) -> IndexMatrix {
    let (rows, cols) = (packed.index_rows, packed.index_cols);
    let mut data = vec![0u16; rows * cols];
    for tile_row in 0..rows / 2 {
        for tile_col in 0..cols / 2 {
            let word = packed.words[word_offset(tile_row, tile_col, cols)];
            let [m0, m1, m2, m3] = unpack_tile(word);
            let (r, c) = (2 * tile_row, 2 * tile_col);
            data[r * cols + c] = m0;
            data[(r + 1) * cols + c] = m1;
            data[r * cols + c + 1] = m2;
            data[(r + 1) * cols + c + 1] = m3;
        }
    }
    IndexMatrix::new(rows, cols, data).expect("unpacked data matches packed shape")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashed_indices(rows: usize, cols: usize) -> IndexMatrix {
        let data = (0..rows * cols)
            .map(|k| (((k as u64) * 2_654_435_761) >> 7) as u16)
            .collect();
        IndexMatrix::new(rows, cols, data).unwrap()
    }

    #[test]
    fn tile_layout_matches_literal_word() {
        let word = pack_tile([0x01FF, 0x0200, 0x0301, 0x0480]);
        assert_eq!(word, 0x9111_1115_0403_0201);
        assert_eq!(unpack_tile(word), [0x01FF, 0x0200, 0x0301, 0x0480]);
    }

    #[test]
    fn single_block_matches_literal_words() {
        let mut data = vec![0u16; 16 * 8];
        data[0] = 0x01FF;
        data[8] = 0x0200;
        data[1] = 0x0301;
        data[9] = 0x0480;
        let indices = IndexMatrix::new(16, 8, data).unwrap();
        let packed = pack_indices(&indices).unwrap();
        assert_eq!(packed.words().len(), 32);
        assert_eq!((packed.rows(), packed.cols()), (16, 2));
        assert_eq!(packed.block_shape(), [1, 1, 8, 4]);
        assert_eq!(packed.words()[0], 0x9111_1115_0403_0201);
        assert!(packed.words()[1..].iter().all(|&w| w == 0));
    }

    #[test]
    fn hashed_block_matches_literal_words() {
        let indices = hashed_indices(16, 8);
        assert_eq!(&indices.as_slice()[..8], &[0, 28403, 56806, 19674, 48077, 10944, 39348, 2215]);
        let packed = pack_indices(&indices).unwrap();
        assert_eq!(
            &packed.words()[..4],
            &[
                0xe446_a8e6_e66e_7700,
                0x7d9c_495a_c44c_55dd,
                0x5f28_b189_a22a_33bb,
                0x5a51_27e6_8008_1199,
            ]
        );
        let sum = packed.words().iter().fold(0u64, |acc, w| acc.wrapping_add(*w));
        assert_eq!(sum, 0x8796_6083_131f_3634);
    }

    #[test]
    fn blocks_are_laid_out_row_major() {
        let data = (0..32 * 16).map(|k| k as u16).collect();
        let indices = IndexMatrix::new(32, 16, data).unwrap();
        let packed = pack_indices(&indices).unwrap();
        assert_eq!(packed.words().len(), 128);
        assert_eq!(packed.block_shape(), [2, 2, 8, 4]);
        assert_eq!(packed.words()[0], 0x000a_000c_0000_0000);
        assert_eq!(packed.words()[1], 0x000a_00fc_0000_0000);
        assert_eq!(packed.words()[32], 0x000a_f00c_0000_0000);
        assert_eq!(packed.words()[64], 0x000a_000c_0101_0101);
    }

    #[test]
    fn unpack_inverts_pack() {
        let indices = hashed_indices(48, 24);
        let packed = pack_indices(&indices).unwrap();
        assert_eq!(unpack_indices(&packed), indices);
    }

    #[test]
    fn rejects_untileable_shapes() {
        let indices = IndexMatrix::new(8, 8, vec![0; 64]).unwrap();
        assert!(matches!(
            pack_indices(&indices),
            Err(E8pError::InvalidShape { rows: 8, cols: 8, .. })
        ));
        let indices = IndexMatrix::new(16, 4, vec![0; 64]).unwrap();
        assert!(pack_indices(&indices).is_err());
        assert!(PackedIndexMatrix::from_words(16, 8, vec![0; 31]).is_err());
    }
}
