//! Dense row-major matrices of real values and of 16-bit codeword indices.

use crate::E8pError;

/// Row-major `rows x cols` matrix of `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, E8pError> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(E8pError::DimensionMismatch {
                expected: rows.saturating_mul(cols),
                got: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build from equally sized rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, E8pError> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(E8pError::DimensionMismatch {
                    expected: cols,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        if self.cols == 0 {
            return vec![Vec::new(); self.rows];
        }
        self.data.chunks_exact(self.cols).map(<[f32]>::to_vec).collect()
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Row-major `rows x cols` matrix of 16-bit codeword indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMatrix {
    rows: usize,
    cols: usize,
    data: Vec<u16>,
}

impl IndexMatrix {
    pub fn new(rows: usize, cols: usize, data: Vec<u16>) -> Result<Self, E8pError> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(E8pError::DimensionMismatch {
                expected: rows.saturating_mul(cols),
                got: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u16 {
        self.data[row * self.cols + col]
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inconsistent_lengths() {
        assert!(Matrix::new(2, 3, vec![0.0; 5]).is_err());
        assert!(IndexMatrix::new(2, 2, vec![0; 4]).is_ok());
        assert!(Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn rows_roundtrip() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let matrix = Matrix::from_rows(&rows).unwrap();
        assert_eq!(matrix.rows(), 3);
        assert_eq!(matrix.row(1), &[3.0, 4.0]);
        assert_eq!(matrix.to_rows(), rows);
    }
}
