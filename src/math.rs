use rayon::prelude::*;

use crate::lattice::{LatticePoint, CODESZ};

/// Compute the dot product between two codeword-sized vectors.
#[inline]
pub fn dot(a: &LatticePoint, b: &LatticePoint) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute the squared L2 norm of a vector.
#[inline]
pub fn l2_norm_sqr(v: &LatticePoint) -> f32 {
    dot(v, v)
}

/// Compute the squared Euclidean distance between two vectors.
#[inline]
pub fn l2_distance_sqr(a: &LatticePoint, b: &LatticePoint) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Copy an 8-wide slice into a fixed-size point. Callers validate the width.
#[inline]
pub fn to_point(values: &[f32]) -> LatticePoint {
    let mut point = [0.0f32; CODESZ];
    point.copy_from_slice(values);
    point
}

/// Index of the grid row maximising `2 <x, g> - |g|^2`, i.e. the row closest
/// to `query`. Ties resolve to the lowest row index.
#[inline]
pub fn nearest_row(query: &LatticePoint, grid: &[LatticePoint], grid_norms: &[f32]) -> usize {
    debug_assert_eq!(grid.len(), grid_norms.len());
    let mut best_idx = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (idx, (row, &norm)) in grid.iter().zip(grid_norms).enumerate() {
        let score = 2.0 * dot(query, row) - norm;
        if score > best_score {
            best_score = score;
            best_idx = idx;
        }
    }
    best_idx
}

/// Round every query to its nearest grid row, returning the codeword and its
/// row index.
pub fn round_batch(
    queries: &[LatticePoint],
    grid: &[LatticePoint],
    grid_norms: &[f32],
) -> Vec<(LatticePoint, usize)> {
    queries
        .par_iter()
        .map(|query| {
            let idx = nearest_row(query, grid, grid_norms);
            (grid[idx], idx)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_row_prefers_closest_row() {
        let grid = [[0.0; 8], [1.0; 8], [-1.0; 8]];
        let norms = grid.map(|g| l2_norm_sqr(&g));
        assert_eq!(nearest_row(&[0.9; 8], &grid, &norms), 1);
        assert_eq!(nearest_row(&[-0.6; 8], &grid, &norms), 2);
        assert_eq!(nearest_row(&[0.1; 8], &grid, &norms), 0);
    }

    #[test]
    fn nearest_row_breaks_ties_towards_lowest_index() {
        let grid = [[1.0; 8], [-1.0; 8], [1.0; 8]];
        let norms = grid.map(|g| l2_norm_sqr(&g));
        assert_eq!(nearest_row(&[0.0; 8], &grid, &norms), 0);
        assert_eq!(nearest_row(&[2.0; 8], &grid, &norms), 0);
    }

    #[test]
    fn round_batch_matches_exhaustive_distance() {
        let grid: Vec<LatticePoint> = (0..16)
            .map(|i| {
                let mut p = [0.0f32; 8];
                p[i % 8] = if i < 8 { 1.5 } else { -1.5 };
                p
            })
            .collect();
        let norms: Vec<f32> = grid.iter().map(l2_norm_sqr).collect();
        let queries = vec![
            [0.1, 0.0, 0.0, 1.2, 0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -2.0, 0.3],
        ];
        for ((value, idx), query) in round_batch(&queries, &grid, &norms).iter().zip(&queries) {
            let best = (0..grid.len())
                .min_by(|&a, &b| {
                    l2_distance_sqr(query, &grid[a]).total_cmp(&l2_distance_sqr(query, &grid[b]))
                })
                .unwrap();
            assert_eq!(*idx, best);
            assert_eq!(*value, grid[best]);
        }
    }
}
