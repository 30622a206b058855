//! Signal padding and its exact inverse (crop).
//!
//! Grounded in `padding.h`/`sources/padding.cc`. The wavelet transform needs
//! its input dimensions to be a multiple of `2^steps`; padding grows a
//! signal to that size and `crop` removes exactly what was added.

use crate::primitives::{Matrix, Vector};

/// Which side of the signal absorbs the size delta.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PaddingLocation {
    /// All padding goes on the trailing (right/bottom) edge.
    Right,
    /// Padding is split evenly, with any odd remainder going to the
    /// trailing edge (`right = dc/2 + dc%2`).
    Both,
}

/// How padded samples are filled in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PaddingAlgorithm {
    /// Padded samples are zero.
    Zero,
    /// Padded samples repeat the nearest edge value (corners repeat the
    /// nearest corner), approximating a zero second derivative across the
    /// seam.
    ZeroDerivative,
}

fn split(delta: usize, location: PaddingLocation) -> (usize, usize) {
    match location {
        PaddingLocation::Right => (0, delta),
        PaddingLocation::Both => {
            let before = delta / 2;
            (before, delta - before)
        }
    }
}

/// Grows `source` to `rows x cols` according to `algorithm`/`location`.
///
/// `rows`/`cols` must each be `>= source`'s corresponding side.
pub fn extend(source: &Matrix, rows: usize, cols: usize, algorithm: PaddingAlgorithm, location: PaddingLocation) -> Matrix {
    assert!(rows >= source.rows() && cols >= source.cols());
    let (top, _bottom) = split(rows - source.rows(), location);
    let (left, _right) = split(cols - source.cols(), location);

    let mut out = Matrix::zeros(rows, cols);
    out.set_submatrix(top, left, source);

    if algorithm == PaddingAlgorithm::ZeroDerivative {
        let last_row = source.rows().saturating_sub(1);
        let last_col = source.cols().saturating_sub(1);

        // Repeat left/right edge columns across the padded rows that hold
        // real source data.
        for i in 0..source.rows() {
            let first = source[(i, 0)];
            let last = source[(i, last_col)];
            for j in 0..left {
                out[(top + i, j)] = first;
            }
            for j in (left + source.cols())..cols {
                out[(top + i, j)] = last;
            }
        }

        // Repeat top/bottom edge rows, including the corners, across every
        // padded column (already-filled real columns get overwritten with
        // the same value they already hold).
        for j in 0..cols {
            let source_col = j.min(left + last_col).saturating_sub(left).min(last_col);
            let top_value = source[(0, source_col)];
            let bottom_value = source[(last_row, source_col)];
            for i in 0..top {
                out[(i, j)] = top_value;
            }
            for i in (top + source.rows())..rows {
                out[(i, j)] = bottom_value;
            }
        }
    }

    out
}

/// The exact inverse of [`extend`]: removes the padding added to reach
/// `source`'s current shape, returning a `rows x cols` matrix.
pub fn crop(source: &Matrix, rows: usize, cols: usize, location: PaddingLocation) -> Matrix {
    assert!(rows <= source.rows() && cols <= source.cols());
    let (top, _) = split(source.rows() - rows, location);
    let (left, _) = split(source.cols() - cols, location);
    source.submatrix(top, left, rows, cols)
}

/// 1-D counterpart of [`extend`], implemented via the single-column matrix
/// representation.
pub fn extend_1d(source: &[f32], len: usize, algorithm: PaddingAlgorithm, location: PaddingLocation) -> Vector {
    let m = Matrix::from_column(source.to_vec());
    extend(&m, len, 1, algorithm, location).into_vec()
}

/// 1-D counterpart of [`crop`].
pub fn crop_1d(source: &[f32], len: usize, location: PaddingLocation) -> Vector {
    let m = Matrix::from_column(source.to_vec());
    crop(&m, len, 1, location).into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_extend_then_crop_is_identity() {
        let source = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let padded = extend(&source, 4, 6, PaddingAlgorithm::Zero, PaddingLocation::Both);
        let cropped = crop(&padded, 2, 3, PaddingLocation::Both);
        assert_eq!(cropped, source);
    }

    #[test]
    fn zero_extend_right_places_source_at_origin() {
        let source = Matrix::from_vec(1, 2, vec![1.0, 2.0]);
        let padded = extend(&source, 1, 4, PaddingAlgorithm::Zero, PaddingLocation::Right);
        assert_eq!(padded.as_slice(), &[1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn zero_derivative_repeats_edges_and_corners() {
        let source = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let padded = extend(&source, 4, 4, PaddingAlgorithm::ZeroDerivative, PaddingLocation::Both);
        // top-left corner repeats source[0,0]
        assert_eq!(padded[(0, 0)], 1.0);
        // bottom-right corner repeats source[1,1]
        assert_eq!(padded[(3, 3)], 4.0);
        // center still holds the original data
        assert_eq!(padded[(1, 1)], 1.0);
        assert_eq!(padded[(2, 2)], 4.0);
    }

    #[test]
    fn extend_1d_zero_derivative_repeats_last_sample() {
        let padded = extend_1d(&[1.0, 2.0, 3.0], 5, PaddingAlgorithm::ZeroDerivative, PaddingLocation::Right);
        assert_eq!(padded, vec![1.0, 2.0, 3.0, 3.0, 3.0]);
    }
}
