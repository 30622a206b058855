//! Sparse matrix compression: delta+varint index coding plus a
//! precision-bounded float codec for the non-zero values.
//!
//! Grounded in `matrix_compressor.h`/`matrix_compressor.cc`: `ArchivedMatrix`
//! carries the matrix shape, the non-zero count, and the two independently
//! encoded byte streams (`indexes`, `values`).

mod float_codec;
mod varint;

use crate::error::{Error, Result};
use crate::primitives::Matrix;

/// A compressed sparse matrix: shape plus two encoded byte streams.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchivedMatrix {
    pub rows: usize,
    pub cols: usize,
    pub nonzero: usize,
    pub indexes: Vec<u8>,
    pub values: Vec<u8>,
}

/// Extracts `(flat_index, value)` pairs from `matrix` in row-major order.
fn to_csr(matrix: &Matrix) -> (Vec<u32>, Vec<f32>) {
    let mut indexes = Vec::new();
    let mut values = Vec::new();
    for (flat, &value) in matrix.as_slice().iter().enumerate() {
        if value != 0.0 {
            indexes.push(flat as u32);
            values.push(value);
        }
    }
    (indexes, values)
}

/// Compresses `matrix`'s non-zero elements at the given `precision`
/// (`1..=16`, higher keeps more mantissa bits). Rejects matrices with no
/// non-zero elements, mirroring `ConvertToCSR`'s `invalid_argument` on an
/// empty matrix.
pub fn compress(matrix: &Matrix, precision: u8) -> Result<ArchivedMatrix> {
    let (indexes, values) = to_csr(matrix);
    if indexes.is_empty() {
        return Err(Error::EncodeError("cannot compress a matrix with no non-zero elements".into()));
    }

    Ok(ArchivedMatrix {
        rows: matrix.rows(),
        cols: matrix.cols(),
        nonzero: indexes.len(),
        indexes: varint::encode_indexes(&indexes),
        values: float_codec::encode(&values, precision),
    })
}

/// Reconstructs a dense matrix from an [`ArchivedMatrix`].
pub fn decompress(archive: &ArchivedMatrix) -> Result<Matrix> {
    if archive.nonzero == 0 {
        return Err(Error::DecodeError("archived matrix has zero non-zero elements".into()));
    }
    let indexes = varint::decode_indexes(&archive.indexes, archive.nonzero);
    let values = float_codec::decode(&archive.values);
    if values.len() != archive.nonzero {
        return Err(Error::DecodeError(format!(
            "expected {} values, decoded {}",
            archive.nonzero,
            values.len()
        )));
    }

    let mut matrix = Matrix::zeros(archive.rows, archive.cols);
    let slice = matrix.as_mut_slice();
    for (&index, &value) in indexes.iter().zip(values.iter()) {
        slice[index as usize] = value;
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_all_zero_matrix() {
        let m = Matrix::zeros(3, 3);
        assert!(compress(&m, 8).is_err());
    }

    #[test]
    fn round_trips_sparse_matrix_at_full_precision() {
        let mut m = Matrix::zeros(4, 4);
        m[(0, 0)] = 1.5;
        m[(2, 3)] = -7.25;
        m[(3, 3)] = 42.0;
        let archive = compress(&m, 1).unwrap();
        let decoded = decompress(&archive).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn precision_bounds_error() {
        let mut m = Matrix::zeros(1, 4);
        m[(0, 0)] = 10.0;
        m[(0, 1)] = -20.0;
        m[(0, 2)] = 30.0;
        m[(0, 3)] = -40.0;

        let archive = compress(&m, 8).unwrap();
        let decoded = decompress(&archive).unwrap();
        let error: f64 = (&decoded - &m).norm();
        let bound = 2f64.powi(1 - 8) * m.nonzero_count() as f64 * 40.0;
        assert!(error <= bound, "error {error} exceeded bound {bound}");
    }

    #[test]
    fn compressed_size_reflects_nonzero_count() {
        let mut m = Matrix::zeros(2, 2);
        m[(0, 0)] = 1.0;
        m[(1, 1)] = 2.0;
        let archive = compress(&m, 16).unwrap();
        assert_eq!(archive.nonzero, 2);
    }
}
