//! Daubechies filter generation and the forward/inverse wavelet transforms.
//!
//! Grounded in `wavelet.h`/`sources/wavelet.cc`: `dbwavf` (hardcoded scaling
//! coefficients), `Orthfilt` (quadrature mirror filter derivation),
//! `DaubechiesMat` (sparse convolution matrix, periodized or
//! zero-derivative-padded), and the raw-convolution / matrix-convolution
//! forms of `dwt`/`idwt` and their 2-D counterparts `dwt2`/`idwt2`.

use crate::parameters::WaveletType;
use crate::primitives::Matrix;

/// How a [`DaubechiesMat`] treats the signal boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatrixPadding {
    /// Wrap around (as if the signal were periodic).
    Periodized,
    /// Fold overflowing taps onto the first/last column.
    ZeroDerivative,
}

/// The four filters derived from a wavelet's scaling coefficients.
#[derive(Clone, Debug)]
pub struct QuadratureFilters {
    pub lo_d: Vec<f64>,
    pub hi_d: Vec<f64>,
    pub lo_r: Vec<f64>,
    pub hi_r: Vec<f64>,
}

/// Daubechies scaling coefficients (normalized to sum to 1), for orders
/// D1 through D5. `Orthfilt` rescales these by `sqrt(2)` to the standard
/// orthonormal form.
fn dbwavf(order: usize) -> Vec<f64> {
    let sqrt2 = std::f64::consts::SQRT_2;
    let sum_sqrt2: &[f64] = match order {
        1 => &[std::f64::consts::FRAC_1_SQRT_2, std::f64::consts::FRAC_1_SQRT_2],
        2 => &[
            0.48296291314469025,
            0.836516303737469,
            0.22414386804185735,
            -0.12940952255092145,
        ],
        3 => &[
            0.3326705529509569,
            0.8068915093133388,
            0.4598775021193313,
            -0.13501102001039084,
            -0.08544127388224149,
            0.035226291882100656,
        ],
        4 => &[
            0.23037781330885523,
            0.7148465705525415,
            0.6308807679358788,
            -0.02798376941698385,
            -0.18703481171888114,
            0.030841381835986965,
            0.032883011666982945,
            -0.010597401784997278,
        ],
        5 => &[
            0.160102397974125,
            0.6038292697974729,
            0.7243085284385744,
            0.13842814590132074,
            -0.24229488706619015,
            -0.03224486958502952,
            0.07757149384006515,
            -0.006241490213011705,
            -0.012580751999015526,
            0.003335725285001549,
        ],
        other => panic!("unsupported wavelet order {other}"),
    };
    sum_sqrt2.iter().map(|&c| c / sqrt2).collect()
}

fn qmf(w: &[f64]) -> Vec<f64> {
    let mut rev: Vec<f64> = w.iter().rev().copied().collect();
    let start = if w.len() % 2 == 0 { 1 } else { 2 };
    let mut i = start;
    while i < rev.len() {
        rev[i] = -rev[i];
        i += 2;
    }
    rev
}

/// Derives `{Lo_D, Hi_D, Lo_R, Hi_R}` from a wavelet's scaling filter.
pub fn orthfilt(w_in: &[f64]) -> QuadratureFilters {
    let sqrt2 = std::f64::consts::SQRT_2;
    let lo_r: Vec<f64> = w_in.iter().map(|&w| w * sqrt2).collect();
    let hi_r = qmf(&lo_r);
    let lo_d: Vec<f64> = lo_r.iter().rev().copied().collect();
    let hi_d: Vec<f64> = hi_r.iter().rev().copied().collect();
    QuadratureFilters { lo_d, hi_d, lo_r, hi_r }
}

/// Builds the quadrature mirror filters for a wavelet type. Panics for
/// [`WaveletType::None`], which never needs one.
pub fn filters_for(wavelet_type: WaveletType) -> QuadratureFilters {
    orthfilt(&dbwavf(wavelet_type.order()))
}

/// Builds a dense `n x n` convolution matrix whose top half rows convolve
/// with `lo_d` and bottom half rows convolve with `hi_d`, i.e.
/// `M * signal = [low; high]`.
pub fn daubechies_mat(n: usize, lo_d: &[f64], hi_d: &[f64], padding: MatrixPadding) -> Matrix {
    assert!(n % 2 == 0, "matrix size must be even");
    let half = n / 2;
    let mut mat = Matrix::zeros(n, n);

    match padding {
        MatrixPadding::Periodized => {
            for i in 0..half {
                for (k, &c) in lo_d.iter().enumerate() {
                    let col = (2 * i + k) % n;
                    mat[(i, col)] += c as f32;
                }
                for (k, &c) in hi_d.iter().enumerate() {
                    let col = (2 * i + k) % n;
                    mat[(half + i, col)] += c as f32;
                }
            }
        }
        MatrixPadding::ZeroDerivative => {
            let padding_size = lo_d.len() - 1;
            let left_padding = (padding_size / 2) as isize;
            for i in 0..half {
                for (k, &c) in lo_d.iter().enumerate() {
                    let col = fold_column(2 * i as isize + k as isize - left_padding, n);
                    mat[(i, col)] += c as f32;
                }
                for (k, &c) in hi_d.iter().enumerate() {
                    let col = fold_column(2 * i as isize + k as isize - left_padding, n);
                    mat[(half + i, col)] += c as f32;
                }
            }
        }
    }

    mat
}

fn fold_column(target: isize, n: usize) -> usize {
    if target < 0 {
        0
    } else if target >= n as isize {
        n - 1
    } else {
        target as usize
    }
}

/// Raw-convolution forward transform: directly convolves `signal` with
/// `lo_d`/`hi_d` using periodic wraparound, without materializing a matrix.
pub fn dwt_raw(signal: &[f32], lo_d: &[f64], hi_d: &[f64]) -> (Vec<f32>, Vec<f32>) {
    let n = signal.len();
    assert!(n % 2 == 0, "signal length must be even");
    let half = n / 2;
    let mut low = vec![0.0f32; half];
    let mut high = vec![0.0f32; half];
    for i in 0..half {
        let mut lsum = 0.0f64;
        let mut hsum = 0.0f64;
        for (j, (&lc, &hc)) in lo_d.iter().zip(hi_d.iter()).enumerate() {
            let index = (2 * i + j) % n;
            lsum += lc * signal[index] as f64;
            hsum += hc * signal[index] as f64;
        }
        low[i] = lsum as f32;
        high[i] = hsum as f32;
    }
    (low, high)
}

/// Raw-convolution inverse transform, the exact counterpart of [`dwt_raw`].
pub fn idwt_raw(low: &[f32], high: &[f32], lo_r: &[f64], hi_r: &[f64]) -> Vec<f32> {
    let half = low.len();
    let n = half * 2;
    let pad = lo_r.len() - 1;
    let i0 = n as isize - (pad as isize) / 2;
    let mut out = vec![0.0f32; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let j0: isize = if i % 2 == 0 { 1 } else { 0 };
        let mut sum = 0.0f64;
        let mut j = 0isize;
        while (j0 + j) < lo_r.len() as isize {
            let idx = (i0 + (i as isize) / 2 + j / 2).rem_euclid(half as isize) as usize;
            let coeff_idx = (j0 + j) as usize;
            sum += lo_r[coeff_idx] * low[idx] as f64 + hi_r[coeff_idx] * high[idx] as f64;
            j += 2;
        }
        *slot = sum as f32;
    }
    out
}

/// Matrix-convolution forward transform: a single matrix-vector product
/// against a full `n x n` [`daubechies_mat`].
pub fn dwt_matrix(signal: &[f32], dmat: &Matrix) -> (Vec<f32>, Vec<f32>) {
    let n = signal.len();
    let half = n / 2;
    let mut out = vec![0.0f32; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let row = dmat.row(i);
        let mut sum = 0.0f64;
        for (j, &s) in signal.iter().enumerate() {
            sum += row[j] as f64 * s as f64;
        }
        *slot = sum as f32;
    }
    (out[..half].to_vec(), out[half..].to_vec())
}

/// Matrix-convolution inverse transform using the transpose of the forward
/// matrix.
pub fn idwt_matrix(low: &[f32], high: &[f32], dmat_transposed: &Matrix) -> Vec<f32> {
    let n = low.len() + high.len();
    let mut stacked = Vec::with_capacity(n);
    stacked.extend_from_slice(low);
    stacked.extend_from_slice(high);

    let mut out = vec![0.0f32; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let row = dmat_transposed.row(i);
        let mut sum = 0.0f64;
        for (j, &s) in stacked.iter().enumerate() {
            sum += row[j] as f64 * s as f64;
        }
        *slot = sum as f32;
    }
    out
}

/// Transposes a matrix, used to turn a forward [`daubechies_mat`] into the
/// matrix [`idwt_matrix`] needs.
pub fn transpose(m: &Matrix) -> Matrix {
    let mut out = Matrix::zeros(m.cols(), m.rows());
    for i in 0..m.rows() {
        for j in 0..m.cols() {
            out[(j, i)] = m[(i, j)];
        }
    }
    out
}

/// The four quadrants produced by a single 2-D wavelet step: low-low
/// (approximation), low-high, high-low, and high-high (all three details).
pub struct Quadrants {
    pub ll: Matrix,
    pub lh: Matrix,
    pub hl: Matrix,
    pub hh: Matrix,
}

/// Separable 2-D forward transform: columns first, then rows, each via
/// [`dwt_matrix`].
pub fn dwt2(signal: &Matrix, dmat_cols: &Matrix, dmat_rows: &Matrix) -> Quadrants {
    let rows = signal.rows();
    let cols = signal.cols();
    let half_cols = cols / 2;
    let half_rows = rows / 2;

    // Transform along the width (each row is a signal).
    let mut stage1 = Matrix::zeros(rows, cols);
    for i in 0..rows {
        let (low, high) = dwt_matrix(signal.row(i), dmat_cols);
        for (j, v) in low.iter().chain(high.iter()).enumerate() {
            stage1[(i, j)] = *v;
        }
    }

    // Transform along the height (each column is a signal).
    let mut ll = Matrix::zeros(half_rows, half_cols);
    let mut lh = Matrix::zeros(half_rows, half_cols);
    let mut hl = Matrix::zeros(half_rows, half_cols);
    let mut hh = Matrix::zeros(half_rows, half_cols);
    for j in 0..cols {
        let column = stage1.column(j);
        let (low, high) = dwt_matrix(&column, dmat_rows);
        if j < half_cols {
            ll.set_column(j, &low);
            hl.set_column(j, &high);
        } else {
            lh.set_column(j - half_cols, &low);
            hh.set_column(j - half_cols, &high);
        }
    }

    Quadrants { ll, lh, hl, hh }
}

/// Exact inverse of [`dwt2`].
pub fn idwt2(quadrants: &Quadrants, dmat_cols_t: &Matrix, dmat_rows_t: &Matrix) -> Matrix {
    let half_rows = quadrants.ll.rows();
    let half_cols = quadrants.ll.cols();
    let cols = half_cols * 2;
    let rows = half_rows * 2;

    let mut stage1 = Matrix::zeros(rows, cols);
    for j in 0..half_cols {
        let low = quadrants.ll.column(j);
        let high = quadrants.hl.column(j);
        let column = idwt_matrix(&low, &high, dmat_rows_t);
        stage1.set_column(j, &column);
    }
    for j in 0..half_cols {
        let low = quadrants.lh.column(j);
        let high = quadrants.hh.column(j);
        let column = idwt_matrix(&low, &high, dmat_rows_t);
        stage1.set_column(half_cols + j, &column);
    }

    let mut out = Matrix::zeros(rows, cols);
    for i in 0..rows {
        let row = stage1.row(i);
        let low = &row[..half_cols];
        let high = &row[half_cols..];
        let reconstructed = idwt_matrix(low, high, dmat_cols_t);
        out.row_mut(i).copy_from_slice(&reconstructed);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orthfilt_preserves_filter_length() {
        let filters = filters_for(WaveletType::D2);
        assert_eq!(filters.lo_d.len(), 4);
        assert_eq!(filters.hi_d.len(), 4);
        assert_eq!(filters.lo_r.len(), 4);
        assert_eq!(filters.hi_r.len(), 4);
    }

    #[test]
    fn dwt_idwt_raw_round_trip() {
        let filters = filters_for(WaveletType::D2);
        let signal: Vec<f32> = vec![1.0, 3.0, -2.0, 5.0, 0.5, -1.5, 2.0, 4.0];
        let (low, high) = dwt_raw(&signal, &filters.lo_d, &filters.hi_d);
        let reconstructed = idwt_raw(&low, &high, &filters.lo_r, &filters.hi_r);
        for (a, b) in signal.iter().zip(reconstructed.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn dwt_idwt_matrix_round_trip() {
        let filters = filters_for(WaveletType::D1);
        let n = 8;
        let dmat = daubechies_mat(n, &filters.lo_d, &filters.hi_d, MatrixPadding::Periodized);
        let dmat_t = transpose(&dmat);
        let signal: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let (low, high) = dwt_matrix(&signal, &dmat);
        let reconstructed = idwt_matrix(&low, &high, &dmat_t);
        for (a, b) in signal.iter().zip(reconstructed.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn dwt2_idwt2_round_trip() {
        let filters = filters_for(WaveletType::D1);
        let n = 4;
        let dmat = daubechies_mat(n, &filters.lo_d, &filters.hi_d, MatrixPadding::Periodized);
        let dmat_t = transpose(&dmat);
        let signal = Matrix::from_vec(
            n,
            n,
            (0..n * n).map(|v| v as f32).collect(),
        );
        let quadrants = dwt2(&signal, &dmat, &dmat);
        let reconstructed = idwt2(&quadrants, &dmat_t, &dmat_t);
        for (a, b) in signal.iter().zip(reconstructed.iter()) {
            assert!((a - b).abs() < 1e-2, "{a} vs {b}");
        }
    }
}
