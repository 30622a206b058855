//! Process-wide caches and free helper functions.
//!
//! Grounded in `wavelet_utils.h`/`sources/wavelet_utils.cc`: a module-level
//! filter-matrix cache plus `DecompositionSize`, `Distance`, and
//! `EnergyDistribution`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::parameters::{WaveletParameters, WaveletType};
use crate::primitives::Matrix;
use crate::wavelet::{daubechies_mat, filters_for, transpose, MatrixPadding};

/// The forward convolution matrices for each decomposition step, for a
/// single axis.
pub type MatrixStack = Vec<Matrix>;

/// Cache key: a `WaveletParameters`' decomposition pyramid only ever depends
/// on the wavelet family, its depth, and the (padded) length of the axis
/// being transformed — not on channel count or the other axis' length. Each
/// axis gets its own dense matrix here, so the key can stay this narrow
/// rather than covering the whole parameter set.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct MatrixCacheKey {
    wavelet_type: WaveletType,
    decomposition_steps: usize,
    axis_len: usize,
}

static FORWARD_CACHE: Lazy<Mutex<BTreeMap<MatrixCacheKey, MatrixStack>>> = Lazy::new(|| Mutex::new(BTreeMap::new()));
static TRANSPOSED_CACHE: Lazy<Mutex<BTreeMap<MatrixCacheKey, MatrixStack>>> = Lazy::new(|| Mutex::new(BTreeMap::new()));

/// Returns the convolution matrix stack for one axis of `padded_shape`,
/// building and caching it on first use. The cache only grows for the
/// process's lifetime; entries are never evicted.
pub fn matrices_for(parameters: &WaveletParameters, padded_shape: &[usize], axis: usize) -> MatrixStack {
    build_or_fetch(&FORWARD_CACHE, parameters, padded_shape, axis, false)
}

/// Same as [`matrices_for`] but pre-transposed, for the compose direction.
pub fn transposed_matrices_for(parameters: &WaveletParameters, padded_shape: &[usize], axis: usize) -> MatrixStack {
    build_or_fetch(&TRANSPOSED_CACHE, parameters, padded_shape, axis, true)
}

fn build_or_fetch(
    cache: &Lazy<Mutex<BTreeMap<MatrixCacheKey, MatrixStack>>>,
    parameters: &WaveletParameters,
    padded_shape: &[usize],
    axis: usize,
    transposed: bool,
) -> MatrixStack {
    let key = MatrixCacheKey {
        wavelet_type: parameters.wavelet_type(),
        decomposition_steps: parameters.decomposition_steps(),
        axis_len: padded_shape[axis],
    };

    let mut guard = cache.lock().expect("filter matrix cache mutex poisoned");
    if let Some(stack) = guard.get(&key) {
        return stack.clone();
    }

    let filters = filters_for(parameters.wavelet_type());
    let mut stack = Vec::with_capacity(parameters.decomposition_steps());
    for step in 0..parameters.decomposition_steps() {
        let divider = 1usize << step;
        let size = padded_shape[axis] / divider;
        let mut mat = daubechies_mat(size, &filters.lo_d, &filters.hi_d, MatrixPadding::Periodized);
        if transposed {
            mat = transpose(&mat);
        }
        stack.push(mat);
    }

    guard.insert(key, stack.clone());
    stack
}

/// Number of subbands a fully decomposed buffer holds:
/// `decomposition_steps * subbands_per_transform + 1`.
pub fn decomposition_size(parameters: &WaveletParameters) -> usize {
    parameters.decomposition_steps() * parameters.subbands_per_transform() + 1
}

/// The smallest multiple of `2^steps` that is `>= side`, matching
/// `CalcPaddedSize`.
pub fn padded_size(side: usize, steps: usize) -> usize {
    let divider = 1usize << steps;
    divider * ((side.saturating_sub(1)) / divider + 1)
}

/// Mean squared difference between two equally shaped decompositions,
/// normalized by `signal_number * product(signal_shape)`. Returns `NaN` if
/// the two sets of subbands don't have a matching decomposition depth.
pub fn distance(lhs: &[Vec<Matrix>], rhs: &[Vec<Matrix>], signal_shape: &[usize]) -> f64 {
    if lhs.len() != rhs.len() {
        return f64::NAN;
    }
    let mut total = 0.0f64;
    for (channel_a, channel_b) in lhs.iter().zip(rhs.iter()) {
        if channel_a.len() != channel_b.len() {
            return f64::NAN;
        }
        for (a, b) in channel_a.iter().zip(channel_b.iter()) {
            let diff = a - b;
            total += diff.energy();
        }
    }
    let normalizer = lhs.len() as f64 * signal_shape.iter().product::<usize>() as f64;
    total / normalizer
}

/// Per-channel, per-subband energy (`sum(sample^2)`, accumulated in `f64`).
pub fn energy_distribution(decompositions: &[Vec<Matrix>]) -> Vec<Vec<f64>> {
    decompositions
        .iter()
        .map(|channel| channel.iter().map(|subband| subband.energy()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::WaveletType;

    #[test]
    fn decomposition_size_matches_formula() {
        let params = WaveletParameters::new(vec![8], 1, 2, WaveletType::D1).unwrap();
        assert_eq!(decomposition_size(&params), 3);

        let params2d = WaveletParameters::new(vec![8, 8], 1, 2, WaveletType::D1).unwrap();
        assert_eq!(decomposition_size(&params2d), 2 * 3 + 1);
    }

    #[test]
    fn padded_size_rounds_up_to_multiple() {
        assert_eq!(padded_size(9, 2), 12);
        assert_eq!(padded_size(8, 2), 8);
    }

    #[test]
    fn distance_is_nan_for_mismatched_depth() {
        let lhs = vec![vec![Matrix::zeros(2, 2)]];
        let rhs = vec![vec![Matrix::zeros(2, 2), Matrix::zeros(2, 2)]];
        assert!(distance(&lhs, &rhs, &[2, 2]).is_nan());
    }

    #[test]
    fn distance_is_zero_for_identical_decompositions() {
        let a = vec![vec![Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0])]];
        let b = a.clone();
        assert_eq!(distance(&a, &b, &[2, 2]), 0.0);
    }

    #[test]
    fn matrix_cache_reuses_built_stack() {
        let params = WaveletParameters::new(vec![8], 1, 2, WaveletType::D1).unwrap();
        let first = matrices_for(&params, &[8], 0);
        let second = matrices_for(&params, &[8], 0);
        assert_eq!(first.len(), second.len());
    }
}
