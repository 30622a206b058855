//! The central `WaveletBuffer` type: decomposes, composes, and serializes
//! one or more same-shaped signals as a pyramid of wavelet subbands.
//!
//! Grounded in `wavelet_buffer.h`/`sources/wavelet_buffer.cc`.

use std::fmt;

use crate::denoise::Denoiser;
use crate::error::{Error, Result};
use crate::padding::{self, PaddingAlgorithm, PaddingLocation};
use crate::parameters::WaveletParameters;
use crate::primitives::Matrix;
use crate::utils;
use crate::view::WaveletBufferView;
use crate::wavelet::{self, Quadrants};

/// Per-channel decomposition: an ordered sequence of subbands
/// (`decomposition_steps * subbands_per_transform + 1` of them).
pub type Decomposition = Vec<Matrix>;

/// A pyramid of wavelet subbands for one or more same-shaped channels.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveletBuffer {
    parameters: WaveletParameters,
    decompositions: Vec<Decomposition>,
}

const DEFAULT_ALGORITHM: PaddingAlgorithm = PaddingAlgorithm::ZeroDerivative;
const DEFAULT_LOCATION: PaddingLocation = PaddingLocation::Both;

impl WaveletBuffer {
    /// Creates an empty buffer (every subband a zero-size matrix) ready to
    /// receive a call to [`decompose`](Self::decompose).
    pub fn new(parameters: WaveletParameters) -> Result<Self> {
        let size = utils::decomposition_size(&parameters);
        let decompositions = (0..parameters.signal_number())
            .map(|_| vec![Matrix::zeros(0, 0); size])
            .collect();
        Ok(WaveletBuffer { parameters, decompositions })
    }

    /// Builds a buffer directly from already-decomposed subbands (e.g. when
    /// parsing a serialized container).
    pub fn from_decompositions(parameters: WaveletParameters, decompositions: Vec<Decomposition>) -> Result<Self> {
        if decompositions.len() != parameters.signal_number() {
            let err = Error::ShapeMismatch {
                expected: vec![parameters.signal_number()],
                actual: vec![decompositions.len()],
            };
            log::error!("{err}");
            return Err(err);
        }
        let expected_size = utils::decomposition_size(&parameters);
        for decomposition in &decompositions {
            if decomposition.len() != expected_size {
                let err = Error::ShapeMismatch {
                    expected: vec![expected_size],
                    actual: vec![decomposition.len()],
                };
                log::error!("{err}");
                return Err(err);
            }
        }
        Ok(WaveletBuffer { parameters, decompositions })
    }

    pub fn parameters(&self) -> &WaveletParameters {
        &self.parameters
    }

    pub fn decompositions(&self) -> &[Decomposition] {
        &self.decompositions
    }

    pub(crate) fn decompositions_mut(&mut self) -> &mut [Decomposition] {
        &mut self.decompositions
    }

    /// A buffer is empty when every subband of every channel is a zero-size
    /// matrix, matching `IsEmpty`.
    pub fn is_empty(&self) -> bool {
        self.decompositions
            .iter()
            .all(|channel| channel.iter().all(|subband| subband.is_empty()))
    }

    /// Total bytes occupied by non-zero subband elements, matching
    /// `CompressedSize`.
    pub fn compressed_size(&self) -> usize {
        self.decompositions
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|subband| subband.nonzero_count() * std::mem::size_of::<f32>())
            .sum()
    }

    /// The value range a subband's samples are expected to fall in:
    /// `(0, 2*delta)` for the final approximation, `(-delta, delta)` for a
    /// detail subband, where `delta` grows with decomposition depth.
    pub fn value_range(&self, index: usize) -> (f32, f32) {
        let size = utils::decomposition_size(&self.parameters);
        let is_approximation = index == size - 1;
        let delta = if is_approximation {
            2f32.powi(self.parameters.decomposition_steps().max(1) as i32 - 1)
        } else {
            2f32.powi((index / self.parameters.subbands_per_transform()) as i32)
        };
        if is_approximation {
            (0.0, 2.0 * delta)
        } else {
            (-delta, delta)
        }
    }

    /// Mean squared distance between two buffers with matching parameters.
    pub fn distance(&self, other: &Self) -> f64 {
        if self.parameters.signal_shape() != other.parameters.signal_shape()
            || self.parameters.signal_number() != other.parameters.signal_number()
        {
            return f64::NAN;
        }
        utils::distance(&self.decompositions, &other.decompositions, self.parameters.signal_shape())
    }

    /// Per-channel, per-subband energy.
    pub fn energy_distribution(&self) -> Vec<Vec<f64>> {
        if self.is_empty() {
            return Vec::new();
        }
        utils::energy_distribution(&self.decompositions)
    }

    /// Non-owning view over `count` channels starting at `start`. Mutable so
    /// the view can in turn decompose into its slice of channels.
    pub fn view(&mut self, start: usize, count: usize) -> Result<WaveletBufferView<'_>> {
        if start + count > self.parameters.signal_number() {
            let err = Error::OutOfRange(format!(
                "channel range [{start}, {}) exceeds signal_number {}",
                start + count,
                self.parameters.signal_number()
            ));
            log::warn!("{err}");
            return Err(err);
        }
        Ok(WaveletBufferView::new(self, start, count))
    }

    /// Decomposes `signals` (one matrix per channel, each matching
    /// `parameters().signal_shape()`) into this buffer's subband pyramid,
    /// denoising each detail subband as it's produced.
    pub fn decompose(&mut self, signals: &[Matrix], denoiser: &dyn Denoiser) -> Result<()> {
        if signals.len() != self.parameters.signal_number() {
            let err = Error::ShapeMismatch {
                expected: vec![self.parameters.signal_number()],
                actual: vec![signals.len()],
            };
            log::error!("{err}");
            return Err(err);
        }
        for signal in signals {
            let shape = signal_shape_of(signal, self.parameters.dimension());
            if shape != self.parameters.signal_shape() {
                let err = Error::ShapeMismatch {
                    expected: self.parameters.signal_shape().to_vec(),
                    actual: shape,
                };
                log::error!("{err}");
                return Err(err);
            }
        }

        for (channel_idx, signal) in signals.iter().enumerate() {
            let decomposition = if self.parameters.dimension() == 1 {
                self.decompose_1d(signal, denoiser)
            } else {
                self.decompose_2d(signal, denoiser)
            };
            self.decompositions[channel_idx] = decomposition;
        }
        Ok(())
    }

    pub(crate) fn decompose_1d(&self, signal: &Matrix, denoiser: &dyn Denoiser) -> Decomposition {
        let steps = self.parameters.decomposition_steps();
        let side = self.parameters.signal_shape()[0];
        let padded_len = utils::padded_size(side, steps);
        let mut remainder = padding::extend_1d(signal.column0().as_slice(), padded_len, DEFAULT_ALGORITHM, DEFAULT_LOCATION);

        let filters = wavelet::filters_for(self.parameters.wavelet_type());
        let mut subbands = Vec::with_capacity(steps + 1);
        for _ in 0..steps {
            let (low, high) = wavelet::dwt_raw(&remainder, &filters.lo_d, &filters.hi_d);
            let mut detail = Matrix::from_column(high);
            denoiser.denoise(&mut detail, subbands.len());
            subbands.push(detail);
            remainder = low;
        }
        subbands.push(Matrix::from_column(remainder));
        subbands
    }

    pub(crate) fn decompose_2d(&self, signal: &Matrix, denoiser: &dyn Denoiser) -> Decomposition {
        let steps = self.parameters.decomposition_steps();
        let shape = self.parameters.signal_shape();
        let padded_rows = utils::padded_size(shape[0], steps);
        let padded_cols = utils::padded_size(shape[1], steps);
        let padded_shape = [padded_rows, padded_cols];

        let mut remainder = padding::extend(signal, padded_rows, padded_cols, DEFAULT_ALGORITHM, DEFAULT_LOCATION);

        let cols_mats = utils::matrices_for(&self.parameters, &padded_shape, 1);
        let rows_mats = utils::matrices_for(&self.parameters, &padded_shape, 0);

        let mut subbands = Vec::with_capacity(steps * 3 + 1);
        for step in 0..steps {
            let quadrants = wavelet::dwt2(&remainder, &cols_mats[step], &rows_mats[step]);
            let mut lh = quadrants.lh;
            let mut hl = quadrants.hl;
            let mut hh = quadrants.hh;
            let step_index = subbands.len() / 3;
            denoiser.denoise(&mut lh, step_index);
            denoiser.denoise(&mut hl, step_index);
            denoiser.denoise(&mut hh, step_index);
            subbands.push(lh);
            subbands.push(hl);
            subbands.push(hh);
            remainder = quadrants.ll;
        }
        subbands.push(remainder);
        subbands
    }

    /// Reconstructs channel signals. `scale_factor` skips that many of the
    /// deepest reconstruction steps, returning a correspondingly
    /// downsampled signal instead of the full-resolution one (`0` means a
    /// full reconstruction).
    pub fn compose(&self, scale_factor: u32) -> Result<Vec<Matrix>> {
        let steps = self.parameters.decomposition_steps();
        let scale_factor = scale_factor as usize;
        if scale_factor > steps {
            let err = Error::OutOfRange(format!("scale_factor {scale_factor} exceeds decomposition_steps {steps}"));
            log::warn!("{err}");
            return Err(err);
        }

        let mut out = Vec::with_capacity(self.decompositions.len());
        for decomposition in &self.decompositions {
            let signal = if self.parameters.dimension() == 1 {
                self.compose_1d(decomposition, scale_factor)
            } else {
                self.compose_2d(decomposition, scale_factor)
            };
            out.push(signal);
        }
        Ok(out)
    }

    pub(crate) fn compose_1d(&self, decomposition: &Decomposition, scale_factor: usize) -> Matrix {
        let steps = self.parameters.decomposition_steps();
        let filters = wavelet::filters_for(self.parameters.wavelet_type());

        let mut low = decomposition[steps].column0();
        for step in (scale_factor..steps).rev() {
            let high = decomposition[step].column0();
            low = wavelet::idwt_raw(&low, &high, &filters.lo_r, &filters.hi_r);
        }

        let side = self.parameters.signal_shape()[0];
        if scale_factor == 0 {
            Matrix::from_column(padding::crop_1d(&low, side, DEFAULT_LOCATION))
        } else {
            let scaled_side = side >> scale_factor;
            let mut m = Matrix::from_column(padding::crop_1d(&low, scaled_side, DEFAULT_LOCATION));
            let factor = (2f32.sqrt()).powi(scale_factor as i32);
            m /= factor;
            m
        }
    }

    pub(crate) fn compose_2d(&self, decomposition: &Decomposition, scale_factor: usize) -> Matrix {
        let steps = self.parameters.decomposition_steps();
        let shape = self.parameters.signal_shape();
        let padded_rows = utils::padded_size(shape[0], steps);
        let padded_cols = utils::padded_size(shape[1], steps);
        let padded_shape = [padded_rows, padded_cols];

        let trans_cols = utils::transposed_matrices_for(&self.parameters, &padded_shape, 1);
        let trans_rows = utils::transposed_matrices_for(&self.parameters, &padded_shape, 0);

        let mut approximation = decomposition[steps * 3].clone();
        for step in (scale_factor..steps).rev() {
            let quadrants = Quadrants {
                ll: approximation,
                lh: decomposition[step * 3].clone(),
                hl: decomposition[step * 3 + 1].clone(),
                hh: decomposition[step * 3 + 2].clone(),
            };
            approximation = wavelet::idwt2(&quadrants, &trans_cols[step], &trans_rows[step]);
        }

        if scale_factor == 0 {
            padding::crop(&approximation, shape[0], shape[1], DEFAULT_LOCATION)
        } else {
            let scaled_rows = shape[0] >> scale_factor;
            let scaled_cols = shape[1] >> scale_factor;
            let mut m = padding::crop(&approximation, scaled_rows, scaled_cols, DEFAULT_LOCATION);
            let factor = 2f32.powi(scale_factor as i32);
            m /= factor;
            m
        }
    }
}

pub(crate) fn signal_shape_of(signal: &Matrix, dimension: usize) -> Vec<usize> {
    if dimension == 1 {
        vec![signal.rows()]
    } else {
        vec![signal.rows(), signal.cols()]
    }
}

impl fmt::Display for WaveletBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WaveletBuffer({}, empty={}, compressed_size={})",
            self.parameters,
            self.is_empty(),
            self.compressed_size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::NullDenoiser;
    use crate::parameters::WaveletType;
    use nearly_eq::assert_nearly_eq;

    #[test]
    fn decompose_then_compose_reconstructs_1d_signal() {
        let params = WaveletParameters::new(vec![8], 1, 1, WaveletType::D2).unwrap();
        let mut buffer = WaveletBuffer::new(params).unwrap();
        let signal = Matrix::from_column(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        buffer.decompose(std::slice::from_ref(&signal), &NullDenoiser).unwrap();
        assert!(!buffer.is_empty());

        let reconstructed = buffer.compose(0).unwrap();
        assert_eq!(reconstructed.len(), 1);
        for (a, b) in signal.iter().zip(reconstructed[0].iter()) {
            assert_nearly_eq!(a, b, 0.05);
        }
    }

    #[test]
    fn decompose_then_compose_reconstructs_2d_signal() {
        let params = WaveletParameters::new(vec![4, 4], 1, 1, WaveletType::D1).unwrap();
        let mut buffer = WaveletBuffer::new(params).unwrap();
        let signal = Matrix::from_vec(4, 4, (0..16).map(|v| v as f32).collect());
        buffer.decompose(std::slice::from_ref(&signal), &NullDenoiser).unwrap();

        let reconstructed = buffer.compose(0).unwrap();
        for (a, b) in signal.iter().zip(reconstructed[0].iter()) {
            assert_nearly_eq!(a, b, 0.1);
        }
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let params = WaveletParameters::new(vec![8], 2, 1, WaveletType::D1).unwrap();
        let mut buffer = WaveletBuffer::new(params).unwrap();
        let signal = Matrix::from_column(vec![0.0; 8]);
        let err = buffer.decompose(&[signal], &NullDenoiser).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn empty_buffer_has_zero_compressed_size() {
        let params = WaveletParameters::new(vec![8], 1, 1, WaveletType::D1).unwrap();
        let buffer = WaveletBuffer::new(params).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.compressed_size(), 0);
    }

    #[test]
    fn value_range_widens_with_approximation_depth() {
        let params = WaveletParameters::new(vec![8], 1, 3, WaveletType::D1).unwrap();
        let buffer = WaveletBuffer::new(params).unwrap();
        let size = utils::decomposition_size(buffer.parameters());
        let (low, high) = buffer.value_range(size - 1);
        assert_eq!(low, 0.0);
        assert_eq!(high, 8.0);
    }
}
