//! A non-owning window over a contiguous range of a [`WaveletBuffer`]'s
//! channels.
//!
//! Grounded in `wavelet_buffer_view.h`/`sources/wavelet_buffer_view.cc`.

use crate::buffer::{self, Decomposition, WaveletBuffer};
use crate::denoise::Denoiser;
use crate::error::{Error, Result};
use crate::parameters::WaveletParameters;
use crate::primitives::Matrix;

/// Borrows `count` channels of a `WaveletBuffer` starting at `start`. Holds
/// the parent mutably, since [`decompose`](Self::decompose) writes into the
/// borrowed channels in place.
#[derive(Debug)]
pub struct WaveletBufferView<'a> {
    buffer: &'a mut WaveletBuffer,
    start: usize,
    count: usize,
}

impl<'a> WaveletBufferView<'a> {
    pub(crate) fn new(buffer: &'a mut WaveletBuffer, start: usize, count: usize) -> Self {
        WaveletBufferView { buffer, start, count }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Parameters of the parent buffer, unmodified: a view doesn't get its
    /// own `signal_number`.
    pub fn parameters(&self) -> &WaveletParameters {
        self.buffer.parameters()
    }

    /// The borrowed channels' decompositions.
    pub fn decompositions(&self) -> &[Decomposition] {
        &self.buffer.decompositions()[self.start..self.start + self.count]
    }

    fn check_index(&self, index: usize) -> Result<usize> {
        if index >= self.count {
            let err = Error::OutOfRange(format!("channel {index} out of range for a view of {} channels", self.count));
            log::warn!("{err}");
            return Err(err);
        }
        Ok(self.start + index)
    }

    /// The `index`-th channel within the view (not the parent buffer).
    pub fn channel(&self, index: usize) -> Result<&Decomposition> {
        let absolute = self.check_index(index)?;
        Ok(&self.buffer.decompositions()[absolute])
    }

    /// Decomposes `signals` into the view's channels, leaving the rest of
    /// the parent buffer untouched. `signals.len()` must equal `count`.
    pub fn decompose(&mut self, signals: &[Matrix], denoiser: &dyn Denoiser) -> Result<()> {
        if signals.len() != self.count {
            let err = Error::ShapeMismatch {
                expected: vec![self.count],
                actual: vec![signals.len()],
            };
            log::error!("{err}");
            return Err(err);
        }

        let parameters = self.buffer.parameters().clone();
        for signal in signals {
            let shape = buffer::signal_shape_of(signal, parameters.dimension());
            if shape != parameters.signal_shape() {
                let err = Error::ShapeMismatch {
                    expected: parameters.signal_shape().to_vec(),
                    actual: shape,
                };
                log::error!("{err}");
                return Err(err);
            }
        }

        for (local_index, signal) in signals.iter().enumerate() {
            let decomposition = if parameters.dimension() == 1 {
                self.buffer.decompose_1d(signal, denoiser)
            } else {
                self.buffer.decompose_2d(signal, denoiser)
            };
            self.buffer.decompositions_mut()[self.start + local_index] = decomposition;
        }
        Ok(())
    }

    /// Reconstructs the view's channels, mirroring
    /// [`WaveletBuffer::compose`] but restricted to `[start, start+count)`.
    pub fn compose(&self, scale_factor: u32) -> Result<Vec<Matrix>> {
        let parameters = self.buffer.parameters();
        let steps = parameters.decomposition_steps();
        let scale_factor = scale_factor as usize;
        if scale_factor > steps {
            let err = Error::OutOfRange(format!("scale_factor {scale_factor} exceeds decomposition_steps {steps}"));
            log::warn!("{err}");
            return Err(err);
        }

        let dimension = parameters.dimension();
        let mut out = Vec::with_capacity(self.count);
        for decomposition in self.decompositions() {
            let signal = if dimension == 1 {
                self.buffer.compose_1d(decomposition, scale_factor)
            } else {
                self.buffer.compose_2d(decomposition, scale_factor)
            };
            out.push(signal);
        }
        Ok(out)
    }

    /// Deep-copies the viewed channels into a new, owned `WaveletBuffer`
    /// whose `signal_number` equals `count`.
    pub fn to_buffer(&self) -> Result<WaveletBuffer> {
        let parameters = self.buffer.parameters().clone();
        let parameters = WaveletParameters::new(
            parameters.signal_shape().to_vec(),
            self.count,
            parameters.decomposition_steps(),
            parameters.wavelet_type(),
        )?;
        let decompositions = self.decompositions().to_vec();
        WaveletBuffer::from_decompositions(parameters, decompositions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::NullDenoiser;
    use crate::parameters::WaveletType;

    fn sample_buffer() -> WaveletBuffer {
        let params = WaveletParameters::new(vec![8], 3, 1, WaveletType::D1).unwrap();
        let mut buffer = WaveletBuffer::new(params).unwrap();
        let signals: Vec<Matrix> = (0..3)
            .map(|c| Matrix::from_column((0..8).map(|v| (v + c * 10) as f32).collect()))
            .collect();
        buffer.decompose(&signals, &NullDenoiser).unwrap();
        buffer
    }

    #[test]
    fn view_exposes_only_the_requested_channels() {
        let mut buffer = sample_buffer();
        let channel_one = buffer.decompositions()[1].clone();
        let view = buffer.view(1, 2).unwrap();
        assert_eq!(view.count(), 2);
        assert_eq!(view.decompositions().len(), 2);
        assert_eq!(view.decompositions()[0], channel_one);
    }

    #[test]
    fn view_rejects_out_of_range_start() {
        let mut buffer = sample_buffer();
        assert!(buffer.view(2, 2).is_err());
    }

    #[test]
    fn to_buffer_produces_an_independent_owned_copy() {
        let mut buffer = sample_buffer();
        let channel_one = buffer.decompositions()[1].clone();
        let view = buffer.view(1, 1).unwrap();
        let owned = view.to_buffer().unwrap();
        assert_eq!(owned.parameters().signal_number(), 1);
        assert_eq!(owned.decompositions()[0], channel_one);
    }

    #[test]
    fn view_decompose_only_touches_its_own_channels() {
        let mut buffer = sample_buffer();
        let channel_zero_before = buffer.decompositions()[0].clone();

        let new_signals: Vec<Matrix> = (0..2)
            .map(|c| Matrix::from_column((0..8).map(|v| (v * 2 + c) as f32).collect()))
            .collect();
        {
            let mut view = buffer.view(1, 2).unwrap();
            view.decompose(&new_signals, &NullDenoiser).unwrap();
        }

        assert_eq!(buffer.decompositions()[0], channel_zero_before);
        assert_ne!(buffer.decompositions()[1], channel_zero_before);
    }

    #[test]
    fn view_compose_reconstructs_only_its_channels() {
        let mut buffer = sample_buffer();
        let view = buffer.view(1, 2).unwrap();
        let reconstructed = view.compose(0).unwrap();
        assert_eq!(reconstructed.len(), 2);
        for signal in &reconstructed {
            assert_eq!(signal.rows(), 8);
        }
    }
}
