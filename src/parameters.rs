//! Construction parameters for a [`crate::buffer::WaveletBuffer`].
//!
//! Grounded in `wavelet_parameters.h`: an immutable, `Ord`-comparable value
//! used both as the buffer's own configuration and as the filter-matrix
//! cache key (`utils::matrix_cache`).

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};
use crate::primitives::Shape;

/// The supported Daubechies wavelet orders, plus the degenerate "no
/// transform" marker used by buffers that only ever store verbatim data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WaveletType {
    None = 0,
    D1 = 1,
    D2 = 2,
    D3 = 3,
    D4 = 4,
    D5 = 5,
}

impl WaveletType {
    /// The wavelet's order, i.e. the value baked into the enum discriminant.
    pub fn order(self) -> usize {
        self as usize
    }
}

impl fmt::Display for WaveletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaveletType::None => write!(f, "none"),
            WaveletType::D1 => write!(f, "D1"),
            WaveletType::D2 => write!(f, "D2"),
            WaveletType::D3 => write!(f, "D3"),
            WaveletType::D4 => write!(f, "D4"),
            WaveletType::D5 => write!(f, "D5"),
        }
    }
}

impl TryFrom<u8> for WaveletType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(WaveletType::None),
            1 => Ok(WaveletType::D1),
            2 => Ok(WaveletType::D2),
            3 => Ok(WaveletType::D3),
            4 => Ok(WaveletType::D4),
            5 => Ok(WaveletType::D5),
            other => Err(Error::DecodeError(format!("unknown wavelet type {other}"))),
        }
    }
}

/// Immutable parameters describing a buffer's shape, channel count,
/// decomposition depth, and wavelet family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaveletParameters {
    signal_shape: Shape,
    signal_number: usize,
    decomposition_steps: usize,
    wavelet_type: WaveletType,
}

impl WaveletParameters {
    /// Builds and validates a parameter set.
    ///
    /// `decomposition_steps` is clamped to zero when `wavelet_type` is
    /// `None`.
    pub fn new(
        signal_shape: Shape,
        signal_number: usize,
        mut decomposition_steps: usize,
        wavelet_type: WaveletType,
    ) -> Result<Self> {
        let dimension = signal_shape.len();
        if dimension == 0 || dimension > 2 {
            let err = Error::InvalidParameters(format!("signal_shape must have 1 or 2 dimensions, got {dimension}"));
            log::error!("{err}");
            return Err(err);
        }
        if signal_shape.contains(&0) {
            let err = Error::InvalidParameters("signal_shape sides must be non-zero".into());
            log::error!("{err}");
            return Err(err);
        }
        if signal_number == 0 {
            let err = Error::InvalidParameters("signal_number must be non-zero".into());
            log::error!("{err}");
            return Err(err);
        }

        if wavelet_type == WaveletType::None {
            decomposition_steps = 0;
        }

        let shortest = *signal_shape.iter().min().unwrap();
        let min_signal_size = wavelet_type.order() * 2;
        if wavelet_type != WaveletType::None && shortest < min_signal_size {
            let err = Error::InvalidParameters(format!(
                "shortest side {shortest} is smaller than the minimum {min_signal_size} required by {wavelet_type}"
            ));
            log::error!("{err}");
            return Err(err);
        }

        let max_steps = max_decomposition_steps(wavelet_type, &signal_shape);
        if decomposition_steps > max_steps {
            let err = Error::InvalidParameters(format!(
                "decomposition_steps {decomposition_steps} exceeds the maximum {max_steps} for this shape and wavelet"
            ));
            log::error!("{err}");
            return Err(err);
        }

        Ok(WaveletParameters {
            signal_shape,
            signal_number,
            decomposition_steps,
            wavelet_type,
        })
    }

    pub fn signal_shape(&self) -> &[usize] {
        &self.signal_shape
    }

    pub fn signal_number(&self) -> usize {
        self.signal_number
    }

    pub fn decomposition_steps(&self) -> usize {
        self.decomposition_steps
    }

    pub fn wavelet_type(&self) -> WaveletType {
        self.wavelet_type
    }

    /// Number of axes in `signal_shape` (1 or 2).
    pub fn dimension(&self) -> usize {
        self.signal_shape.len()
    }

    /// The smallest side of `signal_shape`.
    pub fn shortest_dimension(&self) -> usize {
        *self.signal_shape.iter().min().unwrap()
    }

    /// How many subbands a single wavelet step produces (1 for 1-D, 3 for 2-D).
    pub fn subbands_per_transform(&self) -> usize {
        if self.dimension() == 2 {
            3
        } else {
            1
        }
    }
}

/// `floor(log2(shortest_side / (2*order - 1)))`, clamped to zero, matching
/// `CalculateMaxDecompositionSteps`.
pub fn max_decomposition_steps(wavelet_type: WaveletType, signal_shape: &[usize]) -> usize {
    if wavelet_type == WaveletType::None {
        return 0;
    }
    let shortest = *signal_shape.iter().min().unwrap_or(&0) as f64;
    let order = wavelet_type.order() as f64;
    let denom = 2.0 * order - 1.0;
    if shortest <= denom {
        return 0;
    }
    (shortest / denom).log2().floor().max(0.0) as usize
}

impl PartialOrd for WaveletParameters {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WaveletParameters {
    fn cmp(&self, other: &Self) -> Ordering {
        self.signal_shape
            .cmp(&other.signal_shape)
            .then(self.signal_number.cmp(&other.signal_number))
            .then(self.decomposition_steps.cmp(&other.decomposition_steps))
            .then(self.wavelet_type.cmp(&other.wavelet_type))
    }
}

impl fmt::Display for WaveletParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WaveletParameters(shape={:?}, channels={}, steps={}, wavelet={})",
            self.signal_shape, self.signal_number, self.decomposition_steps, self.wavelet_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_shape_too_small_for_wavelet() {
        let err = WaveletParameters::new(vec![3], 1, 1, WaveletType::D5).unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(_)));
    }

    #[test]
    fn clamps_steps_for_none_wavelet() {
        let params = WaveletParameters::new(vec![8], 1, 4, WaveletType::None).unwrap();
        assert_eq!(params.decomposition_steps(), 0);
    }

    #[test]
    fn rejects_too_many_steps() {
        let err = WaveletParameters::new(vec![8], 1, 10, WaveletType::D1).unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(_)));
    }

    #[test]
    fn orders_lexicographically_by_shape_then_rest() {
        let a = WaveletParameters::new(vec![8], 1, 1, WaveletType::D1).unwrap();
        let b = WaveletParameters::new(vec![16], 1, 1, WaveletType::D1).unwrap();
        assert!(a < b);
    }

    #[test]
    fn dimension_and_shortest_dimension() {
        let params = WaveletParameters::new(vec![8, 16], 1, 1, WaveletType::D1).unwrap();
        assert_eq!(params.dimension(), 2);
        assert_eq!(params.shortest_dimension(), 8);
        assert_eq!(params.subbands_per_transform(), 3);
    }
}
