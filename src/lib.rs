//! Lossy multi-resolution wavelet storage for multi-channel 1-D/2-D signals.
//!
//! A `WaveletBuffer` decomposes one or more same-shaped 1-D or 2-D signals
//! into a pyramid of wavelet subbands, optionally denoises them, and
//! (de)serializes the result through a compact sparse encoding. See
//! [`buffer::WaveletBuffer`] for the main entry point.

pub mod buffer;
pub mod compressor;
pub mod denoise;
pub mod error;
pub mod legacy;
pub mod padding;
pub mod parameters;
pub mod primitives;
pub mod serializer;
pub mod utils;
pub mod view;
pub mod wavelet;

pub use buffer::WaveletBuffer;
pub use denoise::{Denoiser, NullDenoiser, RatioDenoiser, ThresholdAbsDenoiser};
pub use error::Error;
pub use parameters::{WaveletParameters, WaveletType};
pub use view::WaveletBufferView;
