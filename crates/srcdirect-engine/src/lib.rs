//! Streaming sample rate conversion for foreign hosts
//!
//! Provides a conversion engine with a libsamplerate-style streaming
//! contract and the flat C entry points hosts call into.
//!
//! # Features
//! - **Engine handle** ([`SrcState`]) backed by rubato sinc and polynomial
//!   interpolators
//! - **Flat calling convention** via [`direct::src_process_direct`], with a
//!   safe counterpart [`process_direct`]
//! - **C-ABI lifecycle** (`src_new`, `src_delete`, `src_reset`, ...)
//! - **Streaming converter** for hosts that push arbitrary-length arrays
//! - **WAV conversion** via hound
//! - **Opus encoding and decoding** via audiopus

pub mod codec;
pub mod converter;
pub mod direct;
pub mod engine;
pub mod ffi;
pub mod file_io;
pub mod interpolator;
pub mod state;

pub use codec::{CodecError, OpusDecoder, OpusEncoder};
pub use converter::{ConverterError, SampleRateConverter};
pub use direct::{process_direct, DirectOutcome};
pub use engine::{ConversionEngine, ConversionRequest};
pub use state::SrcState;
pub use srcdirect_types::{ConverterSettings, ConverterType, FrameCounts, SrcError};

/// Convert a whole interleaved signal in one go
pub fn convert(
    samples: &[f32],
    channels: usize,
    ratio: f64,
    converter: ConverterType,
) -> Result<Vec<f32>, ConverterError> {
    SampleRateConverter::new(converter, channels, ratio)?.process_concat(samples, true)
}

/// Convert a whole interleaved signal between two sample rates
pub fn resample(
    samples: &[f32],
    channels: usize,
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, ConverterError> {
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }
    convert(
        samples,
        channels,
        target_rate as f64 / source_rate as f64,
        ConverterType::default(),
    )
}
