//! rubato-backed interpolators
//!
//! One enum over the two rubato resampler families so the engine can hold
//! either without boxing a trait object.

use rubato::{
    FastFixedIn, PolynomialDegree, ResampleResult, Resampler, ResamplerConstructionError,
    SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use srcdirect_types::ConverterType;

/// Frames per channel handed to rubato on every full-chunk call
pub const CHUNK_FRAMES: usize = 512;

/// How far the ratio may drift from the construction ratio before the
/// interpolator has to be rebuilt
pub const MAX_RELATIVE_RATIO: f64 = 4.0;

fn sinc_parameters(converter: ConverterType) -> SincInterpolationParameters {
    match converter {
        ConverterType::SincBestQuality => SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        },
        ConverterType::SincMediumQuality => SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.925,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::Blackman2,
        },
        _ => SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.91,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::Hann2,
        },
    }
}

pub enum Interpolator {
    Sinc(SincFixedIn<f32>),
    Polynomial(FastFixedIn<f32>),
}

impl Interpolator {
    pub fn new(
        converter: ConverterType,
        ratio: f64,
        channels: usize,
    ) -> Result<Self, ResamplerConstructionError> {
        let interpolator = match converter {
            ConverterType::ZeroOrderHold => Interpolator::Polynomial(FastFixedIn::new(
                ratio,
                MAX_RELATIVE_RATIO,
                PolynomialDegree::Nearest,
                CHUNK_FRAMES,
                channels,
            )?),
            ConverterType::Linear => Interpolator::Polynomial(FastFixedIn::new(
                ratio,
                MAX_RELATIVE_RATIO,
                PolynomialDegree::Linear,
                CHUNK_FRAMES,
                channels,
            )?),
            sinc => Interpolator::Sinc(SincFixedIn::new(
                ratio,
                MAX_RELATIVE_RATIO,
                sinc_parameters(sinc),
                CHUNK_FRAMES,
                channels,
            )?),
        };

        tracing::debug!(
            "Built {} interpolator: ratio={:.6}, channels={}, delay={}",
            converter,
            ratio,
            channels,
            interpolator.output_delay()
        );

        Ok(interpolator)
    }

    /// Process exactly [`CHUNK_FRAMES`] frames per channel
    pub fn process_chunk(&mut self, input: &[Vec<f32>]) -> ResampleResult<Vec<Vec<f32>>> {
        match self {
            Interpolator::Sinc(r) => r.process(input, None),
            Interpolator::Polynomial(r) => r.process(input, None),
        }
    }

    /// Process a short final chunk, or drain the tail when `input` is `None`
    pub fn process_tail(&mut self, input: Option<&[Vec<f32>]>) -> ResampleResult<Vec<Vec<f32>>> {
        match self {
            Interpolator::Sinc(r) => r.process_partial(input, None),
            Interpolator::Polynomial(r) => r.process_partial(input, None),
        }
    }

    /// Change the ratio in place; fails when it leaves the relative bound
    pub fn set_ratio(&mut self, ratio: f64) -> ResampleResult<()> {
        match self {
            Interpolator::Sinc(r) => r.set_resample_ratio(ratio, false),
            Interpolator::Polynomial(r) => r.set_resample_ratio(ratio, false),
        }
    }

    /// Leading output frames to drop so output lines up with input.
    ///
    /// `SincFixedIn` starts with its window reaching half a filter back,
    /// so its first output frame already sits at input time zero and the
    /// delay it reports does not apply. The polynomial window is centred on
    /// the read position, which starts four input frames early.
    pub fn output_delay(&self) -> usize {
        match self {
            Interpolator::Sinc(_) => 0,
            Interpolator::Polynomial(r) => r.output_delay(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Interpolator::Sinc(r) => r.reset(),
            Interpolator::Polynomial(r) => r.reset(),
        }
    }
}
