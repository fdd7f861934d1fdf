//! Conversion engine seam
//!
//! The adapter in [`crate::direct`] only ever talks to an engine through
//! [`ConversionEngine`]; [`crate::SrcState`] is the production implementation.

use srcdirect_types::{FrameCounts, SrcError};

/// Arguments of one processing call.
///
/// Built once per call from the flat argument list and discarded when the
/// call returns. Buffers are interleaved; frame counts are per channel.
#[derive(Debug, Clone, Copy)]
pub struct ConversionRequest<'a> {
    /// Input samples, `None` when the caller passed a null buffer
    pub input: Option<&'a [f32]>,
    /// Valid input frames in `input`
    pub input_frames: i64,
    /// Output capacity in frames
    pub output_frames: i64,
    /// No further input will follow; the engine may flush
    pub end_of_input: bool,
    /// Output rate divided by input rate
    pub ratio: f64,
}

impl<'a> ConversionRequest<'a> {
    pub fn new(input: &'a [f32], input_frames: i64, output_frames: i64, ratio: f64) -> Self {
        Self {
            input: Some(input),
            input_frames,
            output_frames,
            end_of_input: false,
            ratio,
        }
    }

    pub fn with_end_of_input(mut self, end_of_input: bool) -> Self {
        self.end_of_input = end_of_input;
        self
    }
}

/// A streaming sample rate converter.
///
/// Implementations own all streaming state between calls. Callers must not
/// share one engine across threads without serializing access.
pub trait ConversionEngine {
    /// Interleaved channels per frame
    fn channels(&self) -> usize;

    /// Convert as much of the request as fits into `output`.
    ///
    /// Never writes more than `request.output_frames` frames.
    fn process(
        &mut self,
        request: &ConversionRequest<'_>,
        output: Option<&mut [f32]>,
    ) -> Result<FrameCounts, SrcError>;
}

impl<E: ConversionEngine + ?Sized> ConversionEngine for Box<E> {
    fn channels(&self) -> usize {
        (**self).channels()
    }

    fn process(
        &mut self,
        request: &ConversionRequest<'_>,
        output: Option<&mut [f32]>,
    ) -> Result<FrameCounts, SrcError> {
        (**self).process(request, output)
    }
}
