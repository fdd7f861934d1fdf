//! Streaming converter
//!
//! Wraps an engine handle with the staging and output buffers a host needs
//! to push arbitrary-length sample arrays through [`process_direct`].

use srcdirect_types::{is_valid_ratio, ConverterSettings, ConverterType, SrcError};
use thiserror::Error;

use crate::direct::process_direct;
use crate::state::SrcState;

#[derive(Debug, Error, PartialEq)]
pub enum ConverterError {
    #[error("Invalid frame structure in sample array ({len} samples, {channels} channels)")]
    InvalidFrameStructure { len: usize, channels: usize },

    #[error("Sample rate converter failed to initialize - error: {0}")]
    Init(SrcError),

    #[error("Conversion error - {0}")]
    Conversion(SrcError),

    #[error("Input after end of stream; reset the converter first")]
    Ended,
}

/// Converts interleaved sample arrays at a fixed (but adjustable) ratio.
///
/// Output arrives as a list of blocks that are meant to be concatenated.
/// Frames the engine has not taken yet stay staged until the next call.
pub struct SampleRateConverter {
    state: SrcState,
    settings: ConverterSettings,
    ratio: f64,
    channels: usize,
    frames_in: Vec<f32>,
    frames_out: Vec<f32>,
    /// Staged frames at the front of `frames_in`
    input_pos: usize,
}

impl SampleRateConverter {
    pub fn new(
        converter: ConverterType,
        channels: usize,
        ratio: f64,
    ) -> Result<Self, ConverterError> {
        let settings = ConverterSettings {
            converter,
            ..Default::default()
        };
        Self::with_settings(settings, channels, ratio)
    }

    pub fn with_settings(
        settings: ConverterSettings,
        channels: usize,
        ratio: f64,
    ) -> Result<Self, ConverterError> {
        if !is_valid_ratio(ratio) {
            return Err(ConverterError::Init(SrcError::BadSrcRatio));
        }

        let mut state = SrcState::new(settings.converter, channels).map_err(ConverterError::Init)?;
        state.set_ratio(ratio).map_err(ConverterError::Init)?;

        let chunk = settings.input_chunk_frames.max(1);
        let out_frames = output_frames(chunk, ratio, settings.output_headroom);

        tracing::debug!(
            "SampleRateConverter: {} channels={} ratio={:.6} chunk={} out={}",
            settings.converter,
            channels,
            ratio,
            chunk,
            out_frames
        );

        Ok(Self {
            state,
            settings,
            ratio,
            channels,
            frames_in: vec![0.0; chunk * channels],
            frames_out: vec![0.0; out_frames * channels],
            input_pos: 0,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn converter(&self) -> ConverterType {
        self.settings.converter
    }

    /// Change the ratio for the following calls
    pub fn set_ratio(&mut self, ratio: f64) -> Result<(), ConverterError> {
        self.state.set_ratio(ratio).map_err(ConverterError::Conversion)?;
        self.ratio = ratio;

        let chunk = self.frames_in.len() / self.channels;
        let out_frames = output_frames(chunk, ratio, self.settings.output_headroom);
        self.frames_out.resize(out_frames * self.channels, 0.0);
        Ok(())
    }

    /// Frames accepted by [`SampleRateConverter::process`] but not yet
    /// consumed by the engine
    pub fn frames_pending(&self) -> usize {
        self.input_pos
    }

    /// Forget all buffered audio and start a new stream
    pub fn reset(&mut self) {
        self.input_pos = 0;
        self.state.reset();
    }

    /// Convert `samples` (interleaved).
    ///
    /// With `end_of_input` the engine is flushed and every remaining output
    /// frame is returned; afterwards the converter needs a [`reset`] before
    /// it accepts new input.
    ///
    /// [`reset`]: SampleRateConverter::reset
    pub fn process(
        &mut self,
        samples: &[f32],
        end_of_input: bool,
    ) -> Result<Vec<Vec<f32>>, ConverterError> {
        let ch = self.channels;
        if samples.len() % ch != 0 {
            return Err(ConverterError::InvalidFrameStructure {
                len: samples.len(),
                channels: ch,
            });
        }

        if self.state.is_flushed() && !samples.is_empty() {
            return Err(ConverterError::Ended);
        }

        let total = samples.len() / ch;
        let capacity = self.frames_in.len() / ch;
        let out_capacity = self.frames_out.len() / ch;
        let mut copied = 0;
        let mut result = Vec::new();

        loop {
            let take = (capacity - self.input_pos).min(total - copied);
            self.frames_in[self.input_pos * ch..(self.input_pos + take) * ch]
                .copy_from_slice(&samples[copied * ch..(copied + take) * ch]);
            copied += take;
            let staged = self.input_pos + take;

            let flushing = end_of_input && copied == total;
            let outcome = process_direct(
                &mut self.state,
                Some(&self.frames_in[..staged * ch]),
                staged as i64,
                Some(&mut self.frames_out[..]),
                out_capacity as i64,
                flushing,
                &self.ratio,
            );
            if let Some(e) = outcome.error() {
                return Err(ConverterError::Conversion(e));
            }

            let used = outcome.frames_in_used as usize;
            let generated = outcome.frames_out_gen as usize;
            if generated > 0 {
                result.push(self.frames_out[..generated * ch].to_vec());
            }

            self.frames_in.copy_within(used * ch..staged * ch, 0);
            self.input_pos = staged - used;

            // nothing moved, so another round cannot either
            if used == 0 && generated == 0 {
                break;
            }
        }

        Ok(result)
    }

    /// [`SampleRateConverter::process`] with the blocks joined
    pub fn process_concat(
        &mut self,
        samples: &[f32],
        end_of_input: bool,
    ) -> Result<Vec<f32>, ConverterError> {
        Ok(self.process(samples, end_of_input)?.concat())
    }
}

fn output_frames(input_frames: usize, ratio: f64, headroom: f64) -> usize {
    ((input_frames as f64 * ratio * headroom.max(1.0)).ceil() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: f64, channels: usize, freq: f64, amp: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let s = amp * (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin() as f32;
                std::iter::repeat(s).take(channels)
            })
            .collect()
    }

    fn mean_abs_diff(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let margin = n / 20;
        let body = margin..n - margin;
        a[body.clone()]
            .iter()
            .zip(&b[body.clone()])
            .map(|(x, y)| (x - y).abs())
            .sum::<f32>()
            / body.len() as f32
    }

    #[test]
    fn converts_44k_to_48k_mono() {
        let mut src = SampleRateConverter::new(ConverterType::SincFastest, 1, 48000.0 / 44100.0).unwrap();
        let sig_in = tone(44100.0, 1, 440.0, 0.25, 44100);
        let sig_out = tone(48000.0, 1, 440.0, 0.25, 48000);
        let proc = src.process_concat(&sig_in, true).unwrap();
        assert_eq!(proc.len(), 48000);
        assert!(mean_abs_diff(&proc, &sig_out) < 0.025);
    }

    #[test]
    fn converts_48k_to_44k_mono() {
        let mut src = SampleRateConverter::new(ConverterType::SincFastest, 1, 44100.0 / 48000.0).unwrap();
        let sig_in = tone(48000.0, 1, 440.0, 0.25, 48000);
        let sig_out = tone(44100.0, 1, 440.0, 0.25, 44100);
        let proc = src.process_concat(&sig_in, true).unwrap();
        assert_eq!(proc.len(), 44100);
        assert!(mean_abs_diff(&proc, &sig_out) < 0.025);
    }

    #[test]
    fn rejects_partial_frames() {
        let mut src = SampleRateConverter::new(ConverterType::Linear, 2, 1.5).unwrap();
        let err = src.process(&[0.0; 5], false).unwrap_err();
        assert_eq!(
            err,
            ConverterError::InvalidFrameStructure {
                len: 5,
                channels: 2
            }
        );
    }

    #[test]
    fn rejects_bad_construction() {
        assert_eq!(
            SampleRateConverter::new(ConverterType::Linear, 1, 0.0).err(),
            Some(ConverterError::Init(SrcError::BadSrcRatio))
        );
        assert_eq!(
            SampleRateConverter::new(ConverterType::Linear, 0, 1.0).err(),
            Some(ConverterError::Init(SrcError::BadChannelCount))
        );
    }

    #[test]
    fn streamed_blocks_match_one_shot() {
        let ratio = 16000.0 / 44100.0;
        let signal = tone(44100.0, 2, 300.0, 0.5, 20000);

        let mut whole = SampleRateConverter::new(ConverterType::SincMediumQuality, 2, ratio).unwrap();
        let a = whole.process_concat(&signal, true).unwrap();

        let mut pieces = SampleRateConverter::new(ConverterType::SincMediumQuality, 2, ratio).unwrap();
        let mut b = Vec::new();
        let blocks: Vec<&[f32]> = signal.chunks(2 * 1234).collect();
        for (i, block) in blocks.iter().enumerate() {
            let last = i + 1 == blocks.len();
            b.extend(pieces.process_concat(block, last).unwrap());
        }

        assert_eq!(a.len(), b.len());
        assert_eq!(a.len() / 2, (20000.0 * ratio).round() as usize);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn small_buffers_still_drain() {
        let settings = ConverterSettings {
            converter: ConverterType::Linear,
            input_chunk_frames: 64,
            output_headroom: 1.0,
        };
        let mut src = SampleRateConverter::with_settings(settings, 1, 3.0).unwrap();
        let out = src.process_concat(&vec![0.1; 1000], true).unwrap();
        assert_eq!(out.len(), 3000);
        assert_eq!(src.frames_pending(), 0);
    }

    #[test]
    fn reset_allows_reuse() {
        let mut src = SampleRateConverter::new(ConverterType::ZeroOrderHold, 1, 0.5).unwrap();
        let first = src.process_concat(&vec![0.2; 4000], true).unwrap();
        src.reset();
        let second = src.process_concat(&vec![0.2; 4000], true).unwrap();
        assert_eq!(first.len(), 2000);
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn input_after_end_is_rejected() {
        let mut src = SampleRateConverter::new(ConverterType::SincFastest, 1, 1.5).unwrap();
        let out = src.process_concat(&vec![0.1; 1000], true).unwrap();
        assert_eq!(out.len(), 1500);

        // more than one staging buffer worth of frames
        assert_eq!(
            src.process(&vec![0.1; 5000], false).unwrap_err(),
            ConverterError::Ended
        );
        assert!(src.process(&[], true).unwrap().is_empty());

        src.reset();
        let again = src.process_concat(&vec![0.1; 5000], true).unwrap();
        assert_eq!(again.len(), 7500);
    }

    #[test]
    fn ratio_change_resizes_output() {
        let mut src = SampleRateConverter::new(ConverterType::Linear, 1, 1.0).unwrap();
        src.process(&vec![0.0; 2048], false).unwrap();
        src.set_ratio(3.0).unwrap();
        assert_eq!(src.ratio(), 3.0);
        let out = src.process_concat(&vec![0.0; 2048], true).unwrap();
        assert!(!out.is_empty());
        assert!(src.set_ratio(-1.0).is_err());
    }
}
