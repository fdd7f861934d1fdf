//! Engine handle
//!
//! `SrcState` gives a rubato interpolator the streaming contract hosts
//! expect from `src_process`: input is consumed only while there is room for
//! output, output never exceeds the requested capacity, and end of input
//! flushes the filter tail so the total length tracks `frames * ratio`.

use std::collections::VecDeque;

use srcdirect_types::{is_valid_ratio, ConverterType, FrameCounts, SrcError};

use crate::engine::{ConversionEngine, ConversionRequest};
use crate::interpolator::{Interpolator, CHUNK_FRAMES};

/// Upper bound on tail-draining calls during a flush
const MAX_FLUSH_ROUNDS: usize = 16;

pub struct SrcState {
    converter: ConverterType,
    channels: usize,
    /// Ratio of the most recent call
    ratio: Option<f64>,
    /// Built on first use, once the ratio is known
    interpolator: Option<Interpolator>,
    /// Per-channel input waiting for a full chunk
    staged: Vec<Vec<f32>>,
    /// Interleaved output waiting for room in a caller buffer
    pending: VecDeque<f32>,
    /// Leading output frames still to drop to cancel interpolator delay
    skip_frames: usize,
    /// Sum of `frames_fed * ratio` since the last reset
    expected_frames: f64,
    /// Output frames queued since the last reset, after delay trimming
    generated_frames: u64,
    flushed: bool,
}

impl SrcState {
    pub fn new(converter: ConverterType, channels: usize) -> Result<Self, SrcError> {
        if channels == 0 {
            return Err(SrcError::BadChannelCount);
        }

        Ok(Self {
            converter,
            channels,
            ratio: None,
            interpolator: None,
            staged: vec![Vec::with_capacity(CHUNK_FRAMES); channels],
            pending: VecDeque::new(),
            skip_frames: 0,
            expected_frames: 0.0,
            generated_frames: 0,
            flushed: false,
        })
    }

    /// Create from a libsamplerate converter number
    pub fn from_code(converter: i32, channels: i32) -> Result<Self, SrcError> {
        let converter = ConverterType::from_code(converter).ok_or(SrcError::BadConverter)?;
        if channels < 1 {
            return Err(SrcError::BadChannelCount);
        }
        Self::new(converter, channels as usize)
    }

    pub fn converter(&self) -> ConverterType {
        self.converter
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn ratio(&self) -> Option<f64> {
        self.ratio
    }

    /// True once end of input has been flushed; cleared by [`SrcState::reset`]
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Output frames generated but not yet handed to a caller
    pub fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    /// Drop all streaming state so the next call starts a new stream
    pub fn reset(&mut self) {
        for channel in &mut self.staged {
            channel.clear();
        }
        self.pending.clear();
        self.expected_frames = 0.0;
        self.generated_frames = 0;
        self.flushed = false;
        self.skip_frames = match self.interpolator.as_mut() {
            Some(interpolator) => {
                interpolator.reset();
                interpolator.output_delay()
            }
            None => 0,
        };
    }

    /// Set the ratio used from now on, without processing anything
    pub fn set_ratio(&mut self, ratio: f64) -> Result<(), SrcError> {
        if !is_valid_ratio(ratio) {
            return Err(SrcError::BadSrcRatio);
        }
        self.apply_ratio(ratio)
    }

    fn apply_ratio(&mut self, ratio: f64) -> Result<(), SrcError> {
        if self.ratio == Some(ratio) && self.interpolator.is_some() {
            return Ok(());
        }

        let rebuild = match self.interpolator.as_mut() {
            None => true,
            Some(interpolator) => match interpolator.set_ratio(ratio) {
                Ok(()) => false,
                Err(e) => {
                    tracing::debug!(
                        "Ratio {:.6} not reachable in place ({}), rebuilding interpolator",
                        ratio,
                        e
                    );
                    true
                }
            },
        };

        if rebuild {
            let interpolator =
                Interpolator::new(self.converter, ratio, self.channels).map_err(|e| {
                    tracing::error!("Failed to build {} interpolator: {}", self.converter, e);
                    SrcError::BadInternalState
                })?;
            self.skip_frames = interpolator.output_delay();
            self.interpolator = Some(interpolator);
        }

        self.ratio = Some(ratio);
        Ok(())
    }

    fn staged_frames(&self) -> usize {
        self.staged[0].len()
    }

    /// Copy interleaved frames into the staging chunk; returns frames taken
    fn stage(&mut self, input: &[f32]) -> usize {
        let room = CHUNK_FRAMES - self.staged_frames();
        let take = room.min(input.len() / self.channels);
        for frame in input[..take * self.channels].chunks_exact(self.channels) {
            for (channel, &sample) in self.staged.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        take
    }

    /// Move pending output into `output`; returns frames written
    fn drain_pending(&mut self, output: &mut [f32]) -> usize {
        let frames = self.pending_frames().min(output.len() / self.channels);
        let samples = frames * self.channels;
        for (dst, src) in output[..samples].iter_mut().zip(self.pending.drain(..samples)) {
            *dst = src;
        }
        frames
    }

    /// Queue interpolator output, dropping the leading delay frames
    fn queue_output(&mut self, output: &[Vec<f32>]) {
        let frames = output.first().map_or(0, |c| c.len());
        let skip = self.skip_frames.min(frames);
        self.skip_frames -= skip;

        for i in skip..frames {
            for channel in output {
                self.pending.push_back(channel[i]);
            }
        }
        self.generated_frames += (frames - skip) as u64;
    }

    fn current_ratio(&self) -> Result<f64, SrcError> {
        self.ratio.ok_or(SrcError::BadInternalState)
    }

    fn run_chunk(&mut self) -> Result<(), SrcError> {
        let ratio = self.current_ratio()?;
        let output = match self.interpolator.as_mut() {
            Some(interpolator) => interpolator.process_chunk(&self.staged),
            None => return Err(SrcError::BadInternalState),
        }
        .map_err(internal_error)?;

        self.expected_frames += CHUNK_FRAMES as f64 * ratio;
        for channel in &mut self.staged {
            channel.clear();
        }
        self.queue_output(&output);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SrcError> {
        let ratio = self.current_ratio()?;
        let staged = self.staged_frames();

        if staged > 0 {
            let output = match self.interpolator.as_mut() {
                Some(interpolator) => interpolator.process_tail(Some(&self.staged)),
                None => return Err(SrcError::BadInternalState),
            }
            .map_err(internal_error)?;

            self.expected_frames += staged as f64 * ratio;
            for channel in &mut self.staged {
                channel.clear();
            }
            self.queue_output(&output);
        }

        let target = self.expected_frames.round() as u64;
        let mut rounds = 0;
        while self.generated_frames < target && rounds < MAX_FLUSH_ROUNDS {
            let output = match self.interpolator.as_mut() {
                Some(interpolator) => interpolator.process_tail(None),
                None => return Err(SrcError::BadInternalState),
            }
            .map_err(internal_error)?;

            if output.first().map_or(true, |c| c.is_empty()) {
                break;
            }
            self.queue_output(&output);
            rounds += 1;
        }

        if self.generated_frames > target {
            let excess = (self.generated_frames - target) as usize;
            let removable = excess.min(self.pending_frames());
            self.pending
                .truncate(self.pending.len() - removable * self.channels);
            self.generated_frames -= removable as u64;
        }

        tracing::debug!(
            "Flushed {} stream: {} frames generated, {} expected",
            self.converter,
            self.generated_frames,
            target
        );

        self.flushed = true;
        Ok(())
    }
}

fn internal_error(e: rubato::ResampleError) -> SrcError {
    tracing::error!("Interpolator failed: {}", e);
    SrcError::BadInternalState
}

impl ConversionEngine for SrcState {
    fn channels(&self) -> usize {
        self.channels
    }

    fn process(
        &mut self,
        request: &ConversionRequest<'_>,
        output: Option<&mut [f32]>,
    ) -> Result<FrameCounts, SrcError> {
        let channels = self.channels;
        let input_frames = request.input_frames.max(0) as usize;
        let output_frames = request.output_frames.max(0) as usize;

        let input: &[f32] = match request.input {
            Some(input) => input,
            None if input_frames == 0 => &[],
            None => return Err(SrcError::BadDataPtr),
        };
        let output: &mut [f32] = match output {
            Some(output) => output,
            None if output_frames == 0 => &mut [],
            None => return Err(SrcError::BadDataPtr),
        };

        if !is_valid_ratio(request.ratio) {
            return Err(SrcError::BadSrcRatio);
        }
        if input.len() < input_frames * channels || output.len() < output_frames * channels {
            return Err(SrcError::SizeIncompatibility);
        }

        let input = &input[..input_frames * channels];
        let output = &mut output[..output_frames * channels];

        self.apply_ratio(request.ratio)?;

        let mut used = 0;
        let mut written = 0;
        loop {
            written += self.drain_pending(&mut output[written * channels..]);
            if written == output_frames || self.flushed {
                break;
            }

            if self.staged_frames() == CHUNK_FRAMES {
                self.run_chunk()?;
            } else if used < input_frames {
                used += self.stage(&input[used * channels..]);
            } else if request.end_of_input {
                self.flush()?;
            } else {
                break;
            }
        }

        Ok(FrameCounts::new(used as i64, written as i64))
    }
}
