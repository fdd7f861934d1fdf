//! Flat-argument entry point for `src_process`
//!
//! Hosts that cannot build a request structure call
//! [`src_process_direct`] with raw pointers and counts. The adapter packs
//! them into a [`ConversionRequest`], hands it to the engine, and passes the
//! engine's counts and status back untouched.

use std::os::raw::{c_double, c_float, c_int, c_long};
use std::slice;

use srcdirect_types::{status_code, SrcError};

use crate::engine::{ConversionEngine, ConversionRequest};
use crate::state::SrcState;

/// Status and counts of one adapter call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectOutcome {
    /// Engine status, 0 on success
    pub status: i32,
    pub frames_in_used: i64,
    pub frames_out_gen: i64,
}

impl DirectOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    pub fn error(&self) -> Option<SrcError> {
        SrcError::from_code(self.status)
    }
}

/// Run one processing call against `engine`.
///
/// `ratio` is read once. Counts are whatever the engine reported; a failed
/// call reports zero for both.
pub fn process_direct<E: ConversionEngine + ?Sized>(
    engine: &mut E,
    data_in: Option<&[f32]>,
    frames_in: i64,
    data_out: Option<&mut [f32]>,
    frames_out: i64,
    end_of_input: bool,
    ratio: &f64,
) -> DirectOutcome {
    let request = ConversionRequest {
        input: data_in,
        input_frames: frames_in,
        output_frames: frames_out,
        end_of_input,
        ratio: *ratio,
    };

    let result = engine.process(&request, data_out);
    let counts = result.unwrap_or_default();

    DirectOutcome {
        status: status_code(&result),
        frames_in_used: counts.input_frames_used,
        frames_out_gen: counts.output_frames_gen,
    }
}

/// Byte range covered by `frames` interleaved frames at `ptr`
fn span(ptr: *const c_float, frames: usize, channels: usize) -> (usize, usize) {
    let start = ptr as usize;
    (start, start + frames * channels * std::mem::size_of::<c_float>())
}

/// C calling convention wrapper around [`process_direct`].
///
/// # Safety
///
/// `state` must come from [`crate::ffi::src_new`] and not be used
/// concurrently. `data_in` must hold `frames_in` frames and `data_out` must
/// have room for `frames_out` frames (interleaved, `channels` samples per
/// frame). `ratio` must point to a readable `double`. The two out-parameters
/// may be null, in which case they are not written.
#[no_mangle]
pub unsafe extern "C" fn src_process_direct(
    state: *mut SrcState,
    data_in: *const c_float,
    frames_in: c_long,
    frames_in_used: *mut c_long,
    data_out: *mut c_float,
    frames_out: c_long,
    frames_out_gen: *mut c_long,
    end_of_input: c_int,
    ratio: *const c_double,
) -> c_int {
    let Some(state) = state.as_mut() else {
        return SrcError::BadState.code();
    };
    let Some(&ratio) = ratio.as_ref() else {
        return SrcError::BadData.code();
    };

    let channels = state.channels();
    let in_frames = (frames_in as i64).max(0) as usize;
    let out_frames = (frames_out as i64).max(0) as usize;

    if !data_in.is_null() && !data_out.is_null() && in_frames > 0 && out_frames > 0 {
        let (in_start, in_end) = span(data_in, in_frames, channels);
        let (out_start, out_end) = span(data_out, out_frames, channels);
        if in_start < out_end && out_start < in_end {
            return SrcError::DataOverlap.code();
        }
    }

    let input = (!data_in.is_null()).then(|| slice::from_raw_parts(data_in, in_frames * channels));
    let output = (!data_out.is_null())
        .then(|| slice::from_raw_parts_mut(data_out, out_frames * channels));

    let outcome = process_direct(
        state,
        input,
        frames_in as i64,
        output,
        frames_out as i64,
        end_of_input != 0,
        &ratio,
    );

    if let Some(used) = frames_in_used.as_mut() {
        *used = outcome.frames_in_used as c_long;
    }
    if let Some(gen) = frames_out_gen.as_mut() {
        *gen = outcome.frames_out_gen as c_long;
    }

    outcome.status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::{src_delete, src_new};
    use srcdirect_types::{ConverterType, FrameCounts};

    /// Records every request and answers with a scripted result
    struct StubEngine {
        channels: usize,
        reply: Result<FrameCounts, SrcError>,
        fill: f32,
        seen: Vec<(i64, i64, bool, f64, bool, usize)>,
    }

    impl StubEngine {
        fn new(reply: Result<FrameCounts, SrcError>) -> Self {
            Self {
                channels: 1,
                reply,
                fill: 1.0,
                seen: Vec::new(),
            }
        }
    }

    impl ConversionEngine for StubEngine {
        fn channels(&self) -> usize {
            self.channels
        }

        fn process(
            &mut self,
            request: &ConversionRequest<'_>,
            output: Option<&mut [f32]>,
        ) -> Result<FrameCounts, SrcError> {
            let out_len = output.as_ref().map_or(0, |o| o.len());
            self.seen.push((
                request.input_frames,
                request.output_frames,
                request.end_of_input,
                request.ratio,
                request.input.is_some(),
                out_len,
            ));
            if let (Some(out), Ok(counts)) = (output, &self.reply) {
                let n = counts.output_frames_gen.max(0) as usize * self.channels;
                for s in out.iter_mut().take(n) {
                    *s = self.fill;
                }
            }
            self.reply
        }
    }

    #[test]
    fn counts_pass_through() {
        let mut engine = StubEngine::new(Ok(FrameCounts::new(37, 41)));
        let input = [0.0f32; 64];
        let mut output = [0.0f32; 64];
        let outcome = process_direct(
            &mut engine,
            Some(&input[..]),
            64,
            Some(&mut output[..]),
            64,
            false,
            &1.25,
        );
        assert_eq!(
            outcome,
            DirectOutcome {
                status: 0,
                frames_in_used: 37,
                frames_out_gen: 41
            }
        );
        assert!(outcome.is_ok());
        assert!(output[..41].iter().all(|&s| s == 1.0));
        assert!(output[41..].iter().all(|&s| s == 0.0));
        assert_eq!(engine.seen, vec![(64, 64, false, 1.25, true, 64)]);
    }

    #[test]
    fn status_codes_pass_through() {
        let codes = [1, 2, 3, 4, 6, 10, 11, 13, 16, 22, 42];
        for code in codes {
            let err = SrcError::from_code(code).unwrap();
            let mut engine = StubEngine::new(Err(err));
            let outcome = process_direct(&mut engine, None, 0, None, 0, false, &1.0);
            assert_eq!(outcome.status, code);
            assert_eq!(outcome.error(), Some(err));
            assert_eq!((outcome.frames_in_used, outcome.frames_out_gen), (0, 0));
        }
    }

    #[test]
    fn end_of_input_reaches_engine() {
        let mut engine = StubEngine::new(Ok(FrameCounts::default()));
        for eoi in [true, false, true] {
            process_direct(&mut engine, None, 0, None, 0, eoi, &2.0);
        }
        let flags: Vec<bool> = engine.seen.iter().map(|s| s.2).collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn ratio_is_not_written() {
        let mut engine = StubEngine::new(Ok(FrameCounts::default()));
        let ratio = 48000.0 / 44100.0;
        let before = ratio;
        process_direct(&mut engine, None, 0, None, 0, false, &ratio);
        assert_eq!(ratio.to_bits(), before.to_bits());
        assert_eq!(engine.seen[0].3, ratio);
    }

    #[test]
    fn extern_entry_point_runs_engine() {
        let state = unsafe { src_new(ConverterType::Linear.code(), 1, std::ptr::null_mut()) };
        assert!(!state.is_null());

        let input = vec![0.25f32; 4096];
        let mut output = vec![9.0f32; 12288];
        let mut used: c_long = -1;
        let mut gen: c_long = -1;
        let ratio: c_double = 1.5;

        let status = unsafe {
            src_process_direct(
                state,
                input.as_ptr(),
                4096,
                &mut used,
                output.as_mut_ptr(),
                8192,
                &mut gen,
                1,
                &ratio,
            )
        };
        assert_eq!(status, 0);
        assert_eq!(ratio, 1.5);
        assert_eq!(used, 4096);
        assert_eq!(gen, 6144);
        // nothing past the declared capacity
        assert!(output[8192..].iter().all(|&s| s == 9.0));

        unsafe { src_delete(state) };
    }

    #[test]
    fn extern_entry_point_zero_frames() {
        let state = unsafe { src_new(ConverterType::SincFastest.code(), 2, std::ptr::null_mut()) };
        let mut used: c_long = -1;
        let mut gen: c_long = -1;
        let ratio = 2.0;

        let status = unsafe {
            src_process_direct(
                state,
                std::ptr::null(),
                0,
                &mut used,
                std::ptr::null_mut(),
                0,
                &mut gen,
                0,
                &ratio,
            )
        };
        assert_eq!(status, 0);
        assert_eq!((used, gen), (0, 0));
        unsafe { src_delete(state) };
    }

    #[test]
    fn extern_entry_point_reports_engine_errors() {
        let state = unsafe { src_new(ConverterType::Linear.code(), 1, std::ptr::null_mut()) };
        let input = [0.0f32; 16];
        let mut output = [0.0f32; 16];
        let mut used: c_long = -1;
        let mut gen: c_long = -1;

        let bad_ratio = 1000.0;
        let status = unsafe {
            src_process_direct(
                state,
                input.as_ptr(),
                16,
                &mut used,
                output.as_mut_ptr(),
                16,
                &mut gen,
                0,
                &bad_ratio,
            )
        };
        assert_eq!(status, SrcError::BadSrcRatio.code());
        assert_eq!((used, gen), (0, 0));

        let ratio = 1.0;
        let status = unsafe {
            src_process_direct(
                state,
                std::ptr::null(),
                16,
                &mut used,
                output.as_mut_ptr(),
                16,
                &mut gen,
                0,
                &ratio,
            )
        };
        assert_eq!(status, SrcError::BadDataPtr.code());

        let status = unsafe {
            src_process_direct(
                std::ptr::null_mut(),
                input.as_ptr(),
                16,
                &mut used,
                output.as_mut_ptr(),
                16,
                &mut gen,
                0,
                &ratio,
            )
        };
        assert_eq!(status, SrcError::BadState.code());

        unsafe { src_delete(state) };
    }

    #[test]
    fn extern_entry_point_rejects_overlap() {
        let state = unsafe { src_new(ConverterType::Linear.code(), 1, std::ptr::null_mut()) };
        let mut buffer = vec![0.0f32; 64];
        let ratio = 1.0;
        let base = buffer.as_mut_ptr();

        let status = unsafe {
            src_process_direct(
                state,
                base,
                32,
                std::ptr::null_mut(),
                base.add(16),
                32,
                std::ptr::null_mut(),
                0,
                &ratio,
            )
        };
        assert_eq!(status, SrcError::DataOverlap.code());

        // adjacent halves do not overlap
        let status = unsafe {
            src_process_direct(
                state,
                base,
                32,
                std::ptr::null_mut(),
                base.add(32),
                32,
                std::ptr::null_mut(),
                0,
                &ratio,
            )
        };
        assert_eq!(status, 0);
        unsafe { src_delete(state) };
    }
}
