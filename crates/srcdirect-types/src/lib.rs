//! Shared types for srcdirect
//!
//! This crate contains the value types shared by the conversion engine,
//! its C-ABI surface and the stream worker.
//!
//! Protocol types are annotated with `#[ts(export)]` for TypeScript generation via ts-rs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use ts_rs::TS;

// ============================================================================
// Converter Types
// ============================================================================

/// Interpolator family used by a conversion engine.
///
/// Discriminants follow the libsamplerate numbering so hosts can pass the
/// integer straight through `src_new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
#[repr(i32)]
pub enum ConverterType {
    SincBestQuality = 0,
    SincMediumQuality = 1,
    #[default]
    SincFastest = 2,
    ZeroOrderHold = 3,
    Linear = 4,
}

impl ConverterType {
    pub const ALL: [ConverterType; 5] = [
        ConverterType::SincBestQuality,
        ConverterType::SincMediumQuality,
        ConverterType::SincFastest,
        ConverterType::ZeroOrderHold,
        ConverterType::Linear,
    ];

    /// Map a libsamplerate converter number to a type
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as i32 == code)
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Host-facing name, as accepted by [`FromStr`]
    pub fn name(self) -> &'static str {
        match self {
            ConverterType::SincBestQuality => "sinc best",
            ConverterType::SincMediumQuality => "sinc medium",
            ConverterType::SincFastest => "sinc fastest",
            ConverterType::ZeroOrderHold => "zero order hold",
            ConverterType::Linear => "linear",
        }
    }

    pub fn is_sinc(self) -> bool {
        matches!(
            self,
            ConverterType::SincBestQuality
                | ConverterType::SincMediumQuality
                | ConverterType::SincFastest
        )
    }
}

impl fmt::Display for ConverterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a converter name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported sample rate converter type {0}")]
pub struct UnknownConverter(pub String);

impl FromStr for ConverterType {
    type Err = UnknownConverter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" | "sinc fastest" => Ok(ConverterType::SincFastest),
            "sinc medium" => Ok(ConverterType::SincMediumQuality),
            "sinc best" => Ok(ConverterType::SincBestQuality),
            "zero order hold" => Ok(ConverterType::ZeroOrderHold),
            "linear" => Ok(ConverterType::Linear),
            _ => Err(UnknownConverter(s.to_string())),
        }
    }
}

// ============================================================================
// Engine Status Codes
// ============================================================================

/// Largest supported conversion ratio; the smallest is its reciprocal.
pub const MAX_RATIO: f64 = 256.0;

/// Check that a ratio is finite and within `[1/MAX_RATIO, MAX_RATIO]`
pub fn is_valid_ratio(ratio: f64) -> bool {
    ratio.is_finite() && (1.0 / MAX_RATIO..=MAX_RATIO).contains(&ratio)
}

/// Status code reported as success
pub const SRC_OK: i32 = 0;

macro_rules! src_errors {
    ($($(#[$doc:meta])* $variant:ident = $code:literal => $msg:tt,)*) => {
        /// Failure reported by a conversion engine.
        ///
        /// Every variant carries a stable integer code (libsamplerate
        /// numbering). Codes outside the table round-trip through
        /// [`SrcError::Unknown`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
        pub enum SrcError {
            $(
                $(#[$doc])*
                #[error($msg)]
                $variant,
            )*
            /// Code not known to this crate
            #[error("Unknown error code {0}.")]
            Unknown(i32),
        }

        impl SrcError {
            /// Look up a non-zero status code
            pub fn from_code(code: i32) -> Option<Self> {
                match code {
                    SRC_OK => None,
                    $($code => Some(SrcError::$variant),)*
                    other => Some(SrcError::Unknown(other)),
                }
            }

            pub fn code(&self) -> i32 {
                match self {
                    $(SrcError::$variant => $code,)*
                    SrcError::Unknown(code) => *code,
                }
            }
        }

        /// NUL-terminated description of a status code
        pub fn strerror_nul(code: i32) -> &'static str {
            match code {
                SRC_OK => "No error.\0",
                $($code => concat!($msg, "\0"),)*
                _ => "Unknown error code.\0",
            }
        }
    };
}

src_errors! {
    /// Allocation failed
    MallocFailed = 1 => "Malloc failed.",
    /// Engine handle is null
    BadState = 2 => "Engine state pointer is NULL.",
    /// Request is missing
    BadData = 3 => "Conversion request is NULL.",
    /// Input or output buffer pointer is null
    BadDataPtr = 4 => "Input or output buffer pointer is NULL.",
    BadSrcRatio = 6 => "Conversion ratio outside [1/256, 256] range.",
    BadConverter = 10 => "Bad converter number.",
    BadChannelCount = 11 => "Channel count must be >= 1.",
    /// Buffer shorter than the frame count it was declared with
    SizeIncompatibility = 13 => "Buffer length smaller than frames * channels.",
    DataOverlap = 16 => "Input and output data arrays overlap.",
    BadInternalState = 22 => "Internal error. Bad internal state.",
}

/// Description of a status code, as `src_strerror` reports it
pub fn strerror(code: i32) -> &'static str {
    strerror_nul(code).trim_end_matches('\0')
}

/// Turn an engine result into the status code the C surface returns
pub fn status_code<T>(result: &Result<T, SrcError>) -> i32 {
    match result {
        Ok(_) => SRC_OK,
        Err(e) => e.code(),
    }
}

// ============================================================================
// Conversion Results
// ============================================================================

/// Frame counts reported by an engine for one processing call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounts {
    /// Input frames the engine consumed
    pub input_frames_used: i64,
    /// Output frames the engine wrote
    pub output_frames_gen: i64,
}

impl FrameCounts {
    pub fn new(input_frames_used: i64, output_frames_gen: i64) -> Self {
        Self {
            input_frames_used,
            output_frames_gen,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Settings for a streaming converter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConverterSettings {
    /// Interpolator family
    pub converter: ConverterType,
    /// Capacity of the staging buffer handed to the engine, in frames
    pub input_chunk_frames: usize,
    /// Output buffer is sized `input_chunk_frames * ratio * output_headroom`
    pub output_headroom: f64,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            converter: ConverterType::default(),
            input_chunk_frames: 4096,
            output_headroom: 1.1,
        }
    }
}

/// Sample rates the Opus codec accepts
pub const CODEC_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Smallest codec rate not below `sample_rate`, or 48 kHz above that
pub fn codec_sample_rate(sample_rate: u32) -> u32 {
    CODEC_SAMPLE_RATES
        .into_iter()
        .find(|&r| sample_rate <= r)
        .unwrap_or(48000)
}

// ============================================================================
// Stream Worker Protocol
// ============================================================================

/// Open a stream.
///
/// The payload field picks the stream mode: `enc` opens an Opus encoding
/// stream, `dec` a decoding stream, and `samples` a plain rate conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct BeginStream {
    pub stream: String,
    #[serde(default)]
    pub samples: Option<Vec<f32>>,
    /// PCM to encode (interleaved)
    #[serde(default)]
    pub enc: Option<Vec<f32>>,
    /// One Opus packet to decode
    #[serde(default)]
    pub dec: Option<Vec<u8>>,
    pub num_channels: u16,
    /// Sample rate of the samples sent (or, when decoding, expected) on this stream
    pub sample_rate: u32,
    /// Sample rate of converted samples; defaults to the codec rate.
    /// Ignored by encoding and decoding streams.
    #[serde(default)]
    pub target_rate: Option<u32>,
    /// Converter name (`default`, `linear`, ...)
    #[serde(default)]
    pub converter: Option<String>,
}

/// Feed more data into an open stream; the field must match the stream mode
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProcStream {
    pub stream: String,
    #[serde(default)]
    pub samples: Option<Vec<f32>>,
    #[serde(default)]
    pub enc: Option<Vec<f32>>,
    #[serde(default)]
    pub dec: Option<Vec<u8>>,
}

/// Close a stream, flushing everything still buffered
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct EndStream {
    pub stream: String,
    #[serde(default)]
    pub samples: Option<Vec<f32>>,
    #[serde(default)]
    pub enc: Option<Vec<f32>>,
    #[serde(default)]
    pub dec: Option<Vec<u8>>,
}

/// Worker command for IPC
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum StreamCommand {
    Begin(BeginStream),
    Proc(ProcStream),
    End(EndStream),
    /// Shutdown worker
    Shutdown,
}

/// Block of converted samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StreamSamples {
    pub stream: String,
    pub samples: Vec<f32>,
    pub num_channels: u16,
    /// Sample rate of `samples`
    pub sample_rate: u32,
    /// Last message for this stream
    pub end: bool,
}

/// One encoded Opus packet.
///
/// An encoding stream that ends with nothing left to encode sends a final
/// message without `enc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StreamPacket {
    pub stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<Vec<u8>>,
    pub num_channels: u16,
    /// Sample rate the host sent
    pub sample_rate: u32,
    /// Rate the codec ran at
    pub enc_sample_rate: u32,
    pub end: bool,
}

/// Decoded PCM, converted to the host's sample rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StreamDecoded {
    pub stream: String,
    pub dec: Vec<f32>,
    pub num_channels: u16,
    pub sample_rate: u32,
    pub enc_sample_rate: u32,
    pub end: bool,
}

/// Stream failure; the stream is closed once this is sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StreamFailure {
    pub stream: String,
    pub error: String,
}

/// Worker response for IPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(untagged)]
pub enum StreamResponse {
    Samples(StreamSamples),
    Decoded(StreamDecoded),
    Packet(StreamPacket),
    Error(StreamFailure),
}

impl StreamResponse {
    pub fn error(stream: impl Into<String>, error: impl Into<String>) -> Self {
        StreamResponse::Error(StreamFailure {
            stream: stream.into(),
            error: error.into(),
        })
    }

    pub fn stream(&self) -> &str {
        match self {
            StreamResponse::Samples(s) => &s.stream,
            StreamResponse::Decoded(d) => &d.stream,
            StreamResponse::Packet(p) => &p.stream,
            StreamResponse::Error(e) => &e.stream,
        }
    }

    /// True when this is the last message of its stream
    pub fn is_end(&self) -> bool {
        match self {
            StreamResponse::Samples(s) => s.end,
            StreamResponse::Decoded(d) => d.end,
            StreamResponse::Packet(p) => p.end,
            StreamResponse::Error(_) => true,
        }
    }
}
