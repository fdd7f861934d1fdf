//! Opus encoder and decoder
//!
//! Thin wrappers over audiopus that check rates, channel counts and frame
//! sizes up front and hand back owned buffers.

use audiopus::coder::{Decoder, Encoder};
use audiopus::packet::Packet;
use audiopus::{Application, Channels, MutSignals, SampleRate};
use srcdirect_types::{codec_sample_rate, CODEC_SAMPLE_RATES};
use thiserror::Error;

/// Largest packet the encoder writes
const MAX_PACKET_BYTES: usize = 4000;

/// Longest frame a packet can decode to (120 ms at 48 kHz)
const MAX_DECODED_FRAMES: usize = 5760;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Opus does not support {0}Hz, only 8000, 12000, 16000, 24000 or 48000")]
    UnsupportedRate(u32),

    #[error("Opus supports only 1 or 2 channels, got {0}")]
    UnsupportedChannels(usize),

    #[error("Unknown application type - {0}")]
    UnknownApplication(String),

    #[error("Frame of {frames} frames not encodable; supported frame sizes are {sizes:?}")]
    FrameSize { frames: usize, sizes: [usize; 6] },

    #[error("Opus error - {0}")]
    Opus(#[from] audiopus::Error),
}

/// Encodable frame sizes at `sample_rate`: 2.5, 5, 10, 20, 40 and 60 ms
pub fn frame_sizes(sample_rate: u32) -> [usize; 6] {
    let fs = codec_sample_rate(sample_rate) as usize;
    [fs / 400, fs / 200, fs / 100, fs / 50, fs / 25, 3 * fs / 50]
}

/// Largest frame size at the codec rate that fits `frames` frames taken at
/// `sample_rate`; returns the codec rate and the frame size
pub fn block_frames(sample_rate: u32, frames: usize) -> (u32, usize) {
    let codec_rate = codec_sample_rate(sample_rate);
    let scaled = (frames as f64 * codec_rate as f64 / sample_rate.max(1) as f64).round() as usize;
    let size = frame_sizes(codec_rate)
        .into_iter()
        .rev()
        .find(|&size| scaled >= size)
        .unwrap_or(codec_rate as usize / 400);
    (codec_rate, size)
}

/// Application names as hosts spell them
pub fn parse_application(name: &str) -> Result<Application, CodecError> {
    match name.trim().to_lowercase().as_str() {
        "voip" => Ok(Application::Voip),
        "audio" | "music" => Ok(Application::Audio),
        "restricted low delay" => Ok(Application::LowDelay),
        _ => Err(CodecError::UnknownApplication(name.to_string())),
    }
}

fn opus_rate(sample_rate: u32) -> Result<SampleRate, CodecError> {
    if !CODEC_SAMPLE_RATES.contains(&sample_rate) {
        return Err(CodecError::UnsupportedRate(sample_rate));
    }
    SampleRate::try_from(sample_rate as i32).map_err(CodecError::from)
}

fn opus_channels(channels: usize) -> Result<Channels, CodecError> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        other => Err(CodecError::UnsupportedChannels(other)),
    }
}

pub struct OpusEncoder {
    encoder: Encoder,
    channels: usize,
    sample_rate: u32,
    packet: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(
        sample_rate: u32,
        channels: usize,
        application: Application,
    ) -> Result<Self, CodecError> {
        let encoder = Encoder::new(opus_rate(sample_rate)?, opus_channels(channels)?, application)?;
        tracing::debug!(
            "Opus encoder: {} Hz, {} channels, {:?}",
            sample_rate,
            channels,
            application
        );

        Ok(Self {
            encoder,
            channels,
            sample_rate,
            packet: vec![0; MAX_PACKET_BYTES],
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Encode one frame of interleaved PCM into a packet
    pub fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>, CodecError> {
        let sizes = frame_sizes(self.sample_rate);
        let frames = pcm.len() / self.channels;
        if pcm.len() % self.channels != 0 || !sizes.contains(&frames) {
            return Err(CodecError::FrameSize { frames, sizes });
        }

        let len = self.encoder.encode_float(pcm, &mut self.packet)?;
        Ok(self.packet[..len].to_vec())
    }
}

pub struct OpusDecoder {
    decoder: Decoder,
    channels: usize,
    sample_rate: u32,
    pcm: Vec<f32>,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32, channels: usize) -> Result<Self, CodecError> {
        let decoder = Decoder::new(opus_rate(sample_rate)?, opus_channels(channels)?)?;
        tracing::debug!("Opus decoder: {} Hz, {} channels", sample_rate, channels);

        Ok(Self {
            decoder,
            channels,
            sample_rate,
            pcm: vec![0.0; MAX_DECODED_FRAMES * channels],
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Decode one packet into interleaved PCM; an empty packet decodes to
    /// nothing
    pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<f32>, CodecError> {
        if packet.is_empty() {
            return Ok(Vec::new());
        }

        let packet = Packet::try_from(packet)?;
        let output = MutSignals::try_from(&mut self.pcm[..])?;
        let frames = self.decoder.decode_float(Some(packet), output, false)?;
        Ok(self.pcm[..frames * self.channels].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn frame_sizes_per_rate() {
        assert_eq!(frame_sizes(48000), [120, 240, 480, 960, 1920, 2880]);
        assert_eq!(frame_sizes(8000), [20, 40, 80, 160, 320, 480]);
        assert_eq!(frame_sizes(44100), frame_sizes(48000));
    }

    #[test]
    fn block_frames_pick_largest_fit() {
        // 40 ms of input maps to a 40 ms codec frame
        assert_eq!(block_frames(44100, 44100 / 25), (48000, 1920));
        assert_eq!(block_frames(16000, 16000 / 25), (16000, 640));
        assert_eq!(block_frames(22050, 10000), (24000, 1440));
        assert_eq!(block_frames(48000, 10), (48000, 120));
    }

    #[test]
    fn application_names() {
        assert_eq!(parse_application("Music").unwrap(), Application::Audio);
        assert_eq!(parse_application("voip").unwrap(), Application::Voip);
        assert!(matches!(
            parse_application("podcast"),
            Err(CodecError::UnknownApplication(_))
        ));
    }

    #[test]
    fn rejects_unsupported_setup() {
        assert!(matches!(
            OpusEncoder::new(44100, 1, Application::Audio),
            Err(CodecError::UnsupportedRate(44100))
        ));
        assert!(matches!(
            OpusDecoder::new(48000, 3),
            Err(CodecError::UnsupportedChannels(3))
        ));
    }

    #[test]
    fn rejects_odd_frame_sizes() {
        let mut encoder = OpusEncoder::new(48000, 1, Application::Audio).unwrap();
        assert!(matches!(
            encoder.encode(&[0.0; 1000]),
            Err(CodecError::FrameSize { frames: 1000, .. })
        ));
    }

    #[test]
    fn packets_decode_to_frame_length() {
        let mut encoder = OpusEncoder::new(48000, 2, Application::Audio).unwrap();
        let mut decoder = OpusDecoder::new(48000, 2).unwrap();
        let pcm: Vec<f32> = tone(48000, 960).into_iter().flat_map(|s| [s, s]).collect();

        for _ in 0..3 {
            let packet = encoder.encode(&pcm).unwrap();
            assert!(!packet.is_empty());
            let decoded = decoder.decode(&packet).unwrap();
            assert_eq!(decoded.len(), 2 * 960);
        }
        assert!(decoder.decode(&[]).unwrap().is_empty());
    }
}
