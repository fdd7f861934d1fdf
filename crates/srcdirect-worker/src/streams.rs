//! Stream table
//!
//! Each stream is opened with `begin`, fed with `proc` and closed with
//! `end`. The payload of `begin` fixes the stream mode for its lifetime:
//! `samples` converts rates, `enc` encodes to Opus and `dec` decodes Opus.
//! A stream that hits an error is closed and reports the error once.

use std::collections::HashMap;

use srcdirect_engine::codec::{self, OpusDecoder, OpusEncoder};
use srcdirect_engine::SampleRateConverter;
use srcdirect_types::{
    codec_sample_rate, BeginStream, ConverterType, EndStream, ProcStream, StreamCommand,
    StreamDecoded, StreamPacket, StreamResponse, StreamSamples,
};

const INVALID_MODE: &str = "Invalid stream mode.";

/// Data carried by one message
#[derive(Clone, Copy)]
enum Payload<'a> {
    Samples(&'a [f32]),
    Enc(&'a [f32]),
    Dec(&'a [u8]),
}

impl<'a> Payload<'a> {
    /// Pick the payload of a message; `enc` wins over `dec`, `dec` over `samples`
    fn pick(
        samples: Option<&'a [f32]>,
        enc: Option<&'a [f32]>,
        dec: Option<&'a [u8]>,
    ) -> Option<Self> {
        enc.map(Payload::Enc)
            .or(dec.map(Payload::Dec))
            .or(samples.map(Payload::Samples))
    }
}

enum Mode {
    Convert,
    Encode {
        encoder: OpusEncoder,
        /// Samples per encoded frame (interleaved)
        block_len: usize,
        /// Codec-rate samples waiting for a full block
        buffer: Vec<f32>,
    },
    Decode(OpusDecoder),
}

impl Mode {
    fn accepts(&self, payload: &Payload<'_>) -> bool {
        matches!(
            (self, payload),
            (Mode::Convert, Payload::Samples(_))
                | (Mode::Encode { .. }, Payload::Enc(_))
                | (Mode::Decode(_), Payload::Dec(_))
        )
    }

    fn empty_payload(&self) -> Payload<'static> {
        match self {
            Mode::Convert => Payload::Samples(&[]),
            Mode::Encode { .. } => Payload::Enc(&[]),
            Mode::Decode(_) => Payload::Dec(&[]),
        }
    }
}

struct Stream {
    id: String,
    num_channels: u16,
    /// Rate of the samples the host sends or expects
    sample_rate: u32,
    /// Rate on the far side of the converter: the target rate when
    /// converting, the codec rate when encoding or decoding
    peer_rate: u32,
    /// `None` when both rates match
    converter: Option<SampleRateConverter>,
    mode: Mode,
}

impl Stream {
    fn open(msg: &BeginStream, payload: Option<&Payload<'_>>) -> Result<Self, String> {
        if msg.num_channels == 0 || msg.sample_rate == 0 {
            return Err("Could not create stream.".to_string());
        }

        let channels = msg.num_channels as usize;
        let converter_type = match &msg.converter {
            Some(name) => name.parse::<ConverterType>().map_err(|e| e.to_string())?,
            None => ConverterType::default(),
        };
        let codec_rate = codec_sample_rate(msg.sample_rate);

        let (mode, peer_rate, ratio) = match payload {
            Some(Payload::Enc(_)) => {
                let application = codec::parse_application("music").map_err(|e| e.to_string())?;
                let encoder = OpusEncoder::new(codec_rate, channels, application)
                    .map_err(|e| e.to_string())?;
                let (_, frames) = codec::block_frames(msg.sample_rate, msg.sample_rate as usize / 25);
                let mode = Mode::Encode {
                    encoder,
                    block_len: frames * channels,
                    buffer: Vec::new(),
                };
                (mode, codec_rate, codec_rate as f64 / msg.sample_rate as f64)
            }
            Some(Payload::Dec(_)) => {
                let decoder = OpusDecoder::new(codec_rate, channels).map_err(|e| e.to_string())?;
                (
                    Mode::Decode(decoder),
                    codec_rate,
                    msg.sample_rate as f64 / codec_rate as f64,
                )
            }
            Some(Payload::Samples(_)) | None => {
                let target_rate = msg.target_rate.unwrap_or(codec_rate);
                (
                    Mode::Convert,
                    target_rate,
                    target_rate as f64 / msg.sample_rate as f64,
                )
            }
        };

        let converter = if peer_rate == msg.sample_rate {
            None
        } else {
            Some(
                SampleRateConverter::new(converter_type, channels, ratio)
                    .map_err(|e| e.to_string())?,
            )
        };

        tracing::debug!(
            "Stream {} opened: {} Hz <-> {} Hz, {} channels, converter={}",
            msg.stream,
            msg.sample_rate,
            peer_rate,
            msg.num_channels,
            converter.is_some()
        );

        Ok(Self {
            id: msg.stream.clone(),
            num_channels: msg.num_channels,
            sample_rate: msg.sample_rate,
            peer_rate,
            converter,
            mode,
        })
    }

    fn check_frames(&self, samples: &[f32]) -> Result<(), String> {
        if samples.len() % self.num_channels as usize != 0 {
            return Err("Invalid frame structure in sample array.".to_string());
        }
        Ok(())
    }

    /// Run the converter, if any
    fn resample(&mut self, samples: &[f32], the_end: bool) -> Result<Vec<Vec<f32>>, String> {
        match self.converter.as_mut() {
            Some(converter) => converter
                .process(samples, the_end)
                .map_err(|e| e.to_string()),
            None if samples.is_empty() => Ok(Vec::new()),
            None => Ok(vec![samples.to_vec()]),
        }
    }

    fn feed(&mut self, payload: Payload<'_>, the_end: bool) -> Result<Vec<StreamResponse>, String> {
        if !self.mode.accepts(&payload) {
            return Err(INVALID_MODE.to_string());
        }

        match payload {
            Payload::Samples(samples) => self.convert(samples, the_end),
            Payload::Enc(samples) => self.encode(samples, the_end),
            Payload::Dec(packet) => self.decode(packet, the_end),
        }
    }

    fn convert(&mut self, samples: &[f32], the_end: bool) -> Result<Vec<StreamResponse>, String> {
        self.check_frames(samples)?;
        let blocks = self.resample(samples, the_end)?;

        let mut responses = flag_last(blocks, the_end, |samples, end| {
            StreamResponse::Samples(StreamSamples {
                stream: self.id.clone(),
                samples,
                num_channels: self.num_channels,
                sample_rate: self.peer_rate,
                end,
            })
        });
        if the_end && responses.is_empty() {
            responses.push(StreamResponse::Samples(StreamSamples {
                stream: self.id.clone(),
                samples: Vec::new(),
                num_channels: self.num_channels,
                sample_rate: self.peer_rate,
                end: true,
            }));
        }
        Ok(responses)
    }

    fn encode(&mut self, samples: &[f32], the_end: bool) -> Result<Vec<StreamResponse>, String> {
        self.check_frames(samples)?;
        let converted = self.resample(samples, the_end)?;

        let Mode::Encode {
            encoder,
            block_len,
            buffer,
        } = &mut self.mode
        else {
            return Err(INVALID_MODE.to_string());
        };

        for block in converted {
            buffer.extend_from_slice(&block);
        }
        let block_len = *block_len;
        if the_end && buffer.len() % block_len > 0 {
            // pad the last frame with silence
            let padding = block_len - buffer.len() % block_len;
            buffer.resize(buffer.len() + padding, 0.0);
        }

        let mut packets = Vec::new();
        let mut offset = 0;
        while buffer.len() - offset >= block_len {
            let packet = encoder
                .encode(&buffer[offset..offset + block_len])
                .map_err(|e| e.to_string())?;
            packets.push(Some(packet));
            offset += block_len;
        }
        buffer.drain(..offset);

        if the_end && packets.is_empty() {
            packets.push(None);
        }
        Ok(flag_last(packets, the_end, |enc, end| {
            StreamResponse::Packet(StreamPacket {
                stream: self.id.clone(),
                enc,
                num_channels: self.num_channels,
                sample_rate: self.sample_rate,
                enc_sample_rate: self.peer_rate,
                end,
            })
        }))
    }

    fn decode(&mut self, packet: &[u8], the_end: bool) -> Result<Vec<StreamResponse>, String> {
        let pcm = match &mut self.mode {
            Mode::Decode(decoder) => decoder.decode(packet).map_err(|e| e.to_string())?,
            _ => return Err(INVALID_MODE.to_string()),
        };

        let mut blocks = self.resample(&pcm, the_end)?;
        if the_end && blocks.is_empty() {
            blocks.push(Vec::new());
        }
        Ok(flag_last(blocks, the_end, |dec, end| {
            StreamResponse::Decoded(StreamDecoded {
                stream: self.id.clone(),
                dec,
                num_channels: self.num_channels,
                sample_rate: self.sample_rate,
                enc_sample_rate: self.peer_rate,
                end,
            })
        }))
    }
}

/// Build one response per item; only the last of a final batch carries `end`
fn flag_last<T>(
    items: Vec<T>,
    the_end: bool,
    build: impl Fn(T, bool) -> StreamResponse,
) -> Vec<StreamResponse> {
    let count = items.len();
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| build(item, the_end && i + 1 == count))
        .collect()
}

/// Result of handling one command
pub enum Handled {
    Responses(Vec<StreamResponse>),
    Shutdown,
}

#[derive(Default)]
pub struct StreamTable {
    streams: HashMap<String, Stream>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Parse and handle one line of input
    pub fn handle_line(&mut self, line: &str) -> Handled {
        match serde_json::from_str::<StreamCommand>(line) {
            Ok(command) => self.handle(command),
            Err(e) => {
                tracing::error!("Invalid message received: {}", e);
                Handled::Responses(vec![StreamResponse::error(
                    "",
                    format!("Invalid message: {}", e),
                )])
            }
        }
    }

    pub fn handle(&mut self, command: StreamCommand) -> Handled {
        let responses = match command {
            StreamCommand::Begin(msg) => self.begin(msg),
            StreamCommand::Proc(msg) => self.proc(msg),
            StreamCommand::End(msg) => self.end(msg),
            StreamCommand::Shutdown => {
                tracing::info!("Shutdown requested with {} open streams", self.streams.len());
                self.streams.clear();
                return Handled::Shutdown;
            }
        };
        Handled::Responses(responses)
    }

    fn fail(&mut self, id: &str, error: String) -> Vec<StreamResponse> {
        tracing::warn!("Stream {} failed: {}", id, error);
        self.streams.remove(id);
        vec![StreamResponse::error(id, error)]
    }

    fn begin(&mut self, msg: BeginStream) -> Vec<StreamResponse> {
        if self.streams.remove(&msg.stream).is_some() {
            tracing::debug!("Stream {} restarted", msg.stream);
        }

        let payload = Payload::pick(
            msg.samples.as_deref(),
            msg.enc.as_deref(),
            msg.dec.as_deref(),
        );
        let mut stream = match Stream::open(&msg, payload.as_ref()) {
            Ok(stream) => stream,
            Err(e) => return self.fail(&msg.stream, e),
        };

        let responses = match payload {
            Some(payload) => match stream.feed(payload, false) {
                Ok(responses) => responses,
                Err(e) => return self.fail(&msg.stream, e),
            },
            None => Vec::new(),
        };

        self.streams.insert(msg.stream.clone(), stream);
        responses
    }

    fn proc(&mut self, msg: ProcStream) -> Vec<StreamResponse> {
        let payload = Payload::pick(msg.samples.as_deref(), msg.enc.as_deref(), msg.dec.as_deref());
        let result = match (self.streams.get_mut(&msg.stream), payload) {
            (None, _) => Err("Unknown stream".to_string()),
            (Some(_), None) => Err(INVALID_MODE.to_string()),
            (Some(stream), Some(payload)) => stream.feed(payload, false),
        };

        match result {
            Ok(responses) => responses,
            Err(e) => self.fail(&msg.stream, e),
        }
    }

    fn end(&mut self, msg: EndStream) -> Vec<StreamResponse> {
        let Some(mut stream) = self.streams.remove(&msg.stream) else {
            return self.fail(&msg.stream, "Unknown stream".to_string());
        };

        let payload = Payload::pick(msg.samples.as_deref(), msg.enc.as_deref(), msg.dec.as_deref())
            .unwrap_or_else(|| stream.mode.empty_payload());
        match stream.feed(payload, true) {
            Ok(responses) => responses,
            Err(e) => self.fail(&msg.stream, e),
        }
    }
}
