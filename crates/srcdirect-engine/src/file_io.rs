//! WAV file conversion

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use srcdirect_types::ConverterType;
use std::path::Path;

use crate::converter::SampleRateConverter;

/// Load a WAV file as interleaved f32 samples in [-1.0, 1.0]
pub fn read_wav_interleaved(path: &Path) -> Result<(Vec<f32>, WavSpec)> {
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .context("Failed to read float samples")?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<_, _>>()
                .context("Failed to read integer samples")?
        }
    };

    Ok((samples, spec))
}

/// Write interleaved f32 samples as a 32-bit float WAV file
pub fn write_wav_interleaved(
    path: &Path,
    samples: &[f32],
    channels: u16,
    sample_rate: u32,
) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Resample a WAV file to `target_rate`; returns the number of frames written
pub fn convert_wav_file(
    input: &Path,
    output: &Path,
    target_rate: u32,
    converter: ConverterType,
) -> Result<usize> {
    let (samples, spec) = read_wav_interleaved(input)?;
    let channels = spec.channels as usize;

    let converted = if spec.sample_rate == target_rate {
        samples
    } else {
        let ratio = target_rate as f64 / spec.sample_rate as f64;
        let mut src = SampleRateConverter::new(converter, channels, ratio)?;
        src.process_concat(&samples, true)?
    };

    tracing::info!(
        "Converted {} ({} Hz) -> {} ({} Hz), {} frames",
        input.display(),
        spec.sample_rate,
        output.display(),
        target_rate,
        converted.len() / channels.max(1)
    );

    write_wav_interleaved(output, &converted, spec.channels, target_rate)?;
    Ok(converted.len() / channels.max(1))
}
