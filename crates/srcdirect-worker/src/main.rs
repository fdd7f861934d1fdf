//! srcdirect Worker Process
//!
//! Runs sample rate conversion and Opus streams for a host that talks to
//! it over JSON lines on stdin/stdout.
//!
//! `srcdirect-worker convert <in.wav> <out.wav> <rate> [converter]` converts
//! a single file instead.

mod streams;

use anyhow::{bail, Context, Result};
use srcdirect_types::{ConverterType, StreamResponse};
use std::io::{self, BufRead, Write};
use std::path::Path;
use streams::{Handled, StreamTable};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Initialize tracing to stderr (stdout is for IPC)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("convert") => run_convert(&args[1..]),
        Some(other) => Err(anyhow::anyhow!("Unknown subcommand: {}", other)),
        None => run_worker(),
    };

    if let Err(e) = result {
        tracing::error!("Worker error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_convert(args: &[String]) -> Result<()> {
    let [input, output, rate, rest @ ..] = args else {
        bail!("usage: srcdirect-worker convert <in.wav> <out.wav> <rate> [converter]");
    };

    let rate: u32 = rate
        .parse()
        .with_context(|| format!("Invalid target rate: {}", rate))?;
    let converter = match rest.first() {
        Some(name) => name.parse::<ConverterType>()?,
        None => ConverterType::default(),
    };

    let frames = srcdirect_engine::file_io::convert_wav_file(
        Path::new(input),
        Path::new(output),
        rate,
        converter,
    )?;
    println!("{} frames written to {}", frames, output);
    Ok(())
}

fn write_response(out: &mut impl Write, response: &StreamResponse) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string(response)?)?;
    Ok(())
}

fn run_worker() -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut table = StreamTable::new();

    tracing::info!("Worker ready, listening for commands");

    for line in stdin.lock().lines() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        match table.handle_line(&line) {
            Handled::Responses(responses) => {
                for response in &responses {
                    write_response(&mut stdout, response)?;
                }
                stdout.flush()?;
            }
            Handled::Shutdown => {
                tracing::info!("Shutdown command received");
                break;
            }
        }
    }

    if !table.is_empty() {
        tracing::warn!("{} streams still open at shutdown", table.len());
    }
    tracing::info!("Worker shutting down");
    Ok(())
}
