//! waveplay is a small CLI that decodes an audio file and plays it through
//! the default (or a named) output device.
//!
//! Decoding runs through Symphonia; playback is driven by the latency-based
//! refill engine in `wave-player`, which keeps a small rotation of device
//! buffers topped up until the file ends or the user interrupts.

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::{bounded, select};
use tracing_subscriber::EnvFilter;
use wave_player::config::PlaybackConfig;
use wave_player::decode::SymphoniaBackend;
use wave_player::decoder::WaveDecoder;
use wave_player::device;
use wave_player::engine::PlaybackEngine;
use wave_player::sink::CpalOutputBackend;
use wave_types::StopReason;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        device::list_devices(&host)?;
        return Ok(());
    }

    let Some(path) = args.path.clone() else {
        bail!("no input file (see --help)");
    };
    if args.volume > 100 {
        bail!("volume must be between 0 and 100");
    }
    if args.latency_ms == 0 {
        bail!("latency must be nonzero");
    }

    let decoder = WaveDecoder::open(&SymphoniaBackend, &path)
        .with_context(|| format!("open {}", path.display()))?;
    let format = decoder.wave_format();
    tracing::info!(
        rate_hz = format.sample_rate,
        channels = format.channels,
        seconds = decoder.len() as f64 / format.bytes_per_second() as f64,
        "source ready"
    );

    if args.seek > 0.0 {
        let byte_offset = (args.seek * format.bytes_per_second() as f64) as u64;
        decoder
            .set_position(byte_offset)
            .with_context(|| format!("seek to {}s", args.seek))?;
    }

    let config = PlaybackConfig {
        latency_ms: args.latency_ms,
        ..PlaybackConfig::default()
    };
    let backend = CpalOutputBackend::new(args.device.clone(), config.clone());
    let mut engine = PlaybackEngine::with_config(Box::new(backend), config);
    engine.initialize(Box::new(decoder))?;
    engine.set_volume(f32::from(args.volume) / 100.0)?;
    engine.play()?;

    let (ctrl_tx, ctrl_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = ctrl_tx.send(());
    })
    .context("install signal handler")?;

    let events = engine.events();
    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else { break };
                match event.reason {
                    StopReason::Eof => {
                        tracing::info!("playback finished");
                        break;
                    }
                    StopReason::Error => {
                        bail!("playback failed (device code {})", engine.last_error());
                    }
                    StopReason::Stopped => break,
                }
            }
            recv(ctrl_rx) -> _ => {
                tracing::info!("interrupted, stopping");
                engine.stop()?;
            }
        }
    }

    Ok(())
}
