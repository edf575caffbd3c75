use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "waveplay", version)]
pub struct Args {
    /// Path to an audio file (FLAC, MP3, AAC, ALAC, WAV, AIFF, Vorbis)
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Refill cadence in milliseconds (observed latency is about 4x this)
    #[arg(long, default_value_t = 50)]
    pub latency_ms: u32,

    /// Playback volume in percent, 0-100
    #[arg(long, default_value_t = 100)]
    pub volume: u8,

    /// Start playback this many seconds into the file
    #[arg(long, default_value_t = 0.0)]
    pub seek: f64,
}
