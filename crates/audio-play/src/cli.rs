use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use audio_pipeline::{Backpressure, PlaybackConfig, SampleFormat};

use crate::config::PlayConfig;

#[derive(Parser, Debug)]
#[command(name = "audio-play", version, about = "Decode, resample and play one audio file")]
pub struct Args {
    /// Path to the media file to play
    #[arg(required_unless_present = "list_devices")]
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Output sample rate in Hz (defaults to the source rate, if the device supports it)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub sample_rate: Option<u32>,

    /// Output channel count
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u16).range(1..))]
    pub channels: u16,

    /// Output sample format
    #[arg(long, value_enum, default_value_t = FormatArg::F32)]
    pub format: FormatArg,

    /// Playback buffer size in seconds of output audio
    #[arg(long, default_value_t = 2.0)]
    pub buffer_seconds: f32,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024, value_parser = clap::value_parser!(u32).range(1..))]
    pub chunk_frames: u32,

    /// What the decoder does when the playback buffer is full
    #[arg(long, value_enum, default_value_t = BackpressureArg::Block)]
    pub backpressure: BackpressureArg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    F32,
    I16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackpressureArg {
    /// Wait for the output to catch up
    Block,
    /// Stop with an error
    Reject,
}

impl From<FormatArg> for SampleFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::F32 => SampleFormat::F32,
            FormatArg::I16 => SampleFormat::I16,
        }
    }
}

impl From<BackpressureArg> for Backpressure {
    fn from(value: BackpressureArg) -> Self {
        match value {
            BackpressureArg::Block => Backpressure::Block,
            BackpressureArg::Reject => Backpressure::Reject,
        }
    }
}

impl Args {
    /// Playback settings for the positional path; `None` in `--list-devices` mode.
    pub fn play_config(&self) -> Option<PlayConfig> {
        let path = self.path.clone()?;
        Some(PlayConfig {
            path,
            device: self.device.clone(),
            playback: PlaybackConfig {
                chunk_frames: self.chunk_frames as usize,
                buffer_seconds: self.buffer_seconds,
                sample_rate: self.sample_rate,
                channels: self.channels,
                sample_format: self.format.into(),
                backpressure: self.backpressure.into(),
            },
        })
    }
}

/// Exit status for a failed parse: 0 for `--help`/`--version`, 1 for usage errors.
pub fn parse_exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() { 1 } else { 0 }
}
