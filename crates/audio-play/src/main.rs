//! audio-play: decode one media file, resample it to the output format and play it
//! via CPAL.
//!
//! ## Pipeline
//! 1. **Demux + decode**: a producer thread reads packets with Symphonia and decodes
//!    the selected audio stream.
//! 2. **Resample**: Rubato converts each frame to the output rate, channel count and
//!    sample format.
//! 3. **Playback**: the CPAL callback drains a bounded byte ring without blocking;
//!    underruns play silence.
//!
//! The ring is sized by `--buffer-seconds`; `--backpressure` decides whether a full
//! ring stalls the decoder or ends playback with an error.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use audio_play::{cli, runtime};

fn main() -> Result<()> {
    let args = match cli::Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = cli::parse_exit_code(&e);
            let _ = e.print();
            std::process::exit(code);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_play=info,audio_pipeline=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let Some(config) = args.play_config() else {
        return Ok(());
    };
    let quit = runtime::install_ctrlc()?;
    runtime::run_play(config, quit)
}
