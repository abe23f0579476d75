use std::path::PathBuf;

pub use audio_pipeline::PlaybackConfig;

/// Everything needed to play one file.
#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub playback: PlaybackConfig,
}
