use crate::buffer::Backpressure;
use crate::format::SampleFormat;

/// Playback tuning parameters shared by decode/resample/playback stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Playback buffer size in seconds of output audio.
    pub buffer_seconds: f32,
    /// Output sample rate; `None` keeps the source rate.
    pub sample_rate: Option<u32>,
    /// Output channel count.
    pub channels: u16,
    /// Output sample encoding.
    pub sample_format: SampleFormat,
    /// What the producer does when the playback buffer is full.
    pub backpressure: Backpressure,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            buffer_seconds: 2.0,
            sample_rate: None,
            channels: 2,
            sample_format: SampleFormat::F32,
            backpressure: Backpressure::Block,
        }
    }
}
