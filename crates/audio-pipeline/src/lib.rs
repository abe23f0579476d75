//! Decode → resample → playback pipeline.
//!
//! A producer thread demuxes, decodes and resamples a media file into a bounded
//! playback buffer; the CPAL output callback drains it on the device clock.

pub mod buffer;
pub mod config;
pub mod decode;
pub mod demux;
pub mod device;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod playback;
pub mod resample;
pub mod session;
pub mod status;

pub use buffer::{Backpressure, BufferConsumer, BufferMonitor, BufferProducer, playback_buffer};
pub use config::PlaybackConfig;
pub use error::PipelineError;
pub use format::{OutputSpec, SampleFormat};
pub use pipeline::{FilePipeline, PipelineDriver, RunOutcome, RunSummary};
pub use session::{SessionEnd, SessionReport, play_file};
