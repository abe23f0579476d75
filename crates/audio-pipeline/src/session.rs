//! Player session: opens every stage for one file, plays it and tears it down.
//!
//! The controlling thread only waits on events (quit, producer finished, buffer
//! drained, status tick). Teardown always runs in the same order: raise the cancel
//! flag, join the producer thread, pause the stream, then drop the stages.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, never, select, tick};

use crate::buffer::playback_buffer;
use crate::config::PlaybackConfig;
use crate::demux::SymphoniaDemuxer;
use crate::device::{self, OutputRequest};
use crate::error::PipelineError;
use crate::format::calc_buffer_bytes;
use crate::pipeline::{FilePipeline, RunOutcome, RunSummary};
use crate::playback::{self, Pausable};
use crate::status::PlaybackStatus;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Every byte was decoded and played.
    Finished,
    /// Quit was requested.
    Quit,
}

/// What a finished session reports back.
#[derive(Clone, Copy, Debug)]
pub struct SessionReport {
    pub end: SessionEnd,
    pub summary: Option<RunSummary>,
    pub status: PlaybackStatus,
}

/// Play `path` on the output device matching `device_needle` (or the default one).
///
/// Blocks until playback drains or `quit` fires (or its sender is dropped). `cancel`
/// is the flag the producer polls; it is raised here on quit and may also be raised
/// from a signal handler.
pub fn play_file(
    path: &Path,
    device_needle: Option<&str>,
    cfg: &PlaybackConfig,
    cancel: Arc<AtomicBool>,
    quit: Receiver<()>,
) -> Result<SessionReport> {
    let demuxer = SymphoniaDemuxer::open(path)?;
    let source = demuxer.selection().frame_spec()?;
    let info = demuxer.source_info().clone();
    tracing::info!(
        path = %path.display(),
        codec = info.codec.as_deref().unwrap_or("unknown"),
        container = info.container.as_deref().unwrap_or("unknown"),
        bit_depth = ?info.bit_depth,
        duration_ms = ?info.duration_ms,
        frames_per_packet = ?info.frames_per_packet,
        rate_hz = source.sample_rate,
        channels = source.channels,
        track = demuxer.selection().track_id(),
        "source"
    );

    let host = cpal::default_host();
    let device = device::pick_device(&host, device_needle)?;
    let supported = device::pick_output_config(
        &device,
        OutputRequest {
            sample_rate: cfg.sample_rate.unwrap_or(source.sample_rate),
            channels: cfg.channels,
            sample_format: cfg.sample_format,
        },
    )?;
    let output = device::output_spec_for(&supported)?;
    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(buffer_size) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buffer_size;
    }
    tracing::info!(
        device = %device::device_name(&device),
        output = %output,
        buffer_size = ?stream_config.buffer_size,
        "output"
    );

    let requested = calc_buffer_bytes(&output, cfg.buffer_seconds);
    let callback = playback::callback_bytes(&stream_config, output.sample_format);
    let capacity = playback_capacity(requested, callback);
    if capacity != requested {
        tracing::info!(
            requested_bytes = requested,
            callback_bytes = callback,
            capacity_bytes = capacity,
            "buffer raised to hold two callbacks"
        );
    }
    let (producer, consumer, monitor) =
        playback_buffer(capacity, output.sample_format, cfg.backpressure);
    tracing::info!(
        capacity_bytes = capacity,
        backpressure = ?cfg.backpressure,
        "playback buffer"
    );

    let driver = FilePipeline::open(demuxer, output, cfg, producer, cancel.clone())?;
    if let Some(frames) = info.frames_per_packet {
        tracing::debug!(
            frames,
            block_bytes = driver.resampler().expected_block_bytes(frames as usize),
            "nominal block"
        );
    }
    if driver.resampler().is_resampling() {
        tracing::info!(
            from_hz = source.sample_rate,
            to_hz = output.sample_rate,
            "resampling"
        );
    } else {
        tracing::info!(rate_hz = output.sample_rate, "resample skipped");
    }

    let stream = playback::build_output_stream(
        &device,
        &stream_config,
        supported.sample_format(),
        consumer,
    )?;

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let mut producer = Some(driver.spawn(done_tx)?);
    let mut guard = Teardown {
        cancel: cancel.clone(),
        producer: &mut producer,
        stream: &stream,
    };
    stream.play()?;

    let ticker = tick(STATUS_INTERVAL);
    let idle = never();
    let mut summary: Option<RunSummary> = None;
    let end = loop {
        let done = if summary.is_none() { &done_rx } else { &idle };
        select! {
            recv(quit) -> _ => break SessionEnd::Quit,
            recv(done) -> _ => {
                let run = guard.join_producer()?;
                tracing::debug!(?run, "producer finished");
                summary = Some(run);
                if run.outcome == RunOutcome::Cancelled {
                    break SessionEnd::Quit;
                }
            }
            recv(monitor.drained()) -> _ => break SessionEnd::Finished,
            recv(ticker) -> _ => {
                tracing::debug!(status = %PlaybackStatus::capture(&monitor, &output), "playback");
            }
        }
    };

    if let Some(run) = guard.stop()? {
        summary = Some(run);
    }
    drop(guard);
    drop(stream);

    let status = PlaybackStatus::capture(&monitor, &output);
    tracing::info!(?end, %status, "playback ended");
    Ok(SessionReport {
        end,
        summary,
        status,
    })
}

/// Ring capacity for a session: the requested size, but never less than two device
/// callbacks. A ring smaller than one callback can never serve a full request.
fn playback_capacity(requested: usize, callback_bytes: usize) -> usize {
    requested.max(callback_bytes.saturating_mul(2))
}

/// Ordered stop of the producer thread and the output stream.
///
/// Runs on every exit path, including early returns from the event loop.
struct Teardown<'a, S: Pausable> {
    cancel: Arc<AtomicBool>,
    producer: &'a mut Option<JoinHandle<Result<RunSummary, PipelineError>>>,
    stream: &'a S,
}

impl<S: Pausable> Teardown<'_, S> {
    fn join_producer(&mut self) -> Result<RunSummary> {
        let Some(handle) = self.producer.take() else {
            return Err(anyhow!("pipeline thread already joined"));
        };
        let run = handle
            .join()
            .map_err(|_| anyhow!("pipeline thread panicked"))?;
        run.context("pipeline failed")
    }

    /// Cancel and join the producer (if still running), then pause the stream.
    fn stop(&mut self) -> Result<Option<RunSummary>> {
        self.cancel.store(true, Ordering::Relaxed);
        let run = if self.producer.is_some() {
            Some(self.join_producer()?)
        } else {
            None
        };
        if !self.stream.is_paused() {
            self.stream.pause(true)?;
        }
        Ok(run)
    }
}

impl<S: Pausable> Drop for Teardown<'_, S> {
    fn drop(&mut self) {
        if self.producer.is_none() && self.stream.is_paused() {
            return;
        }
        if let Err(e) = self.stop() {
            tracing::warn!("teardown: {e:#}");
        }
    }
}
