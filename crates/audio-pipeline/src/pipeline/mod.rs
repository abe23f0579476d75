//! Pipeline driver: demux → decode → resample → playback buffer.
//!
//! Runs on the producer thread. Each iteration reads one packet, drops it if it belongs
//! to another stream, otherwise submits it and drains every frame the decoder has ready.
//! Each frame is converted and appended to the playback buffer. A bad packet or frame
//! is logged and skipped; a full buffer under [`Backpressure::Reject`] ends the run.
//!
//! [`Backpressure::Reject`]: crate::buffer::Backpressure::Reject

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use crossbeam_channel::Sender;

use crate::buffer::BufferProducer;
use crate::config::PlaybackConfig;
use crate::decode::{Decoded, Decoder, SymphoniaDecoder};
use crate::demux::{Demuxed, Demuxer, StreamSelection, SymphoniaDemuxer};
use crate::error::PipelineError;
use crate::format::OutputSpec;
use crate::resample::{FrameResampler, Resample, ResampleConfig};

/// Name of the producer thread.
pub const PIPELINE_THREAD_NAME: &str = "audio-pipeline";

/// Driver wired to the Symphonia and Rubato stages.
pub type FilePipeline = PipelineDriver<SymphoniaDemuxer, SymphoniaDecoder, FrameResampler>;

/// How a run ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunOutcome {
    /// The demuxer reported end of stream.
    #[default]
    Completed,
    /// The cancel flag was raised.
    Cancelled,
}

/// Counters for one run of the driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub packets: u64,
    pub skipped_packets: u64,
    pub decode_errors: u64,
    pub frames: u64,
    pub resample_errors: u64,
    pub bytes_written: u64,
    pub outcome: RunOutcome,
}

/// Owns the three stages and the producer half of the playback buffer.
pub struct PipelineDriver<D, C, R> {
    demuxer: D,
    decoder: C,
    resampler: R,
    selection: StreamSelection,
    producer: BufferProducer,
    cancel: Arc<AtomicBool>,
}

impl<D, C, R> PipelineDriver<D, C, R>
where
    D: Demuxer,
    C: Decoder,
    R: Resample,
{
    pub fn new(
        demuxer: D,
        decoder: C,
        resampler: R,
        selection: &StreamSelection,
        producer: BufferProducer,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            demuxer,
            decoder,
            resampler,
            selection: selection.clone(),
            producer: producer.with_cancel(cancel.clone()),
            cancel,
        }
    }

    pub fn resampler(&self) -> &R {
        &self.resampler
    }

    pub fn selection(&self) -> &StreamSelection {
        &self.selection
    }

    /// Run on a dedicated producer thread. `done` receives one message when the run
    /// ends, whatever the outcome; the result comes back through the join handle.
    pub fn spawn(
        self,
        done: Sender<()>,
    ) -> anyhow::Result<JoinHandle<Result<RunSummary, PipelineError>>>
    where
        D: 'static,
        C: 'static,
        R: 'static,
    {
        thread::Builder::new()
            .name(PIPELINE_THREAD_NAME.to_string())
            .spawn(move || {
                let result = self.run();
                let _ = done.send(());
                result
            })
            .context("spawn pipeline thread")
    }

    /// Run until end of stream, cancellation, or a fatal error.
    ///
    /// The playback buffer is closed on every exit path (the producer is dropped), so
    /// the consumer plays out whatever was appended.
    pub fn run(self) -> Result<RunSummary, PipelineError> {
        let Self {
            mut demuxer,
            mut decoder,
            mut resampler,
            selection,
            mut producer,
            cancel,
        } = self;
        let mut summary = RunSummary::default();

        'packets: loop {
            if cancel.load(Ordering::Relaxed) {
                summary.outcome = RunOutcome::Cancelled;
                break;
            }

            let packet = match demuxer.read_packet()? {
                Demuxed::Packet(p) => p,
                Demuxed::EndOfStream => break,
            };
            summary.packets += 1;

            if !selection.matches(&packet) {
                summary.skipped_packets += 1;
                continue;
            }

            if let Err(e) = decoder.submit(&packet) {
                tracing::warn!(ts = packet.ts(), "packet skipped: {e}");
                summary.decode_errors += 1;
                continue;
            }

            loop {
                let frame = match decoder.receive_frame() {
                    Ok(Decoded::Frame(frame)) => frame,
                    Ok(Decoded::NotReady) => break,
                    Err(e) => {
                        tracing::warn!(ts = packet.ts(), "frame skipped: {e}");
                        summary.decode_errors += 1;
                        break;
                    }
                };
                summary.frames += 1;

                let block = match resampler.convert(frame) {
                    Ok(block) => block,
                    Err(e) => {
                        tracing::warn!(ts = packet.ts(), "frame dropped: {e}");
                        summary.resample_errors += 1;
                        continue;
                    }
                };

                match producer.append(block) {
                    Ok(()) => summary.bytes_written += block.len() as u64,
                    Err(PipelineError::Cancelled) => {
                        summary.outcome = RunOutcome::Cancelled;
                        break 'packets;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if summary.outcome == RunOutcome::Completed {
            match resampler.flush() {
                Ok(tail) => match producer.append(tail) {
                    Ok(()) => summary.bytes_written += tail.len() as u64,
                    Err(PipelineError::Cancelled) => summary.outcome = RunOutcome::Cancelled,
                    Err(e) => return Err(e),
                },
                Err(e) => {
                    tracing::warn!("resampler tail dropped: {e}");
                    summary.resample_errors += 1;
                }
            }
        }
        producer.close();

        tracing::info!(
            packets = summary.packets,
            skipped = summary.skipped_packets,
            decode_errors = summary.decode_errors,
            frames = summary.frames,
            bytes = summary.bytes_written,
            outcome = ?summary.outcome,
            "pipeline finished"
        );
        Ok(summary)
    }
}

impl FilePipeline {
    /// Open the decoder and resampler for the demuxer's selected stream.
    ///
    /// Fails when the stream's format is unknown or a stage cannot be created.
    pub fn open(
        demuxer: SymphoniaDemuxer,
        output: OutputSpec,
        cfg: &PlaybackConfig,
        producer: BufferProducer,
        cancel: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let selection = demuxer.selection().clone();
        let input = selection.frame_spec()?;
        let decoder = SymphoniaDecoder::open(selection.codec_params())?;
        let resampler = FrameResampler::open(
            input,
            output,
            ResampleConfig {
                chunk_frames: cfg.chunk_frames,
            },
        )
        .context("create resampler")?;
        Ok(Self::new(
            demuxer, decoder, resampler, &selection, producer, cancel,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use symphonia::core::formats::Packet;

    use crate::buffer::{Backpressure, BufferConsumer, BufferMonitor, playback_buffer};
    use crate::decode::{Frame, FrameSpec};
    use crate::format::{OutputSpec, SampleFormat};
    use crate::resample::{FrameResampler, ResampleConfig};

    const AUDIO: u32 = 1;
    const VIDEO: u32 = 0;

    struct ScriptedDemuxer {
        steps: VecDeque<Result<Demuxed, PipelineError>>,
        reads: Arc<AtomicUsize>,
    }

    impl ScriptedDemuxer {
        fn new(packets: Vec<Packet>) -> Self {
            Self {
                steps: packets.into_iter().map(|p| Ok(Demuxed::Packet(p))).collect(),
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Demuxer for ScriptedDemuxer {
        fn read_packet(&mut self) -> Result<Demuxed, PipelineError> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.steps.pop_front().unwrap_or(Ok(Demuxed::EndOfStream))
        }
    }

    /// Emits `frames_per_packet` mono frames per packet, one sample per payload byte.
    /// Empty packets fail to submit.
    struct FakeDecoder {
        submits: Arc<AtomicUsize>,
        frames_per_packet: usize,
        queue: VecDeque<Frame>,
        current: Frame,
    }

    impl FakeDecoder {
        fn new(frames_per_packet: usize) -> Self {
            Self {
                submits: Arc::new(AtomicUsize::new(0)),
                frames_per_packet,
                queue: VecDeque::new(),
                current: Frame::default(),
            }
        }
    }

    impl Decoder for FakeDecoder {
        fn submit(&mut self, packet: &Packet) -> Result<(), PipelineError> {
            if packet.buf().is_empty() {
                return Err(PipelineError::Decode("empty packet".to_string()));
            }
            self.submits.fetch_add(1, Ordering::Relaxed);
            for _ in 0..self.frames_per_packet {
                self.queue
                    .push_back(Frame::new(mono(), vec![0.5; packet.buf().len()]));
            }
            Ok(())
        }

        fn receive_frame(&mut self) -> Result<Decoded<'_>, PipelineError> {
            match self.queue.pop_front() {
                Some(frame) => {
                    self.current = frame;
                    Ok(Decoded::Frame(&self.current))
                }
                None => Ok(Decoded::NotReady),
            }
        }
    }

    fn mono() -> FrameSpec {
        FrameSpec {
            sample_rate: 44_100,
            channels: 1,
        }
    }

    fn stereo_f32() -> OutputSpec {
        OutputSpec::new(44_100, 2, SampleFormat::F32)
    }

    fn packet(track: u32, len: usize) -> Packet {
        Packet::new_from_slice(track, 0, len as u64, &vec![7u8; len])
    }

    fn resampler() -> FrameResampler {
        FrameResampler::open(mono(), stereo_f32(), ResampleConfig { chunk_frames: 256 }).unwrap()
    }

    fn selection() -> StreamSelection {
        StreamSelection::new(AUDIO, symphonia::core::codecs::CodecParameters::new())
    }

    fn driver(
        packets: Vec<Packet>,
        decoder: FakeDecoder,
        capacity: usize,
        policy: Backpressure,
    ) -> (
        PipelineDriver<ScriptedDemuxer, FakeDecoder, FrameResampler>,
        BufferConsumer,
        BufferMonitor,
        Arc<AtomicBool>,
    ) {
        let (producer, consumer, monitor) = playback_buffer(capacity, SampleFormat::F32, policy);
        let cancel = Arc::new(AtomicBool::new(false));
        let driver = PipelineDriver::new(
            ScriptedDemuxer::new(packets),
            decoder,
            resampler(),
            &selection(),
            producer,
            cancel.clone(),
        );
        (driver, consumer, monitor, cancel)
    }

    #[test]
    fn foreign_stream_packets_never_reach_decoder_or_buffer() {
        let decoder = FakeDecoder::new(1);
        let submits = decoder.submits.clone();
        let packets = vec![packet(VIDEO, 100), packet(VIDEO, 50), packet(VIDEO, 10)];
        let (driver, _cons, monitor, _cancel) =
            driver(packets, decoder, 4096, Backpressure::Reject);

        let summary = driver.run().unwrap();

        assert_eq!(summary.packets, 3);
        assert_eq!(summary.skipped_packets, 3);
        assert_eq!(submits.load(Ordering::Relaxed), 0);
        assert_eq!(monitor.cursors().write, 0);
    }

    #[test]
    fn interleaved_streams_only_decode_selected_one() {
        let decoder = FakeDecoder::new(1);
        let submits = decoder.submits.clone();
        let packets = vec![
            packet(AUDIO, 10),
            packet(VIDEO, 999),
            packet(AUDIO, 20),
            packet(VIDEO, 999),
        ];
        let (driver, _cons, monitor, _cancel) =
            driver(packets, decoder, 4096, Backpressure::Reject);

        let summary = driver.run().unwrap();

        assert_eq!(submits.load(Ordering::Relaxed), 2);
        assert_eq!(summary.skipped_packets, 2);
        // 30 mono samples → 30 stereo f32 frames.
        assert_eq!(monitor.cursors().write, 30 * 8);
        assert_eq!(summary.bytes_written, 30 * 8);
        assert_eq!(summary.outcome, RunOutcome::Completed);
    }

    #[test]
    fn drains_every_frame_after_each_submission() {
        let packets = vec![packet(AUDIO, 4), packet(AUDIO, 4)];
        let (driver, _cons, monitor, _cancel) =
            driver(packets, FakeDecoder::new(3), 4096, Backpressure::Reject);

        let summary = driver.run().unwrap();

        assert_eq!(summary.frames, 6);
        assert_eq!(monitor.cursors().write, 6 * 4 * 8);
    }

    #[test]
    fn failed_submission_is_skipped() {
        let packets = vec![packet(AUDIO, 4), packet(AUDIO, 0), packet(AUDIO, 4)];
        let (driver, _cons, monitor, _cancel) =
            driver(packets, FakeDecoder::new(1), 4096, Backpressure::Reject);

        let summary = driver.run().unwrap();

        assert_eq!(summary.decode_errors, 1);
        assert_eq!(summary.frames, 2);
        assert_eq!(monitor.cursors().write, 2 * 4 * 8);
    }

    #[test]
    fn capacity_exceeded_is_fatal() {
        let packets = vec![packet(AUDIO, 8), packet(AUDIO, 8)];
        let (driver, _cons, monitor, _cancel) =
            driver(packets, FakeDecoder::new(1), 100, Backpressure::Reject);

        let err = driver.run().unwrap_err();

        assert!(matches!(
            err,
            PipelineError::CapacityExceeded {
                requested: 64,
                free: 36,
                capacity: 100
            }
        ));
        assert_eq!(monitor.cursors().write, 64);
        assert!(monitor.shared().is_closed());
    }

    #[test]
    fn cancel_before_start_reads_nothing() {
        let demuxer = ScriptedDemuxer::new(vec![packet(AUDIO, 4)]);
        let reads = demuxer.reads.clone();
        let (producer, _cons, monitor) =
            playback_buffer(4096, SampleFormat::F32, Backpressure::Block);
        let cancel = Arc::new(AtomicBool::new(true));
        let driver = PipelineDriver::new(
            demuxer,
            FakeDecoder::new(1),
            resampler(),
            &selection(),
            producer,
            cancel,
        );

        let summary = driver.run().unwrap();

        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(reads.load(Ordering::Relaxed), 0);
        assert_eq!(monitor.cursors().write, 0);
    }

    #[test]
    fn cancel_while_buffer_full_ends_run() {
        let packets = (0..8).map(|_| packet(AUDIO, 8)).collect();
        let (driver, _cons, monitor, cancel) =
            driver(packets, FakeDecoder::new(1), 128, Backpressure::Block);

        let handle = std::thread::spawn(move || driver.run());
        while monitor.cursors().write < 128 {
            std::thread::yield_now();
        }
        cancel.store(true, Ordering::Relaxed);

        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(monitor.cursors().write, 128);
    }

    #[test]
    fn spawned_run_signals_done() {
        let packets = vec![packet(AUDIO, 4)];
        let (driver, _cons, monitor, _cancel) =
            driver(packets, FakeDecoder::new(1), 4096, Backpressure::Block);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let handle = driver.spawn(done_tx).unwrap();
        assert_eq!(
            handle.thread().name(),
            Some(PIPELINE_THREAD_NAME)
        );
        done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.bytes_written, 32);
        assert!(monitor.shared().is_closed());
    }

    #[test]
    fn demux_error_ends_run() {
        let mut demuxer = ScriptedDemuxer::new(vec![packet(AUDIO, 4)]);
        demuxer
            .steps
            .push_back(Err(PipelineError::Demux("truncated".to_string())));
        let (producer, _cons, monitor) =
            playback_buffer(4096, SampleFormat::F32, Backpressure::Reject);
        let driver = PipelineDriver::new(
            demuxer,
            FakeDecoder::new(1),
            resampler(),
            &selection(),
            producer,
            Arc::new(AtomicBool::new(false)),
        );

        assert!(matches!(driver.run(), Err(PipelineError::Demux(_))));
        assert_eq!(monitor.cursors().write, 32);
        assert!(monitor.shared().is_closed());
    }
}
