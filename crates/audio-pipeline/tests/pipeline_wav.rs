//! End-to-end runs of the real Symphonia/Rubato stages through the driver, without a
//! device. The output callback is played by the test thread.

use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use audio_pipeline::buffer::{Consumed, playback_buffer};
use audio_pipeline::demux::SymphoniaDemuxer;
use audio_pipeline::{
    Backpressure, FilePipeline, OutputSpec, PipelineError, PlaybackConfig, RunOutcome,
    SampleFormat,
};
use hound::{WavSpec, WavWriter};
use tempfile::TempDir;

fn write_sine_wav(dir: &Path, name: &str, rate: u32, channels: u16, seconds: f32) -> PathBuf {
    let path = dir.join(name);
    let spec = WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).unwrap();
    let frames = (rate as f32 * seconds) as u32;
    for i in 0..frames {
        let t = i as f32 / rate as f32;
        let sample = ((2.0 * PI * 440.0 * t).sin() * 0.5 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

fn open_pipeline(
    path: &Path,
    output: OutputSpec,
    capacity: usize,
    policy: Backpressure,
) -> (
    FilePipeline,
    audio_pipeline::BufferConsumer,
    audio_pipeline::BufferMonitor,
) {
    let demuxer = SymphoniaDemuxer::open(path).unwrap();
    let (producer, consumer, monitor) = playback_buffer(capacity, output.sample_format, policy);
    let driver = FilePipeline::open(
        demuxer,
        output,
        &PlaybackConfig::default(),
        producer,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();
    (driver, consumer, monitor)
}

#[test]
fn mono_44k_to_stereo_f32_fills_expected_bytes() {
    let dir = TempDir::new().unwrap();
    let path = write_sine_wav(dir.path(), "mono.wav", 44_100, 1, 2.0);
    let output = OutputSpec::new(44_100, 2, SampleFormat::F32);

    let (driver, _cons, monitor) = open_pipeline(&path, output, 1 << 20, Backpressure::Reject);
    assert!(!driver.resampler().is_resampling());

    let summary = driver.run().unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.skipped_packets, 0);
    assert_eq!(summary.bytes_written, 705_600);
    assert_eq!(monitor.cursors().write, 705_600);
    assert!(monitor.shared().is_closed());
}

#[test]
fn resampled_output_length_tracks_rate_ratio() {
    let dir = TempDir::new().unwrap();
    let path = write_sine_wav(dir.path(), "mono48.wav", 48_000, 1, 2.0);
    let output = OutputSpec::new(44_100, 2, SampleFormat::F32);

    let (driver, _cons, monitor) = open_pipeline(&path, output, 1 << 20, Backpressure::Reject);
    assert!(driver.resampler().is_resampling());

    let summary = driver.run().unwrap();

    // 96000 frames at 44100/48000 is exactly 88200 stereo f32 frames.
    assert_eq!(summary.bytes_written, 705_600);
    assert_eq!(monitor.cursors().write, 705_600);
}

#[test]
fn stereo_to_i16_output() {
    let dir = TempDir::new().unwrap();
    let path = write_sine_wav(dir.path(), "stereo.wav", 44_100, 2, 1.0);
    let output = OutputSpec::new(44_100, 2, SampleFormat::I16);

    let (driver, _cons, monitor) = open_pipeline(&path, output, 1 << 20, Backpressure::Reject);
    driver.run().unwrap();

    assert_eq!(monitor.cursors().write, 44_100 * 4);
}

#[test]
fn callback_before_any_data_gets_silence() {
    let dir = TempDir::new().unwrap();
    let path = write_sine_wav(dir.path(), "mono.wav", 44_100, 1, 0.5);
    let output = OutputSpec::new(44_100, 2, SampleFormat::F32);

    let (_driver, mut consumer, monitor) =
        open_pipeline(&path, output, 1 << 16, Backpressure::Block);

    let mut out = vec![0xABu8; output.bytes_for_frames(512)];
    assert_eq!(consumer.consume(&mut out), Consumed::Underrun);
    assert_eq!(out.len(), 512 * 8);
    assert!(out.iter().all(|b| *b == 0));
    assert_eq!(monitor.cursors().read, 0);
}

#[test]
fn small_buffer_streams_whole_file_with_backpressure() {
    let dir = TempDir::new().unwrap();
    let path = write_sine_wav(dir.path(), "mono.wav", 44_100, 1, 2.0);
    let output = OutputSpec::new(44_100, 2, SampleFormat::F32);

    // A tenth of a second of buffer for two seconds of audio.
    let capacity = output.bytes_for_frames(4410);
    let (driver, mut consumer, monitor) =
        open_pipeline(&path, output, capacity, Backpressure::Block);
    let (done_tx, _done_rx) = crossbeam_channel::bounded(1);
    let handle = driver.spawn(done_tx).unwrap();

    let mut played = 0u64;
    let mut out = vec![0u8; output.bytes_for_frames(441)];
    loop {
        match consumer.consume(&mut out) {
            Consumed::Full => played += out.len() as u64,
            Consumed::Tail(n) => {
                played += n as u64;
                break;
            }
            Consumed::Underrun => thread::sleep(Duration::from_millis(1)),
        }
        let c = monitor.cursors();
        assert!(c.read <= c.write);
        assert!(c.available() <= capacity as u64);
    }

    let summary = handle.join().unwrap().unwrap();
    assert_eq!(played, 705_600);
    assert_eq!(summary.bytes_written, 705_600);
    assert!(monitor.drained().try_recv().is_ok());
}

#[test]
fn reject_policy_reports_capacity_exceeded() {
    let dir = TempDir::new().unwrap();
    let path = write_sine_wav(dir.path(), "mono.wav", 44_100, 1, 2.0);
    let output = OutputSpec::new(44_100, 2, SampleFormat::F32);

    let capacity = output.bytes_for_frames(44_100);
    let (driver, _cons, monitor) = open_pipeline(&path, output, capacity, Backpressure::Reject);

    match driver.run() {
        Err(PipelineError::CapacityExceeded {
            requested,
            free,
            capacity: cap,
        }) => {
            assert_eq!(cap, capacity);
            assert!(requested > free);
        }
        other => panic!("expected capacity error, got {other:?}"),
    }
    assert!(monitor.cursors().write <= capacity as u64);
}

#[test]
fn non_media_file_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"definitely not audio").unwrap();
    assert!(SymphoniaDemuxer::open(&path).is_err());
}

#[test]
fn missing_file_fails_to_open() {
    let dir = TempDir::new().unwrap();
    assert!(SymphoniaDemuxer::open(&dir.path().join("missing.wav")).is_err());
}
