//! Output stage (CPAL output stream).
//!
//! Builds the CPAL output stream whose real-time callback drains the playback buffer.
//! The buffer already holds little-endian samples in the device's own format, so the
//! callback only:
//! - pulls exactly one callback's worth of bytes without blocking
//! - reinterprets them as device samples
//!
//! Underruns come back from the buffer as silence; the callback never waits, never
//! allocates after warm-up and never logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::buffer::BufferConsumer;
use crate::format::SampleFormat;

/// A device sample type the playback buffer can carry.
trait PcmSample: cpal::SizedSample + Send + 'static {
    const FORMAT: SampleFormat;
    const SILENCE: Self;

    fn from_le(bytes: &[u8]) -> Self;
}

impl PcmSample for f32 {
    const FORMAT: SampleFormat = SampleFormat::F32;
    const SILENCE: Self = 0.0;

    fn from_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl PcmSample for i16 {
    const FORMAT: SampleFormat = SampleFormat::I16;
    const SILENCE: Self = 0;

    fn from_le(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }
}

/// Something a session can pause once the producer has stopped.
pub trait Pausable {
    fn pause(&self, paused: bool) -> Result<()>;
    fn is_paused(&self) -> bool;
}

/// A running output stream plus its pause flag.
///
/// Dropping it closes the device.
pub struct OutputStream {
    stream: cpal::Stream,
    paused: Arc<AtomicBool>,
}

impl OutputStream {
    /// Start or resume the device callback.
    pub fn play(&self) -> Result<()> {
        self.paused.store(false, Ordering::Relaxed);
        self.stream.play().context("start output stream")
    }

}

impl Pausable for OutputStream {
    /// Pause (`true`) or resume (`false`) output.
    ///
    /// While paused the callback outputs silence and does not drain the buffer.
    fn pause(&self, paused: bool) -> Result<()> {
        if !paused {
            return self.play();
        }
        self.paused.store(true, Ordering::Relaxed);
        self.stream.pause().context("pause output stream")
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }
}

/// Build a paused CPAL output stream that plays from `consumer`.
///
/// `sample_format` must match the buffer's format; the resampler produces that format,
/// so no conversion happens on the real-time thread.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    consumer: BufferConsumer,
) -> Result<OutputStream> {
    let wanted = SampleFormat::from_cpal(sample_format)
        .ok_or_else(|| anyhow!("Unsupported sample format: {sample_format:?}"))?;
    if wanted != consumer.format() {
        return Err(anyhow!(
            "device format {wanted} does not match buffer format {}",
            consumer.format()
        ));
    }

    let paused = Arc::new(AtomicBool::new(true));
    let stream = match wanted {
        SampleFormat::F32 => build_stream::<f32>(device, config, consumer, paused.clone()),
        SampleFormat::I16 => build_stream::<i16>(device, config, consumer, paused.clone()),
    }?;
    Ok(OutputStream { stream, paused })
}

fn build_stream<T: PcmSample>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: BufferConsumer,
    paused: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let bytes_per_sample = <T as PcmSample>::FORMAT.bytes_per_sample();
    let mut scratch = vec![0u8; callback_bytes(config, <T as PcmSample>::FORMAT)];

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                if paused.load(Ordering::Relaxed) {
                    data.fill(T::SILENCE);
                    return;
                }
                let len = data.len() * bytes_per_sample;
                if scratch.len() < len {
                    scratch.resize(len, 0);
                }
                let bytes = &mut scratch[..len];
                consumer.consume(bytes);
                decode_into(data, bytes, bytes_per_sample);
            },
            err_fn,
            None,
        )
        .context("build output stream")?;

    Ok(stream)
}

fn decode_into<T: PcmSample>(data: &mut [T], bytes: &[u8], bytes_per_sample: usize) {
    for (out, chunk) in data.iter_mut().zip(bytes.chunks_exact(bytes_per_sample)) {
        *out = T::from_le(chunk);
    }
}

/// Frames assumed per callback when the host picks the buffer size.
pub const DEFAULT_CALLBACK_FRAMES: usize = 4096;

/// Bytes one device callback asks for with this stream config.
pub fn callback_bytes(config: &cpal::StreamConfig, format: SampleFormat) -> usize {
    let frames = match config.buffer_size {
        cpal::BufferSize::Fixed(frames) => frames as usize,
        cpal::BufferSize::Default => DEFAULT_CALLBACK_FRAMES,
    };
    frames * config.channels as usize * format.bytes_per_sample()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::encode_samples;

    #[test]
    fn decode_f32_bytes() {
        let mut bytes = Vec::new();
        encode_samples(SampleFormat::F32, &[0.5, -0.25, 1.0], &mut bytes);
        let mut out = [0.0f32; 3];
        decode_into(&mut out, &bytes, 4);
        assert_eq!(out, [0.5, -0.25, 1.0]);
    }

    #[test]
    fn decode_i16_bytes() {
        let bytes = [0x01, 0x00, 0xFF, 0x7F, 0x00, 0x80];
        let mut out = [0i16; 3];
        decode_into(&mut out, &bytes, 2);
        assert_eq!(out, [1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn callback_bytes_follow_fixed_buffer() {
        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: 48_000,
            buffer_size: cpal::BufferSize::Fixed(512),
        };
        assert_eq!(callback_bytes(&config, SampleFormat::F32), 512 * 2 * 4);
        assert_eq!(callback_bytes(&config, SampleFormat::I16), 512 * 2 * 2);
    }

    #[test]
    fn callback_bytes_fall_back_for_default_buffer() {
        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: 44_100,
            buffer_size: cpal::BufferSize::Default,
        };
        assert_eq!(
            callback_bytes(&config, SampleFormat::F32),
            DEFAULT_CALLBACK_FRAMES * 2 * 4
        );
    }
}
