//! Fixed output format shared by the resampler, the playback buffer and the device.
//!
//! Everything downstream of the resampler carries audio as little-endian bytes in
//! one [`OutputSpec`]. This module owns the byte encoding and the mixing rule used
//! by the playback consumer.

use std::fmt;

/// Sample encoding of the fixed output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// 32-bit IEEE float, little-endian.
    #[default]
    F32,
    /// Signed 16-bit integer, little-endian.
    I16,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::I16 => 2,
        }
    }

    /// Byte value used to fill silence.
    pub fn silence_byte(self) -> u8 {
        0
    }

    /// Map a CPAL sample format, if this crate can produce it.
    pub fn from_cpal(format: cpal::SampleFormat) -> Option<Self> {
        match format {
            cpal::SampleFormat::F32 => Some(SampleFormat::F32),
            cpal::SampleFormat::I16 => Some(SampleFormat::I16),
            _ => None,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::F32 => f.write_str("f32"),
            SampleFormat::I16 => f.write_str("i16"),
        }
    }
}

/// Output format every resampled block is produced in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: usize,
    pub sample_format: SampleFormat,
}

impl OutputSpec {
    pub fn new(sample_rate: u32, channels: usize, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// Bytes occupied by one interleaved frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels * self.sample_format.bytes_per_sample()
    }

    /// Bytes occupied by `frames` interleaved frames.
    pub fn bytes_for_frames(&self, frames: usize) -> usize {
        frames.saturating_mul(self.bytes_per_frame())
    }

    /// Playback time represented by `bytes` of output, in milliseconds.
    pub fn bytes_to_ms(&self, bytes: u64) -> u64 {
        let per_second = self.bytes_per_frame() as u64 * self.sample_rate as u64;
        if per_second == 0 {
            return 0;
        }
        bytes.saturating_mul(1000) / per_second
    }
}

impl fmt::Display for OutputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ch @ {} Hz ({})",
            self.channels, self.sample_rate, self.sample_format
        )
    }
}

/// Compute a playback buffer capacity in **bytes** for `seconds` of `spec` audio.
///
/// - If `seconds` is non-finite or `<= 0.0`, a safe fallback of two seconds is used.
/// - The result is always at least one frame.
pub fn calc_buffer_bytes(spec: &OutputSpec, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };

    let frames = (spec.sample_rate as f32 * secs).ceil() as usize;
    spec.bytes_for_frames(frames.max(1))
}

/// Append interleaved `f32` samples to `out`, encoded as `format`.
///
/// Float input is clamped to `[-1.0, 1.0]` before integer conversion.
pub fn encode_samples(format: SampleFormat, samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * format.bytes_per_sample());
    match format {
        SampleFormat::F32 => {
            for s in samples {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
        SampleFormat::I16 => {
            for s in samples {
                let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
}

/// Mix `src` onto `dst` at full volume.
///
/// Both slices hold `format` samples and must have the same length. Float samples
/// are summed and clamped to `[-1.0, 1.0]`; integer samples use saturating addition.
/// A trailing partial sample, if any, is copied as-is.
pub fn mix_into(format: SampleFormat, dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    let width = format.bytes_per_sample();
    let whole = dst.len().min(src.len()) / width * width;

    match format {
        SampleFormat::F32 => {
            for (d, s) in dst[..whole]
                .chunks_exact_mut(4)
                .zip(src[..whole].chunks_exact(4))
            {
                let a = f32::from_le_bytes([d[0], d[1], d[2], d[3]]);
                let b = f32::from_le_bytes([s[0], s[1], s[2], s[3]]);
                d.copy_from_slice(&(a + b).clamp(-1.0, 1.0).to_le_bytes());
            }
        }
        SampleFormat::I16 => {
            for (d, s) in dst[..whole]
                .chunks_exact_mut(2)
                .zip(src[..whole].chunks_exact(2))
            {
                let a = i16::from_le_bytes([d[0], d[1]]);
                let b = i16::from_le_bytes([s[0], s[1]]);
                d.copy_from_slice(&a.saturating_add(b).to_le_bytes());
            }
        }
    }

    let tail = dst.len().min(src.len());
    dst[whole..tail].copy_from_slice(&src[whole..tail]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_samples(SampleFormat::F32, samples, &mut out);
        out
    }

    #[test]
    fn bytes_per_frame_matches_format() {
        let spec = OutputSpec::new(44_100, 2, SampleFormat::F32);
        assert_eq!(spec.bytes_per_frame(), 8);
        let spec = OutputSpec::new(44_100, 2, SampleFormat::I16);
        assert_eq!(spec.bytes_per_frame(), 4);
    }

    #[test]
    fn calc_buffer_bytes_fallbacks() {
        let spec = OutputSpec::new(48_000, 2, SampleFormat::F32);
        assert_eq!(calc_buffer_bytes(&spec, 2.0), 768_000);
        assert_eq!(calc_buffer_bytes(&spec, -1.0), 768_000);
        assert_eq!(calc_buffer_bytes(&spec, f32::NAN), 768_000);
        assert_eq!(calc_buffer_bytes(&spec, f32::INFINITY), 768_000);
    }

    #[test]
    fn bytes_to_ms_uses_frame_rate() {
        let spec = OutputSpec::new(44_100, 2, SampleFormat::F32);
        assert_eq!(spec.bytes_to_ms(705_600), 2000);
        let empty = OutputSpec::new(0, 2, SampleFormat::F32);
        assert_eq!(empty.bytes_to_ms(100), 0);
    }

    #[test]
    fn encode_i16_clamps_and_scales() {
        let mut out = Vec::new();
        encode_samples(SampleFormat::I16, &[1.5, -1.5, 0.0], &mut out);
        assert_eq!(
            out,
            [i16::MAX.to_le_bytes(), (-i16::MAX).to_le_bytes(), [0, 0]].concat()
        );
    }

    #[test]
    fn mix_onto_silence_copies_f32() {
        let src = f32_bytes(&[0.25, -0.5]);
        let mut dst = vec![0u8; src.len()];
        mix_into(SampleFormat::F32, &mut dst, &src);
        assert_eq!(dst, src);
    }

    #[test]
    fn mix_clamps_f32_overflow() {
        let src = f32_bytes(&[0.75, -0.75]);
        let mut dst = f32_bytes(&[0.5, -0.5]);
        mix_into(SampleFormat::F32, &mut dst, &src);
        assert_eq!(dst, f32_bytes(&[1.0, -1.0]));
    }

    #[test]
    fn mix_saturates_i16() {
        let src = [30_000i16.to_le_bytes(), (-30_000i16).to_le_bytes()].concat();
        let mut dst = [10_000i16.to_le_bytes(), (-10_000i16).to_le_bytes()].concat();
        mix_into(SampleFormat::I16, &mut dst, &src);
        assert_eq!(dst, [i16::MAX.to_le_bytes(), i16::MIN.to_le_bytes()].concat());
    }
}
