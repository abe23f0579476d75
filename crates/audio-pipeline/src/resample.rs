//! Resample stage.
//!
//! Converts decoded frames from the stream's native rate and channel layout into the
//! fixed [`OutputSpec`], encoded as little-endian bytes ready for the playback buffer.
//!
//! Rate conversion uses Rubato's sinc resampler in fixed input chunks. Frames rarely
//! line up with chunk boundaries, so leftover input is carried from one call to the
//! next and the stage is stateful across the whole stream. Each call returns exactly
//! the bytes it produced, which may be none; [`Resample::flush`] pushes out the
//! carried tail and the filter's delay line at end of stream. The delay is dropped
//! from the front, so a stream of `n` input frames yields `ceil(n * ratio)` frames.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::decode::{Frame, FrameSpec};
use crate::error::PipelineError;
use crate::format::{OutputSpec, encode_samples};

/// Frame-to-bytes converter seen by the pipeline driver.
pub trait Resample: Send {
    /// Convert one frame. The returned bytes are valid until the next call.
    fn convert(&mut self, frame: &Frame) -> Result<&[u8], PipelineError>;

    /// Emit whatever input is still carried over. Called once at end of stream.
    fn flush(&mut self) -> Result<&[u8], PipelineError>;
}

/// Configuration for the resample stage.
#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    /// Input chunk size in frames used for the steady-state resampling loop.
    ///
    /// Larger values reduce per-call overhead at the cost of latency.
    pub chunk_frames: usize,
}

/// Rubato-backed [`Resample`] with channel mapping and output encoding.
pub struct FrameResampler {
    input: FrameSpec,
    output: OutputSpec,
    sinc: Option<SincStage>,
    mapped: Vec<f32>,
    out_bytes: Vec<u8>,
}

struct SincStage {
    resampler: Box<dyn Resampler<f32> + Send>,
    ratio: f64,
    chunk_frames: usize,
    channels: usize,
    delay_frames: usize,
    /// Leading output frames still to drop (the filter delay).
    skip_frames: usize,
    frames_in: u64,
    frames_out: u64,
    pending: Vec<f32>,
    out_interleaved: Vec<f32>,
}

impl FrameResampler {
    /// Configure the stage once for the selected stream and the device format.
    ///
    /// When the rates already match, no sinc resampler is created and frames only go
    /// through channel mapping and encoding.
    pub fn open(input: FrameSpec, output: OutputSpec, cfg: ResampleConfig) -> Result<Self> {
        if input.channels == 0 || input.sample_rate == 0 {
            return Err(anyhow!(
                "invalid input format: {}ch @ {} Hz",
                input.channels,
                input.sample_rate
            ));
        }
        if output.channels == 0 || output.sample_rate == 0 {
            return Err(anyhow!("invalid output format: {output}"));
        }

        let sinc = if input.sample_rate == output.sample_rate {
            None
        } else {
            Some(SincStage::new(
                input.sample_rate,
                output.sample_rate,
                output.channels,
                cfg.chunk_frames.max(1),
            )?)
        };

        Ok(Self {
            input,
            output,
            sinc,
            mapped: Vec::new(),
            out_bytes: Vec::new(),
        })
    }

    pub fn input_spec(&self) -> FrameSpec {
        self.input
    }

    pub fn output_spec(&self) -> OutputSpec {
        self.output
    }

    /// Whether a sample-rate conversion runs, as opposed to mapping and encoding only.
    pub fn is_resampling(&self) -> bool {
        self.sinc.is_some()
    }

    /// Nominal bytes produced for `frames` input frames, ignoring chunk carry-over.
    pub fn expected_block_bytes(&self, frames: usize) -> usize {
        let out_frames = (frames as u64 * self.output.sample_rate as u64)
            .div_ceil(self.input.sample_rate as u64);
        self.output.bytes_for_frames(out_frames as usize)
    }
}

impl Resample for FrameResampler {
    fn convert(&mut self, frame: &Frame) -> Result<&[u8], PipelineError> {
        let spec = frame.spec();
        if spec != self.input {
            return Err(PipelineError::Resample(format!(
                "frame format {}ch @ {} Hz does not match stream {}ch @ {} Hz",
                spec.channels, spec.sample_rate, self.input.channels, self.input.sample_rate
            )));
        }

        self.out_bytes.clear();
        self.mapped.clear();
        map_channels(
            frame.samples(),
            self.input.channels,
            self.output.channels,
            &mut self.mapped,
        );

        match &mut self.sinc {
            None => encode_samples(self.output.sample_format, &self.mapped, &mut self.out_bytes),
            Some(sinc) => {
                sinc.pending.extend_from_slice(&self.mapped);
                sinc.process_full_chunks(self.output, &mut self.out_bytes)?;
            }
        }
        Ok(self.out_bytes.as_slice())
    }

    fn flush(&mut self) -> Result<&[u8], PipelineError> {
        self.out_bytes.clear();
        if let Some(sinc) = &mut self.sinc {
            sinc.process_tail(self.output, &mut self.out_bytes)?;
        }
        Ok(self.out_bytes.as_slice())
    }
}

impl SincStage {
    fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init error: {e}"))?;

        let out_frames = resampler.output_frames_max().max(chunk_frames * 3);
        let delay_frames = resampler.output_delay();

        Ok(Self {
            resampler: Box::new(resampler),
            ratio: f_ratio,
            chunk_frames,
            channels,
            delay_frames,
            skip_frames: delay_frames,
            frames_in: 0,
            frames_out: 0,
            pending: Vec::new(),
            out_interleaved: vec![0.0f32; channels * out_frames],
        })
    }

    fn process_full_chunks(
        &mut self,
        output: OutputSpec,
        out_bytes: &mut Vec<u8>,
    ) -> Result<(), PipelineError> {
        let chunk_samples = self.chunk_frames * self.channels;
        let mut consumed = 0;

        while self.pending.len() - consumed >= chunk_samples {
            let produced = process_chunk(
                self.resampler.as_mut(),
                &self.pending[consumed..consumed + chunk_samples],
                self.channels,
                self.chunk_frames,
                None,
                &mut self.out_interleaved,
            )?;
            self.frames_in += self.chunk_frames as u64;
            self.emit(produced, None, output, out_bytes);
            consumed += chunk_samples;
        }

        self.pending.drain(..consumed);
        Ok(())
    }

    /// Push the carried input and the delay line out, stopping at exactly
    /// `ceil(frames_in * ratio)` output frames for the whole stream.
    fn process_tail(
        &mut self,
        output: OutputSpec,
        out_bytes: &mut Vec<u8>,
    ) -> Result<(), PipelineError> {
        let tail_frames = self.pending.len() / self.channels;
        self.frames_in += tail_frames as u64;
        let target = (self.frames_in as f64 * self.ratio).ceil() as u64;

        // The resampler always takes a whole chunk; only `tail_frames` of it are real.
        self.pending.truncate(tail_frames * self.channels);
        self.pending.resize(self.chunk_frames * self.channels, 0.0);
        let mut partial = (tail_frames > 0).then_some(tail_frames);

        // Each chunk yields roughly `chunk * ratio` frames, so this bounds the drain.
        let per_chunk = ((self.chunk_frames as f64 * self.ratio).floor() as usize).max(1);
        let max_rounds = self.delay_frames / per_chunk + 3;
        for _ in 0..max_rounds {
            if self.frames_out >= target {
                break;
            }
            let produced = process_chunk(
                self.resampler.as_mut(),
                &self.pending,
                self.channels,
                self.chunk_frames,
                partial,
                &mut self.out_interleaved,
            )?;
            self.emit(produced, Some(target), output, out_bytes);
            if partial.take().is_some() {
                self.pending.fill(0.0);
            }
        }

        self.pending.clear();
        Ok(())
    }

    /// Encode `produced` output samples, minus the leading delay and anything past
    /// `limit` frames.
    fn emit(
        &mut self,
        produced: usize,
        limit: Option<u64>,
        output: OutputSpec,
        out_bytes: &mut Vec<u8>,
    ) {
        let frames = produced / self.channels;
        let skip = self.skip_frames.min(frames);
        self.skip_frames -= skip;

        let mut take = (frames - skip) as u64;
        if let Some(limit) = limit {
            take = take.min(limit.saturating_sub(self.frames_out));
        }
        let start = skip * self.channels;
        let end = start + take as usize * self.channels;
        encode_samples(
            output.sample_format,
            &self.out_interleaved[start..end],
            out_bytes,
        );
        self.frames_out += take;
    }
}

/// Run one chunk through the resampler. Returns the number of output samples written.
fn process_chunk(
    resampler: &mut dyn Resampler<f32>,
    input: &[f32],
    channels: usize,
    frames: usize,
    partial_len: Option<usize>,
    out_interleaved: &mut [f32],
) -> Result<usize, PipelineError> {
    let input_adapter = InterleavedSlice::new(input, channels, frames)
        .map_err(|e| PipelineError::Resample(format!("interleaved slice (input): {e}")))?;

    let out_capacity_frames = out_interleaved.len() / channels;
    let mut output_adapter = InterleavedSlice::new_mut(out_interleaved, channels, out_capacity_frames)
        .map_err(|e| PipelineError::Resample(format!("interleaved slice (output): {e}")))?;

    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len,
    };

    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
        .map_err(|e| PipelineError::Resample(e.to_string()))?;

    Ok(nbr_out * channels)
}

/// Append `src` remapped from `src_channels` to `dst_channels` onto `out`.
///
/// Mapping rules:
/// - same layout: pass-through
/// - stereo → mono: average L/R
/// - mono → N: duplicate channel 0
/// - other layouts: best-effort "clamp to available channels"
pub fn map_channels(src: &[f32], src_channels: usize, dst_channels: usize, out: &mut Vec<f32>) {
    if src_channels == dst_channels {
        out.extend_from_slice(src);
        return;
    }
    if src_channels == 0 {
        return;
    }

    out.reserve(src.len() / src_channels * dst_channels);
    for frame in src.chunks_exact(src_channels) {
        for ch in 0..dst_channels {
            let sample = match (src_channels, dst_channels) {
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                _ => frame[ch.min(src_channels - 1)],
            };
            out.push(sample);
        }
    }
}
