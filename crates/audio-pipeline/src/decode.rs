//! Decode stage.
//!
//! The driver submits packets of the selected stream and then polls for frames until
//! the decoder reports [`Decoded::NotReady`]. The Symphonia-backed decoder yields at
//! most one frame per packet; the contract allows any number.
//!
//! Frames carry the stream's native rate and channel layout. The codec's native
//! sample format is normalised to interleaved `f32` while the frame is filled.

use anyhow::{Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder as CodecDecoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use crate::error::PipelineError;

/// Native rate and channel count of decoded audio.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSpec {
    pub sample_rate: u32,
    pub channels: usize,
}

/// One decoded block of interleaved samples.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    spec: FrameSpec,
    samples: Vec<f32>,
}

impl Frame {
    pub fn new(spec: FrameSpec, samples: Vec<f32>) -> Self {
        Self { spec, samples }
    }

    pub fn spec(&self) -> FrameSpec {
        self.spec
    }

    /// Interleaved samples: `frame0[ch0], frame0[ch1], ..., frame1[ch0], ...`.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.spec.channels == 0 {
            return 0;
        }
        self.samples.len() / self.spec.channels
    }
}

/// Result of polling the decoder.
///
/// The frame is borrowed from the decoder and is gone once the next one is requested.
#[derive(Debug)]
pub enum Decoded<'a> {
    Frame(&'a Frame),
    NotReady,
}

/// Packet-in, frames-out decoder seen by the pipeline driver.
pub trait Decoder: Send {
    /// Hand one packet to the codec.
    fn submit(&mut self, packet: &Packet) -> Result<(), PipelineError>;

    /// Take the next decoded frame, if one is ready.
    fn receive_frame(&mut self) -> Result<Decoded<'_>, PipelineError>;
}

/// Symphonia-backed [`Decoder`].
pub struct SymphoniaDecoder {
    decoder: Box<dyn CodecDecoder>,
    frame: Frame,
    ready: bool,
}

impl SymphoniaDecoder {
    /// Create a decoder for the selected stream's codec parameters.
    pub fn open(params: &CodecParameters) -> Result<Self> {
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .context("create decoder")?;
        Ok(Self {
            decoder,
            frame: Frame::default(),
            ready: false,
        })
    }
}

impl Decoder for SymphoniaDecoder {
    fn submit(&mut self, packet: &Packet) -> Result<(), PipelineError> {
        if self.ready {
            return Err(PipelineError::Decode(
                "previous frame was not received".to_string(),
            ));
        }

        let decoded = match self.decoder.decode(packet) {
            Ok(d) => d,
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Err(PipelineError::Decode("decoder reset required".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let frames = decoded.frames();
        if frames == 0 {
            return Ok(());
        }

        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        self.frame.spec = FrameSpec {
            sample_rate: spec.rate,
            channels: spec.channels.count(),
        };
        self.frame.samples.clear();
        self.frame.samples.extend_from_slice(sample_buf.samples());
        self.ready = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Decoded<'_>, PipelineError> {
        if !self.ready {
            return Ok(Decoded::NotReady);
        }
        self.ready = false;
        Ok(Decoded::Frame(&self.frame))
    }
}
