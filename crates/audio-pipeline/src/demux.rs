//! Demux stage.
//!
//! Uses Symphonia to:
//! - probe the input container
//! - pick the audio stream once, at open time
//! - yield stream-tagged packets until end of stream

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, Track};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::decode::FrameSpec;
use crate::error::PipelineError;

/// One step of the demuxer.
pub enum Demuxed {
    Packet(Packet),
    EndOfStream,
}

/// Container reader seen by the pipeline driver.
pub trait Demuxer: Send {
    /// Read the next packet of any stream.
    fn read_packet(&mut self) -> Result<Demuxed, PipelineError>;
}

/// The audio stream chosen at startup. Never re-evaluated.
#[derive(Clone, Debug)]
pub struct StreamSelection {
    track_id: u32,
    codec_params: CodecParameters,
}

impl StreamSelection {
    pub fn new(track_id: u32, codec_params: CodecParameters) -> Self {
        Self {
            track_id,
            codec_params,
        }
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn codec_params(&self) -> &CodecParameters {
        &self.codec_params
    }

    /// Whether `packet` belongs to the selected stream.
    pub fn matches(&self, packet: &Packet) -> bool {
        packet.track_id() == self.track_id
    }

    /// Native rate and channel count of the selected stream.
    pub fn frame_spec(&self) -> Result<FrameSpec> {
        let channels = self
            .codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let sample_rate = self
            .codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        Ok(FrameSpec {
            sample_rate,
            channels,
        })
    }
}

/// Pick the audio stream to play.
///
/// Prefers the container's default track when it is a decodable audio track, otherwise
/// the first track with a known codec and sample rate.
pub fn select_audio_stream(tracks: &[Track], default: Option<&Track>) -> Option<StreamSelection> {
    let is_audio = |t: &Track| {
        t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some()
    };

    default
        .filter(|t| is_audio(*t))
        .or_else(|| tracks.iter().find(|t| is_audio(*t)))
        .map(|t| StreamSelection::new(t.id, t.codec_params.clone()))
}

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    /// Container/extension hint (best-effort).
    pub container: Option<String>,
    /// Total duration in milliseconds when the container reports it.
    pub duration_ms: Option<u64>,
    /// Nominal frames per packet, when fixed by the codec.
    pub frames_per_packet: Option<u64>,
}

impl SourceInfo {
    fn from_params(params: &CodecParameters, container: Option<String>) -> Self {
        Self {
            codec: codec_name_from_params(params),
            bit_depth: params
                .bits_per_sample
                .or(params.bits_per_coded_sample)
                .and_then(|v| u16::try_from(v).ok()),
            container,
            duration_ms: duration_ms_from_codec_params(params),
            frames_per_packet: params.max_frames_per_packet,
        }
    }
}

/// Symphonia-backed [`Demuxer`].
pub struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    selection: StreamSelection,
    info: SourceInfo,
}

impl SymphoniaDemuxer {
    /// Open and probe a local file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;

        let mut hint = Hint::new();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string);
        if let Some(ext) = &ext {
            hint.with_extension(ext);
        }

        Self::open_source(Box::new(file), hint, ext)
    }

    /// Probe an arbitrary Symphonia [`MediaSource`].
    pub fn open_source(
        source: Box<dyn MediaSource>,
        hint: Hint,
        container: Option<String>,
    ) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("probe container")?;

        let format = probed.format;
        let selection = select_audio_stream(format.tracks(), format.default_track())
            .ok_or_else(|| anyhow!("Cannot find audio stream"))?;
        let info = SourceInfo::from_params(selection.codec_params(), container);

        Ok(Self {
            format,
            selection,
            info,
        })
    }

    pub fn selection(&self) -> &StreamSelection {
        &self.selection
    }

    pub fn source_info(&self) -> &SourceInfo {
        &self.info
    }

    pub fn tracks(&self) -> &[Track] {
        self.format.tracks()
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn read_packet(&mut self) -> Result<Demuxed, PipelineError> {
        match self.format.next_packet() {
            Ok(packet) => Ok(Demuxed::Packet(packet)),
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                Ok(Demuxed::EndOfStream)
            }
            // Chained streams would need a new decoder; playback stops at the boundary.
            Err(SymphoniaError::ResetRequired) => Ok(Demuxed::EndOfStream),
            Err(e) => Err(PipelineError::Demux(e.to_string())),
        }
    }
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label used for the startup log line.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
