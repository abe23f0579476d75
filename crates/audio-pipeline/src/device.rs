//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config the pipeline can feed (`f32` or `i16` only)

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::format::{OutputSpec, SampleFormat};

/// Pick the first output device whose name contains `needle` (case-insensitive), or
/// the host default device.
///
/// Returns an error if no matching device exists or if the host reports no output devices.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Best-effort display name for logging.
pub fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

/// What the pipeline would like the device to run at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputRequest {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

/// Pick the supported output config closest to `want`.
///
/// Only `f32` and `i16` configs are considered. Among those, a config with the
/// requested channel count wins, then one that can run at exactly the requested rate,
/// then the closest rate at or below it, then the requested sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    want: OutputRequest,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .context("query output configs")?
        .collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        let Some(format) = SampleFormat::from_cpal(range.sample_format()) else {
            continue;
        };
        let rate = pick_rate_for_range(
            range.min_sample_rate(),
            range.max_sample_rate(),
            want.sample_rate,
        );
        let candidate = Candidate {
            channels_match: range.channels() == want.channels,
            rate_match: rate == want.sample_rate,
            below: rate <= want.sample_rate,
            rate,
            format_match: format == want.sample_format,
        };
        let replace = match &best {
            None => true,
            Some((b, _)) => candidate.is_better_than(b),
        };
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("Device offers no f32 or i16 output config"))
}

/// Resolve the fixed output format from the chosen device config.
pub fn output_spec_for(config: &cpal::SupportedStreamConfig) -> Result<OutputSpec> {
    let format = SampleFormat::from_cpal(config.sample_format())
        .ok_or_else(|| anyhow!("Unsupported sample format: {:?}", config.sample_format()))?;
    Ok(OutputSpec::new(
        config.sample_rate(),
        config.channels() as usize,
        format,
    ))
}

/// Pick a stream buffer size, preferring larger values to reduce underruns.
///
/// Returns `None` when the device only supports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_buffer_frames(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout.
///
/// This is intended for CLI UX (`--list-devices`) rather than structured output.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let default_name = host.default_output_device().map(|d| device_name(&d));
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        let name = device_name(&d);
        let marker = if default_name.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        match d.default_output_config() {
            Ok(cfg) => println!(
                "#{i}: {name}{marker} [{} Hz, {}ch, {:?}]",
                cfg.sample_rate(),
                cfg.channels(),
                cfg.sample_format()
            ),
            Err(_) => println!("#{i}: {name}{marker}"),
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Candidate {
    channels_match: bool,
    rate_match: bool,
    below: bool,
    rate: u32,
    format_match: bool,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate) -> bool {
        if self.channels_match != other.channels_match {
            self.channels_match
        } else if self.rate_match != other.rate_match {
            self.rate_match
        } else if self.below != other.below {
            self.below
        } else if self.rate != other.rate {
            // Below the target: closer is higher. Above it: closer is lower.
            if self.below {
                self.rate > other.rate
            } else {
                self.rate < other.rate
            }
        } else {
            self.format_match && !other.format_match
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn clamp_buffer_frames(min: u32, max: u32) -> u32 {
    const MAX_FRAMES: u32 = 16_384;
    if max > MAX_FRAMES {
        if min > MAX_FRAMES { min } else { MAX_FRAMES }
    } else {
        max
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
