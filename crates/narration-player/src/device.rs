//! Output device discovery and selection.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Fixed callback buffer requested from the device, clamped to its range.
///
/// Chunk handoff and control latency are bounded by a couple of callback periods.
const PREFERRED_BUFFER_FRAMES: u32 = 512;

/// Pick the first output device whose name contains `needle` (case-insensitive),
/// or the host default device when `needle` is `None` or blank.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle.map(str::trim).filter(|n| !n.is_empty()) {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .map(|desc| matches_device_name(&desc.to_string(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config for `target_rate`.
///
/// Prefers a range containing the target exactly, then the highest rate below
/// it, then the lowest rate above it. Ties are broken by sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in device.supported_output_configs()? {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate::new(rate, target_rate, range.sample_format());
        let replace = best
            .as_ref()
            .map(|(current, _)| candidate.is_better_than(current))
            .unwrap_or(true);
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Prefer a small fixed buffer size if the device advertises a range.
///
/// Returns `None` when the device only supports its default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_buffer_frames(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of the available output devices, in host order.
pub fn device_names(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut names = Vec::new();
    for d in devices {
        names.push(d.description()?.to_string());
    }
    Ok(names)
}

/// Print available output devices to stdout (`--list-devices`).
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    for (i, name) in device_names(host)?.iter().enumerate() {
        println!("#{i}: {name}");
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Candidate {
    exact: bool,
    below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn new(rate: u32, target_rate: Option<u32>, format: cpal::SampleFormat) -> Self {
        Self {
            exact: target_rate == Some(rate),
            below: target_rate.map(|t| rate <= t).unwrap_or(true),
            rate,
            format_rank: sample_format_rank(format),
        }
    }

    fn is_better_than(&self, other: &Candidate) -> bool {
        if self.exact != other.exact {
            return self.exact;
        }
        if self.below != other.below {
            return self.below;
        }
        if self.rate != other.rate {
            // Below the target, closer means higher; above it, closer means lower.
            return if self.below {
                self.rate > other.rate
            } else {
                self.rate < other.rate
            };
        }
        self.format_rank < other.format_rank
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn clamp_buffer_frames(min: u32, max: u32) -> u32 {
    PREFERRED_BUFFER_FRAMES.clamp(min, max.max(min))
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::SampleFormat;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn rate_for_range_clamps_target() {
        assert_eq!(pick_rate_for_range(8_000, 48_000, Some(24_000)), 24_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(24_000)), 44_100);
        assert_eq!(pick_rate_for_range(8_000, 16_000, Some(24_000)), 16_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn exact_rate_wins() {
        let exact = Candidate::new(24_000, Some(24_000), SampleFormat::I16);
        let below = Candidate::new(22_050, Some(24_000), SampleFormat::F32);
        assert!(exact.is_better_than(&below));
        assert!(!below.is_better_than(&exact));
    }

    #[test]
    fn below_target_beats_above() {
        let below = Candidate::new(16_000, Some(24_000), SampleFormat::F32);
        let above = Candidate::new(48_000, Some(24_000), SampleFormat::F32);
        assert!(below.is_better_than(&above));
    }

    #[test]
    fn above_target_prefers_closest() {
        let near = Candidate::new(44_100, Some(24_000), SampleFormat::F32);
        let far = Candidate::new(96_000, Some(24_000), SampleFormat::F32);
        assert!(near.is_better_than(&far));
    }

    #[test]
    fn format_breaks_ties() {
        let f32 = Candidate::new(48_000, None, SampleFormat::F32);
        let i16 = Candidate::new(48_000, None, SampleFormat::I16);
        assert!(f32.is_better_than(&i16));
    }

    #[test]
    fn buffer_frames_prefer_small_period() {
        assert_eq!(clamp_buffer_frames(64, 16_384), 512);
        assert_eq!(clamp_buffer_frames(64, 256), 256);
        assert_eq!(clamp_buffer_frames(1024, 4096), 1024);
        assert_eq!(clamp_buffer_frames(2048, 1024), 2048);
    }
}
