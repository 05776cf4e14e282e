//! The `AudioDevice` contract and its `cpal`-backed implementation, plus
//! the device-name classification rules from SPEC_FULL.md §4.6.
//!
//! The trait lets the resampler/Supervisor logic stay testable without
//! real hardware; `CpalDevice` wraps `cpal::Stream` the same way
//! `rshigg-conch/src/audio.rs::AudioCapture` does (generic per-sample-format
//! stream construction, `unsafe impl Send` because `cpal::Stream` itself
//! isn't `Send` but is only ever touched from the thread that built it).

use crate::error::{BackstageError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

pub const VALID_RATES_HZ: [u32; 8] = [8_000, 16_000, 32_000, 48_000, 96_000, 192_000, 250_000, 384_000];

pub fn is_valid_rate(rate: u32) -> bool {
    VALID_RATES_HZ.contains(&rate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    CurrentAudioMoth,
    OldAudioMoth,
    Other,
}

/// Classifies a device name per SPEC_FULL.md §4.6.
pub fn classify_device_name(name: &str) -> DeviceClass {
    if name.contains("F32x USBXpress Device") {
        return DeviceClass::OldAudioMoth;
    }
    if name.contains("AudioMoth") {
        if name.contains(" kHz ") {
            return DeviceClass::CurrentAudioMoth;
        }
        return DeviceClass::OldAudioMoth;
    }
    DeviceClass::Other
}

/// Parses the decimal integer preceding the literal " kHz" in a
/// current-generation AudioMoth's device name, returning the native sample
/// rate in Hz (the parsed kHz value times 1000).
pub fn parse_native_rate_hz(name: &str) -> Option<u32> {
    let idx = name.find(" kHz")?;
    let prefix = &name[..idx];
    let digits_start = prefix
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let digits = &prefix[digits_start..];
    digits.parse::<u32>().ok().map(|khz| khz * 1000)
}

/// Lists the names of all currently-attached input devices, for the
/// background device-enumeration pump (SPEC_FULL.md §5).
pub fn enumerate_input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Abstracts a capture or playback device: open/start/stop plus a periodic
/// data callback. `AudioDevice` is deliberately minimal — the spec treats
/// the native audio I/O library as an external collaborator (SPEC_FULL.md
/// §1) modelled here only so CaptureResampler/PlaybackInterpolator stay
/// testable against a fake implementation.
pub trait AudioDevice: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn native_sample_rate(&self) -> u32;
    fn device_label(&self) -> String;
}

/// Real capture device backed by `cpal`, analogous to
/// `rshigg-conch::audio::AudioCapture`.
pub struct CpalCaptureDevice {
    stream: Option<cpal::Stream>,
    sample_rate: u32,
    label: String,
}

// cpal::Stream is not Send; this device is only ever constructed and driven
// from the single capture thread the Supervisor owns at a time, matching
// the stop-then-start discipline that guarantees exclusive access.
unsafe impl Send for CpalCaptureDevice {}

impl CpalCaptureDevice {
    /// Opens `device_name` if given (matched against `cpal`'s enumerated
    /// input device names, e.g. the AudioMoth detected by the background
    /// pump), else falls back to the host default input device.
    pub fn open<F>(device_name: Option<&str>, mut on_data: F) -> Result<Self>
    where
        F: FnMut(&[i16]) + Send + 'static,
    {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .ok()
                .and_then(|mut devices| devices.find(|d| d.name().map(|n| n == name).unwrap_or(false)))
                .ok_or_else(|| BackstageError::DeviceOpen(format!("device not found: {name}")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| BackstageError::DeviceOpen("no default input device".into()))?,
        };
        let label = device.name().unwrap_or_else(|_| "unknown".into());
        let config = device
            .default_input_config()
            .map_err(|e| BackstageError::DeviceOpen(e.to_string()))?;
        let sample_rate = config.sample_rate().0;
        let sample_format = config.sample_format();
        let stream_config: StreamConfig = config.into();

        let err_fn = |err| tracing::warn!(target: "backstage::device", %err, "capture stream error");

        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _| on_data(data),
                err_fn,
                None,
            ),
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    let converted: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    on_data(&converted);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(BackstageError::DeviceOpen(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| BackstageError::DeviceOpen(e.to_string()))?;

        Ok(CpalCaptureDevice {
            stream: Some(stream),
            sample_rate,
            label,
        })
    }
}

impl AudioDevice for CpalCaptureDevice {
    fn start(&mut self) -> Result<()> {
        match &self.stream {
            Some(s) => s
                .play()
                .map_err(|e| BackstageError::DeviceStart(e.to_string())),
            None => Err(BackstageError::DeviceStart("stream not open".into())),
        }
    }

    fn stop(&mut self) {
        if let Some(s) = &self.stream {
            let _ = s.pause();
        }
        self.stream = None;
    }

    fn native_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn device_label(&self) -> String {
        self.label.clone()
    }
}

/// Real playback device backed by `cpal`, pulling fixed-size 48kHz mono
/// frames from a `FnMut(&mut [i16])` producer supplied by
/// `PlaybackInterpolator::process`.
pub struct CpalPlaybackDevice {
    stream: Option<cpal::Stream>,
    sample_rate: u32,
    label: String,
}

unsafe impl Send for CpalPlaybackDevice {}

impl CpalPlaybackDevice {
    pub fn open<F>(mut fill: F) -> Result<Self>
    where
        F: FnMut(&mut [i16]) + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| BackstageError::DeviceOpen("no default output device".into()))?;
        let label = device.name().unwrap_or_else(|_| "unknown".into());
        let config = device
            .default_output_config()
            .map_err(|e| BackstageError::DeviceOpen(e.to_string()))?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();
        let stream_config: StreamConfig = config.into();

        let err_fn = |err| tracing::warn!(target: "backstage::device", %err, "playback stream error");

        let stream = match sample_format {
            SampleFormat::I16 => device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _| {
                    let frames = data.len() / channels.max(1);
                    let mut mono = vec![0i16; frames];
                    fill(&mut mono);
                    for (frame, &sample) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                        frame.fill(sample);
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    let frames = data.len() / channels.max(1);
                    let mut mono = vec![0i16; frames];
                    fill(&mut mono);
                    for (frame, &sample) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                        frame.fill(sample as f32 / i16::MAX as f32);
                    }
                },
                err_fn,
                None,
            ),
            other => {
                return Err(BackstageError::DeviceOpen(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| BackstageError::DeviceOpen(e.to_string()))?;

        Ok(CpalPlaybackDevice {
            stream: Some(stream),
            sample_rate,
            label,
        })
    }
}

impl AudioDevice for CpalPlaybackDevice {
    fn start(&mut self) -> Result<()> {
        match &self.stream {
            Some(s) => s
                .play()
                .map_err(|e| BackstageError::DeviceStart(e.to_string())),
            None => Err(BackstageError::DeviceStart("stream not open".into())),
        }
    }

    fn stop(&mut self) {
        if let Some(s) = &self.stream {
            let _ = s.pause();
        }
        self.stream = None;
    }

    fn native_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn device_label(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_current_audiomoth() {
        assert_eq!(
            classify_device_name("AudioMoth 384 kHz "),
            DeviceClass::CurrentAudioMoth
        );
    }

    #[test]
    fn classifies_old_audiomoth_variants() {
        assert_eq!(
            classify_device_name("F32x USBXpress Device"),
            DeviceClass::OldAudioMoth
        );
        assert_eq!(classify_device_name("AudioMoth"), DeviceClass::OldAudioMoth);
    }

    #[test]
    fn classifies_unrelated_device() {
        assert_eq!(classify_device_name("Built-in Microphone"), DeviceClass::Other);
    }

    #[test]
    fn parses_native_rate_from_name() {
        assert_eq!(parse_native_rate_hz("AudioMoth 384 kHz "), Some(384_000));
        assert_eq!(parse_native_rate_hz("AudioMoth 48 kHz "), Some(48_000));
        assert_eq!(parse_native_rate_hz("Built-in Microphone"), None);
    }

    #[test]
    fn valid_rates_match_spec_list() {
        for r in VALID_RATES_HZ {
            assert!(is_valid_rate(r));
        }
        assert!(!is_valid_rate(44_100));
    }
}
