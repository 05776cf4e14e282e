//! Lag-regulated linear-interpolation playback from the audio ring into a
//! fixed 48kHz device, optionally routed through Heterodyne.
//!
//! Grounded on `backstage.c`'s `playback_data_callback`; the `waiting`/lag
//! thresholds and the starvation burst-request are ported as named
//! constants rather than the source's scattered magic numbers.

use crate::heterodyne::Heterodyne;
use crate::ring::AudioRing;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub const MAX_RATE_HZ: u32 = 384_000;
pub const PLAYBACK_RATE_HZ: u32 = 48_000;
pub const DECIMATION: u32 = MAX_RATE_HZ / PLAYBACK_RATE_HZ; // 8

const LAG_MAX: f64 = 20.0;
const LAG_TARGET: f64 = 10.0;
pub(crate) const LAG_TARGET_MIN: f64 = 4.0;
const LAG_MINIMUM: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Off,
    Playthrough,
    Heterodyne,
}

pub struct PlaybackInterpolator {
    read_pos: f64,
    waiting: bool,
    mode: MonitorMode,
    heterodyne: Option<Heterodyne>,
    current_rate: u32,
    minimum_playback_buffer_lag: AtomicU64,
    playback_buffer_count: AtomicI64,
}

fn round_clamp_i16(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

impl PlaybackInterpolator {
    pub fn new(current_rate: u32) -> Self {
        PlaybackInterpolator {
            read_pos: 0.0,
            waiting: false,
            mode: MonitorMode::Off,
            heterodyne: None,
            current_rate,
            minimum_playback_buffer_lag: AtomicU64::new(f64::MAX.to_bits()),
            playback_buffer_count: AtomicI64::new(0),
        }
    }

    pub fn set_current_rate(&mut self, current_rate: u32) {
        self.current_rate = current_rate;
        if let Some(h) = &mut self.heterodyne {
            *h = Heterodyne::new(MAX_RATE_HZ as f32);
        }
    }

    pub fn set_monitor(&mut self, mode: MonitorMode, frequency_hz: Option<f32>) {
        self.mode = mode;
        match mode {
            MonitorMode::Heterodyne => {
                let mut h = Heterodyne::new(MAX_RATE_HZ as f32);
                if let Some(f) = frequency_hz {
                    h.update_frequencies(MAX_RATE_HZ as f32, f);
                }
                self.heterodyne = Some(h);
            }
            _ => self.heterodyne = None,
        }
    }

    pub fn reset_to_write_index(&mut self, write_index: usize) {
        self.read_pos = write_index as f64;
        self.waiting = false;
    }

    /// Fills `out` (length = `frame_count`, sampled at 48kHz) from
    /// `audio_ring`. Returns the burst factor requested of the
    /// simulation/capture driver this callback (0 if none).
    pub fn process(&mut self, audio_ring: &AudioRing, out: &mut [i16]) -> i64 {
        if self.mode == MonitorMode::Off {
            out.fill(0);
            return 0;
        }

        let cursor = audio_ring.cursor();
        let ring_len = audio_ring.len() as i64;
        let write_index = cursor.write_index as i64;
        let read_index = self.read_pos as i64;

        let sample_lag = ((ring_len + write_index - read_index) % ring_len).max(0);
        let buffer_lag = sample_lag as f64 * 100.0 / self.current_rate.max(1) as f64;

        if buffer_lag > LAG_MAX {
            self.read_pos = write_index as f64;
            self.waiting = true;
        }

        if self.waiting {
            if buffer_lag > LAG_TARGET {
                self.waiting = false;
            } else {
                out.fill(0);
                self.publish_lag(buffer_lag);
                return 0;
            }
        }

        let mut burst = 0i64;
        if buffer_lag < LAG_MINIMUM || sample_lag < out.len() as i64 {
            out.fill(0);
            burst = 2;
            self.playback_buffer_count.fetch_add(burst, Ordering::Relaxed);
            self.publish_lag(buffer_lag);
            return burst;
        }

        let step = self.current_rate as f64 / MAX_RATE_HZ as f64;

        for slot in out.iter_mut() {
            let mut acc = 0f32;
            for _ in 0..DECIMATION {
                let base = self.read_pos.floor() as i64;
                let frac = (self.read_pos - self.read_pos.floor()) as f32;
                let a = audio_ring.sample_at(base) as f32;
                let b = audio_ring.sample_at(base + 1) as f32;
                let mut v = a + frac * (b - a);
                if let Some(h) = &mut self.heterodyne {
                    v = h.next_output(v);
                }
                acc += v;
                self.read_pos += step;
            }
            *slot = round_clamp_i16(acc / DECIMATION as f32);
        }

        if let Some(h) = &mut self.heterodyne {
            h.normalise();
        }

        self.publish_lag(buffer_lag);
        0
    }

    fn publish_lag(&self, buffer_lag: f64) {
        let current = f64::from_bits(self.minimum_playback_buffer_lag.load(Ordering::Relaxed));
        let next = current.min(buffer_lag);
        self.minimum_playback_buffer_lag
            .store(next.to_bits(), Ordering::Relaxed);
    }

    pub fn minimum_playback_buffer_lag(&self) -> f64 {
        f64::from_bits(self.minimum_playback_buffer_lag.load(Ordering::Relaxed))
    }

    pub fn take_playback_buffer_count(&self) -> i64 {
        self.playback_buffer_count.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_mode_emits_silence() {
        let ring = AudioRing::new();
        let mut pb = PlaybackInterpolator::new(192_000);
        let mut out = vec![1i16; 16];
        pb.process(&ring, &mut out);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn starvation_requests_burst_production() {
        let ring = AudioRing::new();
        let mut pb = PlaybackInterpolator::new(192_000);
        pb.set_monitor(MonitorMode::Playthrough, None);
        // No samples written yet: sample_lag starts at 0 < frame_count.
        let mut out = vec![1i16; 16];
        let burst = pb.process(&ring, &mut out);
        assert_eq!(burst, 2);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn steady_state_interpolates_without_panicking() {
        let ring = AudioRing::new();
        let tone: Vec<i16> = (0..100_000)
            .map(|i| ((i % 20) as i16 - 10) * 1000)
            .collect();
        ring.write(&tone);
        let mut pb = PlaybackInterpolator::new(192_000);
        pb.set_monitor(MonitorMode::Playthrough, None);
        pb.reset_to_write_index(ring.cursor().write_index);
        // Rewind read position so there is lag to consume.
        pb.read_pos -= 50_000.0;
        let mut out = vec![0i16; 480];
        pb.process(&ring, &mut out);
    }
}
