//! Streaming capture-side resampler: linear up-sample to an integer
//! multiple of the selected current rate, then integer-ratio decimation by
//! averaging, writing both the audio ring and (every completed 512-sample
//! block) the STFT ring.
//!
//! Grounded on `backstage.c`'s capture callback / `captureAudioBuffer` path;
//! generalized from `rshigg-conch/src/audio.rs::resample`, which is a
//! one-shot whole-buffer resampler. This version is stateful across calls
//! (carries `p`/`prev`/`accumulator`/`counter`) so it can resample a live
//! stream delivered in arbitrarily-sized device callbacks, matching the
//! restart handshake in SPEC_FULL.md §4.1.

use crate::ring::{AudioRing, StftRing};
use crate::stft::Stft;

pub struct CaptureResampler {
    input_rate: u32,
    current_rate: u32,
    ratio_step: f64,
    decimation_factor: u32,
    p: f64,
    prev: f32,
    accumulator: f32,
    counter: u32,
}

fn round_clamp_i16(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

impl CaptureResampler {
    pub fn new(input_rate: u32, current_rate: u32) -> Self {
        let mut r = CaptureResampler {
            input_rate,
            current_rate,
            ratio_step: 1.0,
            decimation_factor: 1,
            p: 0.0,
            prev: 0.0,
            accumulator: 0.0,
            counter: 0,
        };
        r.reconfigure(input_rate, current_rate);
        r
    }

    pub fn reconfigure(&mut self, input_rate: u32, current_rate: u32) {
        self.input_rate = input_rate;
        self.current_rate = current_rate;
        let r = ((input_rate as f64) / (current_rate as f64)).ceil().max(1.0) as u32;
        self.decimation_factor = r;
        self.ratio_step = (input_rate as f64) / (r as f64 * current_rate as f64);
        self.reset();
    }

    /// Clears interpolator/decimator state for a new capture epoch. Called
    /// by the Supervisor as part of the restart handshake (SPEC_FULL.md
    /// §4.1): "resets p, prev, curr, accumulator, counter to zero".
    pub fn reset(&mut self) {
        self.p = 0.0;
        self.prev = 0.0;
        self.accumulator = 0.0;
        self.counter = 0;
    }

    /// Feeds `frame` (int16 samples at `self.input_rate`) through the
    /// resampler, appending the decimated output to `audio_ring` and
    /// emitting any completed 512-sample STFT blocks into `stft_ring`.
    /// Returns the number of samples appended to the audio ring.
    pub fn process(
        &mut self,
        frame: &[i16],
        audio_ring: &AudioRing,
        stft_ring: &StftRing,
        stft: &mut Stft,
    ) -> usize {
        let ring_len = audio_ring.len() as i64;
        let mut emitted = 0usize;

        for &sample in frame {
            let curr = sample as f32;

            loop {
                let interpolated = self.prev + (self.p as f32) * (curr - self.prev);
                self.accumulator += interpolated;
                self.counter += 1;
                if self.counter == self.decimation_factor {
                    let out = round_clamp_i16(self.accumulator / self.decimation_factor as f32);
                    audio_ring.write(&[out]);
                    emitted += 1;

                    let i = ((audio_ring.cursor().write_index as i64 + ring_len - 1) % ring_len) as i64;
                    if i.rem_euclid(512) == 511 {
                        let start = i - 511;
                        let window = audio_ring.copy_out(start, 512);
                        let bins = stft.transform(&window, 0);
                        let block_offset = (start.rem_euclid(ring_len) as usize) / 2;
                        stft_ring.write_block(block_offset, &bins);
                    }

                    self.accumulator = 0.0;
                    self.counter = 0;
                }

                self.p += self.ratio_step;
                if self.p >= 1.0 {
                    self.p -= 1.0;
                    break;
                }
            }

            self.prev = curr;
        }

        emitted
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn current_rate(&self) -> u32 {
        self.current_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{AudioRing, StftRing};

    #[test]
    fn exact_ratio_emits_expected_sample_count() {
        // 384000 -> 8000 is an exact x48 decimation: 3840 input samples
        // should yield exactly 80 output samples (property #2, SPEC_FULL §8).
        let ring = AudioRing::new();
        let stft_ring = StftRing::new();
        let mut stft = Stft::new();
        let mut resampler = CaptureResampler::new(384_000, 8_000);

        let input: Vec<i16> = (0..3840).map(|i| ((i % 100) * 10) as i16).collect();
        let emitted = resampler.process(&input, &ring, &stft_ring, &mut stft);
        assert_eq!(emitted, 80);
        assert_eq!(ring.cursor().sample_count, 80);
    }

    #[test]
    fn downrate_matches_floor_formula_within_rounding_slack() {
        let ring = AudioRing::new();
        let stft_ring = StftRing::new();
        let mut stft = Stft::new();
        let mut resampler = CaptureResampler::new(48_000, 48_000);

        let input = vec![100i16; 480];
        let emitted = resampler.process(&input, &ring, &stft_ring, &mut stft);
        let expected = (480u64 * 48_000 / 48_000) as i64;
        assert!((emitted as i64 - expected).abs() <= 1);
    }

    #[test]
    fn emits_one_stft_block_per_512_samples() {
        let ring = AudioRing::new();
        let stft_ring = StftRing::new();
        let mut stft = Stft::new();
        let mut resampler = CaptureResampler::new(48_000, 48_000);

        // 48000 samples at unity rate -> 48000 output samples -> 93 blocks.
        let input: Vec<i16> = (0..48_000).map(|i| ((i % 2000) - 1000) as i16).collect();
        let emitted = resampler.process(&input, &ring, &stft_ring, &mut stft);
        assert_eq!(emitted as i64, 48_000);
        let expected_blocks = emitted / 512;
        assert!(expected_blocks >= 92);
    }

    #[test]
    fn reset_clears_interpolator_state() {
        let mut resampler = CaptureResampler::new(96_000, 48_000);
        resampler.p = 0.75;
        resampler.counter = 1;
        resampler.accumulator = 42.0;
        resampler.reset();
        assert_eq!(resampler.p, 0.0);
        assert_eq!(resampler.counter, 0);
        assert_eq!(resampler.accumulator, 0.0);
    }
}
