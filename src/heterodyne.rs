//! Complex-oscillator heterodyne mixer into a fixed low-pass biquad.
//!
//! Ported from `examples/original_source/backstage/src/heterodyne.c`: a
//! unit complex number is rotated every virtual sample by the carrier's
//! rotation delta, used to mix the input down to baseband, then filtered
//! through a 5kHz/bandwidth-1.0 low-pass; the oscillator magnitude is
//! periodically renormalised with the source's first-order correction
//! rather than a full `sqrt`.

use crate::biquad::Biquad;
use std::f32::consts::PI;

const LOW_PASS_FREQUENCY: f32 = 5_000.0;
const LOW_PASS_BANDWIDTH: f32 = 1.0;

pub struct Heterodyne {
    low_pass: Biquad,
    wave_x: f32,
    wave_y: f32,
    dx: f32,
    dy: f32,
}

impl Heterodyne {
    pub fn new(sample_rate: f32) -> Self {
        let mut low_pass = Biquad::new();
        low_pass.design_low_pass_filter(sample_rate, LOW_PASS_FREQUENCY, LOW_PASS_BANDWIDTH);
        Heterodyne {
            low_pass,
            wave_x: 1.0,
            wave_y: 0.0,
            dx: 1.0,
            dy: 0.0,
        }
    }

    pub fn update_frequencies(&mut self, sample_rate: f32, frequency: f32) {
        let theta = 2.0 * PI * frequency / sample_rate;
        self.dx = theta.cos();
        self.dy = theta.sin();
    }

    /// Rotates the oscillator by one virtual sample and mixes `input` down
    /// by multiplying by the oscillator's real part, then low-pass filters.
    pub fn next_output(&mut self, input: f32) -> f32 {
        let new_x = self.wave_x * self.dx - self.wave_y * self.dy;
        let new_y = self.wave_x * self.dy + self.wave_y * self.dx;
        self.wave_x = new_x;
        self.wave_y = new_y;
        let mixed = input * self.wave_x;
        self.low_pass.apply_filter(mixed)
    }

    /// First-order magnitude renormalisation: `c = 1 - (x^2+y^2-1)/2`.
    /// Called periodically (between playback callbacks) to stop the
    /// oscillator's magnitude drifting away from 1 under repeated rotation.
    pub fn normalise(&mut self) {
        let c = 1.0 - (self.wave_x * self.wave_x + self.wave_y * self.wave_y - 1.0) / 2.0;
        self.wave_x *= c;
        self.wave_y *= c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oscillator_magnitude_stays_near_unity_after_normalise() {
        let mut het = Heterodyne::new(48_000.0);
        het.update_frequencies(48_000.0, 1_000.0);
        for _ in 0..10_000 {
            het.next_output(0.0);
            het.normalise();
        }
        let mag_sq = het.wave_x * het.wave_x + het.wave_y * het.wave_y;
        assert!((mag_sq - 1.0).abs() < 1e-3);
    }

    #[test]
    fn heterodyne_shifts_tone_towards_difference_frequency() {
        // Input at 46kHz, carrier at 45kHz: difference is 1kHz, well within
        // the 5kHz low-pass, so energy should pass through mostly intact.
        let sample_rate = 192_000.0;
        let mut het = Heterodyne::new(sample_rate);
        het.update_frequencies(sample_rate, 45_000.0);
        let mut max_out = 0f32;
        for i in 0..20_000 {
            let t = i as f32 / sample_rate;
            let input = (2.0 * PI * 46_000.0 * t).sin();
            let out = het.next_output(input);
            if i > 10_000 {
                max_out = max_out.max(out.abs());
            }
        }
        assert!(max_out > 0.1);
    }
}
