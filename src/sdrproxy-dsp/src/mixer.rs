use std::f64::consts::TAU;

use num_complex::Complex;

/// Numerically-controlled oscillator down-converter.
///
/// Keeps phase as a running accumulator taken modulo `2π` after every
/// sample so long captures (hundreds of millions of samples) never lose
/// precision the way an absolute `k`-indexed phase would.
pub struct Mixer {
    phase: f64,
    phase_inc: f64,
}

impl Mixer {
    pub fn new(mix_hz: f64, samp_hz: f64) -> Self {
        // A frequency offset and that offset plus `samp_hz` produce the same
        // per-sample phase increment modulo 2π, so a negative `mix_hz` needs
        // no special case: the increment below wraps correctly either way.
        let phase_inc = (-TAU * mix_hz / samp_hz).rem_euclid(TAU);
        Self { phase: 0.0, phase_inc }
    }

    pub fn process(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let mut out = Vec::with_capacity(input.len());
        for &sample in input {
            let rot = Complex::new(self.phase.cos() as f32, self.phase.sin() as f32);
            out.push(sample * rot);
            self.phase = (self.phase + self.phase_inc).rem_euclid(TAU);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU as TAU32;

    fn tone(freq_norm: f32, len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|n| Complex::from_polar(1.0, TAU32 * freq_norm * n as f32))
            .collect()
    }

    #[test]
    fn zero_mix_is_identity() {
        let input = tone(0.1, 32);
        let mut mixer = Mixer::new(0.0, 1_000_000.0);
        let out = mixer.process(&input);
        for (a, b) in input.iter().zip(out.iter()) {
            assert!((a - b).norm() < 1e-5);
        }
    }

    #[test]
    fn mix_to_baseband_cancels_tone() {
        let samp_hz = 1_000_000.0f64;
        let tone_hz = 100_000.0f64;
        let n = 64;
        let input: Vec<Complex<f32>> = (0..n)
            .map(|k| Complex::from_polar(1.0, (TAU * tone_hz * k as f64 / samp_hz) as f32))
            .collect();
        let mut mixer = Mixer::new(tone_hz, samp_hz);
        let out = mixer.process(&input);
        for sample in &out {
            assert!((sample - Complex::new(1.0, 0.0)).norm() < 1e-3);
        }
    }

    #[test]
    fn negative_and_positive_equivalent_frequency_match() {
        let samp_hz = 48_000.0f64;
        let mut pos = Mixer::new(1_000.0, samp_hz);
        let mut neg = Mixer::new(1_000.0 - samp_hz, samp_hz);
        let input = tone(0.05, 16);
        let out_pos = pos.process(&input);
        let out_neg = neg.process(&input);
        for (a, b) in out_pos.iter().zip(out_neg.iter()) {
            assert!((a - b).norm() < 1e-4);
        }
    }

    #[test]
    fn phase_stays_bounded_over_long_runs() {
        let mut mixer = Mixer::new(997.0, 48_000.0);
        let chunk = tone(0.01, 4096);
        for _ in 0..(100_000_000 / 4096) {
            let _ = mixer.process(&chunk);
        }
        assert!(mixer.phase >= 0.0 && mixer.phase < TAU);
    }
}
