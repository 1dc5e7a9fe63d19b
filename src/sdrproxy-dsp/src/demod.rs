use std::f32::consts::TAU;

use num_complex::Complex;

/// FM quadrature discriminator: instantaneous frequency via
/// `arg(s[n] * conj(s[n-1]))`, scaled by a fixed full-scale factor derived
/// from the modulation index `h = delta_f / samp_hz` so a signal at the
/// nominal peak deviation maps to +/-1.
///
/// `h` is a caller-supplied calibration constant rather than a value tracked
/// from the running min/max of the stream, which would clip the first
/// samples before the range settled.
pub struct FmDemodulator {
    gain: f32,
    prev: Option<Complex<f32>>,
}

impl FmDemodulator {
    pub fn new(h: f32) -> Self {
        assert!(h > 0.0);
        Self {
            gain: 1.0 / (TAU * h),
            prev: None,
        }
    }

    pub fn process(&mut self, samples: &[Complex<f32>]) -> Vec<f32> {
        if samples.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(samples.len());

        let first_prev = self.prev.take();
        if let Some(prev) = first_prev {
            let product = samples[0] * prev.conj();
            out.push(product.im.atan2(product.re) * self.gain);
        } else {
            out.push(0.0);
        }

        for idx in 1..samples.len() {
            let product = samples[idx] * samples[idx - 1].conj();
            out.push(product.im.atan2(product.re) * self.gain);
        }

        self.prev = samples.last().copied();
        out
    }
}
