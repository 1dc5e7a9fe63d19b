use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

const TAPS: usize = 65; // order 64

fn bessel_i0(x: f32) -> f32 {
    let mut sum = 1.0f32;
    let mut term = 1.0f32;
    let half_x_sq = (x / 2.0) * (x / 2.0);
    for k in 1..32 {
        term *= half_x_sq / (k as f32 * k as f32);
        sum += term;
        if term < sum * 1e-9 {
            break;
        }
    }
    sum
}

fn kaiser_beta(stopband_atten_db: f32) -> f32 {
    let a = stopband_atten_db;
    if a > 50.0 {
        0.1102 * (a - 8.7)
    } else if a >= 21.0 {
        0.5842 * (a - 21.0).powf(0.4) + 0.07886 * (a - 21.0)
    } else {
        0.0
    }
}

/// Windowed-sinc low-pass coefficients, Kaiser-windowed for the requested
/// stopband attenuation. DC gain is `2 * cutoff_norm` (no unity
/// renormalization), matching the scale used by the signal pipeline.
pub fn kaiser_lowpass_coeffs(cutoff_norm: f32, taps: usize, stopband_atten_db: f32) -> Vec<f32> {
    assert!(taps >= 1);
    let beta = kaiser_beta(stopband_atten_db);
    let i0_beta = bessel_i0(beta);
    let m = (taps - 1) as f32;
    let mut coeffs = Vec::with_capacity(taps);
    for i in 0..taps {
        let x = i as f32 - m / 2.0;
        let sinc = if x == 0.0 {
            2.0 * cutoff_norm
        } else {
            (2.0 * PI * cutoff_norm * x).sin() / (PI * x)
        };
        let ratio = if m == 0.0 { 0.0 } else { (2.0 * i as f32 / m - 1.0).clamp(-1.0, 1.0) };
        let window = bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / i0_beta;
        coeffs.push(sinc * window);
    }
    coeffs
}

/// FFT-based overlap-save low-pass filter over complex baseband, with
/// optional integer decimation.
pub struct LowpassFilter {
    h_freq: Vec<Complex<f32>>,
    overlap: Vec<Complex<f32>>,
    n_taps: usize,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    decimation: usize,
    decim_phase: usize,
    subtract_mean: bool,
}

impl LowpassFilter {
    pub fn new(cutoff_hz: f64, samp_hz: f64, decimation: usize, block_size: usize) -> Self {
        Self::with_subtract_mean(cutoff_hz, samp_hz, decimation, block_size, false)
    }

    pub fn with_subtract_mean(
        cutoff_hz: f64,
        samp_hz: f64,
        decimation: usize,
        block_size: usize,
        subtract_mean: bool,
    ) -> Self {
        let cutoff_norm = (cutoff_hz / samp_hz) as f32;
        let coeffs = kaiser_lowpass_coeffs(cutoff_norm, TAPS, 70.0);
        let fft_size = (block_size + TAPS - 1).next_power_of_two();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);

        let mut h_buf: Vec<Complex<f32>> =
            coeffs.iter().map(|&c| Complex::new(c, 0.0)).collect();
        h_buf.resize(fft_size, Complex::new(0.0, 0.0));
        fft.process(&mut h_buf);

        Self {
            h_freq: h_buf,
            overlap: vec![Complex::new(0.0, 0.0); TAPS.saturating_sub(1)],
            n_taps: TAPS,
            fft_size,
            fft,
            ifft,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            decimation: decimation.max(1),
            decim_phase: 0,
            subtract_mean,
        }
    }

    /// Filters one batch, returning every `decimation`th output sample.
    /// Output length is `floor(input.len() / decimation)` (plus or minus
    /// one depending on decimation phase carried over from prior batches).
    pub fn process(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let n_new = input.len();
        let n_overlap = self.n_taps.saturating_sub(1);

        let mean = if self.subtract_mean && n_new > 0 {
            let sum: Complex<f32> = input.iter().copied().sum();
            sum / n_new as f32
        } else {
            Complex::new(0.0, 0.0)
        };

        let buf = &mut self.scratch;
        buf.clear();
        buf.extend(self.overlap.iter().copied());
        buf.extend(input.iter().map(|&s| s - mean));
        buf.resize(self.fft_size, Complex::new(0.0, 0.0));

        self.fft.process(buf);
        let scale = 1.0 / self.fft_size as f32;
        for (x, h) in buf.iter_mut().zip(self.h_freq.iter()) {
            *x = Complex::new(
                (x.re * h.re - x.im * h.im) * scale,
                (x.re * h.im + x.im * h.re) * scale,
            );
        }
        self.ifft.process(buf);

        let end = (n_overlap + n_new).min(buf.len());
        let filtered = &buf[n_overlap..end];

        if n_overlap > 0 {
            if n_new >= n_overlap {
                let start = n_new - n_overlap;
                self.overlap.copy_from_slice(&input[start..]);
            } else {
                let keep = n_overlap - n_new;
                self.overlap.copy_within(n_new..n_overlap, 0);
                self.overlap[keep..].copy_from_slice(input);
            }
        }

        let mut out = Vec::with_capacity(filtered.len() / self.decimation + 1);
        for &sample in filtered {
            if self.decim_phase == 0 {
                out.push(sample);
            }
            self.decim_phase = (self.decim_phase + 1) % self.decimation;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_passes_through_decimation_one() {
        let mut lp = LowpassFilter::new(10_000.0, 100_000.0, 1, 64);
        let input = vec![Complex::new(1.0, 0.0); 256];
        let mut last = Vec::new();
        for _ in 0..4 {
            last = lp.process(&input);
        }
        let tail_avg: f32 =
            last[last.len() - 16..].iter().map(|s| s.re).sum::<f32>() / 16.0;
        assert!((tail_avg - 1.0).abs() < 0.1);
    }

    #[test]
    fn decimation_reduces_output_length() {
        let mut lp = LowpassFilter::new(5_000.0, 100_000.0, 4, 64);
        let input = vec![Complex::new(1.0, 0.0); 256];
        let out = lp.process(&input);
        assert_eq!(out.len(), 256 / 4);
    }

    #[test]
    fn subtract_mean_removes_dc_offset() {
        let mut lp = LowpassFilter::with_subtract_mean(5_000.0, 100_000.0, 1, 64, true);
        let input: Vec<Complex<f32>> = vec![Complex::new(5.0, -5.0); 256];
        let mut last = Vec::new();
        for _ in 0..4 {
            last = lp.process(&input);
        }
        let tail_avg: f32 =
            last[last.len() - 16..].iter().map(|s| s.re.abs()).sum::<f32>() / 16.0;
        assert!(tail_avg < 0.5);
    }

    #[test]
    fn kaiser_coeffs_have_expected_dc_gain() {
        let coeffs = kaiser_lowpass_coeffs(0.1, TAPS, 70.0);
        let sum: f32 = coeffs.iter().sum();
        assert!((sum - 0.2).abs() < 0.02);
    }
}
