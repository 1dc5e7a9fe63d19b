use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use sdrproxy_core::{band_merge, FreqBand, ProxyError, ProxyResult};

/// Windowed FFT magnitude statistics accumulated over a window of FFTs,
/// plus the band/spur detectors derived from them.
pub struct SpectralStats {
    pub band: FreqBand,
    pub fft_size: usize,
    pub min: Vec<f32>,
    pub max: Vec<f32>,
    pub avg: Vec<f32>,
    pub med: Vec<f32>,
}

impl SpectralStats {
    fn median_of(values: &[f32]) -> f32 {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        sorted[sorted.len() / 2]
    }

    /// Median of the per-bin average vector.
    pub fn spread(&self) -> f32 {
        Self::median_of(&self.avg)
    }

    /// Sample stddev of the per-bin average around `spread`.
    pub fn stddev(&self) -> f32 {
        let spread = self.spread();
        let sum_sq: f32 = self.avg.iter().map(|&v| (v - spread) * (v - spread)).sum();
        (sum_sq / (self.avg.len() as f32 - 1.0)).sqrt()
    }

    /// Median of the per-bin median vector.
    pub fn noise_floor(&self) -> f32 {
        Self::median_of(&self.med)
    }

    fn bin_width_hz(&self) -> f64 {
        self.band.width_mhz / self.fft_size as f64
    }

    fn bin_center(&self, bin: usize) -> f64 {
        let half = self.fft_size as f64 / 2.0;
        (bin as f64 - half) * self.bin_width_hz() + self.band.center_mhz
    }

    fn freq_of_run(&self, begin: usize, count: usize) -> FreqBand {
        let bin_width = self.bin_width_hz();
        let begin_mhz = (begin as f64 - self.fft_size as f64 / 2.0) * bin_width + self.band.center_mhz;
        let width_mhz = count as f64 * bin_width;
        FreqBand::new(begin_mhz + width_mhz / 2.0, width_mhz)
    }

    /// Contiguous-run band detector with the rising-shoulder monotonicity
    /// condition: a run only opens where the preceding bin is at most half
    /// the excursion of the opening bin. Bin 0 has no preceding bin to
    /// check, so a run may never open there.
    pub fn bands(&self) -> Vec<FreqBand> {
        let spread = self.spread();
        let stddev = self.stddev();
        let threshold = 1.5 * stddev;

        let mut out = Vec::new();
        let mut run: Option<(usize, usize, f32)> = None; // (begin, end, power_sum)

        for (i, &avg) in self.avg.iter().enumerate() {
            let excursion = avg - spread;
            if excursion >= threshold {
                if run.is_none() {
                    let shoulder_ok = i != 0 && (self.avg[i - 1] - spread) <= excursion / 2.0;
                    if !shoulder_ok {
                        continue;
                    }
                    run = Some((i, i, excursion));
                } else {
                    let (begin, _, power_sum) = run.unwrap();
                    run = Some((begin, i, power_sum + excursion));
                }
            } else if let Some((begin, end, power_sum)) = run.take() {
                let n = end - begin + 1;
                let _ = power_sum / n as f32;
                out.push(self.freq_of_run(begin, n));
            }
        }
        if let Some((begin, end, _)) = run {
            out.push(self.freq_of_run(begin, end - begin + 1));
        }
        band_merge(&out)
    }

    /// Single-bin spur detector.
    pub fn spurs(&self) -> Vec<FreqBand> {
        let spread = self.spread();
        let stddev = self.stddev();
        let mut out = Vec::new();
        for i in 1..self.avg.len().saturating_sub(1) {
            let mid = self.avg[i] - spread;
            if mid < 0.0 {
                continue;
            }
            let left = self.avg[i - 1] - spread;
            let right = self.avg[i + 1] - spread;
            if mid - left > 2.0 * stddev && mid - right > 2.0 * stddev {
                out.push(self.freq_of_run(i, 1));
            }
        }
        out
    }

    /// Average `avg` across the bins covering `fb`, minus `spread`: the
    /// SNR estimate used to gate capture on an external band.
    pub fn band_power(&self, fb: &FreqBand) -> f32 {
        let bin_width = self.bin_width_hz();
        let band_bins = (fb.width_mhz / bin_width).round() as usize;
        let start_off = fb.begin_mhz() - self.band.center_mhz;
        let start_bin = (start_off / bin_width + self.fft_size as f64 / 2.0).round() as isize;
        let mut sum = 0.0f32;
        let mut n = 0usize;
        for i in 0..band_bins {
            let idx = start_bin + i as isize;
            if idx >= 0 && (idx as usize) < self.avg.len() {
                sum += self.avg[idx as usize];
                n += 1;
            }
        }
        if n == 0 {
            return f32::NEG_INFINITY;
        }
        (sum / n as f32) - self.spread()
    }

    #[allow(dead_code)]
    fn center_hz_of(&self, bin: usize) -> f64 {
        self.bin_center(bin) * 1e6
    }
}

pub struct SpectralAnalyzer {
    band: FreqBand,
    fft_size: usize,
    window_count: usize,
    fft: Arc<dyn Fft<f32>>,
}

impl SpectralAnalyzer {
    pub fn new(band: FreqBand, fft_size: usize, window_count: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            band,
            fft_size,
            window_count,
            fft,
        }
    }

    /// Consumes up to `window_count` batches of length `fft_size` from
    /// `batches`, failing with `EndOfStream` if fewer are available.
    pub fn measure<I>(&self, mut batches: I) -> ProxyResult<SpectralStats>
    where
        I: Iterator<Item = Vec<Complex<f32>>>,
    {
        let k = self.fft_size;
        let med_samples = self.window_count.min(10).max(1);

        let mut min = vec![0.0f32; k];
        let mut max = vec![0.0f32; k];
        let mut avg = vec![0.0f32; k];
        let mut meds = vec![vec![0.0f32; med_samples]; k];

        for n in 0..self.window_count {
            let batch = batches.next().ok_or(ProxyError::EndOfStream)?;
            let mut buf: Vec<Complex<f32>> = batch;
            buf.resize(k, Complex::new(0.0, 0.0));
            self.fft.process(&mut buf);

            for (i, value) in buf.iter().enumerate() {
                let idx = if i >= k / 2 { i - k / 2 } else { i + k / 2 };
                let db = 20.0 * value.norm().max(1e-10).log10();
                avg[idx] += db / self.window_count as f32;
                if min[idx] == 0.0 || min[idx] > db {
                    min[idx] = db;
                }
                if max[idx] == 0.0 || max[idx] < db {
                    max[idx] = db;
                }
                let slot = ((med_samples - 1) * n) / self.window_count;
                meds[idx][slot] = db;
            }
        }

        let mut med = vec![0.0f32; k];
        for (i, samples) in meds.iter_mut().enumerate() {
            samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
            med[i] = samples[samples.len() / 2];
        }

        Ok(SpectralStats {
            band: self.band,
            fft_size: k,
            min,
            max,
            avg,
            med,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn tone_batch(k: usize, bin: usize) -> Vec<Complex<f32>> {
        let freq_norm = bin as f32 / k as f32;
        (0..k)
            .map(|n| Complex::from_polar(1.0, TAU * freq_norm * n as f32))
            .collect()
    }

    fn noise_batch(k: usize, seed: u64) -> Vec<Complex<f32>> {
        let mut state = seed;
        (0..k)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                let v = ((state >> 33) as f32 / u32::MAX as f32) * 0.01 - 0.005;
                Complex::new(v, 0.0)
            })
            .collect()
    }

    #[test]
    fn clean_tone_yields_one_detected_band() {
        let k = 256usize;
        let band = FreqBand::new(100.0, 2.048); // MHz
        let analyzer = SpectralAnalyzer::new(band, k, 20);
        let target_bin = k / 2 + 20;

        let batches = (0..20).map(move |i| {
            let mut b = noise_batch(k, i as u64 + 1);
            let tone = tone_batch(k, target_bin);
            for (s, t) in b.iter_mut().zip(tone.iter()) {
                *s += *t;
            }
            b
        });

        let stats = analyzer.measure(batches).unwrap();
        let bands = stats.bands();
        assert_eq!(bands.len(), 1, "expected exactly one band, got {bands:?}");

        let expected_center = band.center_mhz + 20.0 * band.width_mhz / k as f64;
        let bin_width = band.width_mhz / k as f64;
        assert!((bands[0].center_mhz - expected_center).abs() <= bin_width);
    }

    #[test]
    fn end_of_stream_when_too_few_batches() {
        let k = 64usize;
        let band = FreqBand::new(100.0, 1.0);
        let analyzer = SpectralAnalyzer::new(band, k, 10);
        let batches = (0..3).map(move |_| vec![Complex::new(0.0, 0.0); k]);
        let result = analyzer.measure(batches);
        assert!(matches!(result, Err(ProxyError::EndOfStream)));
    }
}
