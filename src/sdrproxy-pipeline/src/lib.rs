//! Per-subscription chain: mixdown -> lowpass -> resample, wired to map
//! the device's captured band onto a client's requested band.

use num_complex::Complex;

use sdrproxy_core::{HzBand, ProxyError, ProxyResult};
use sdrproxy_dsp::{LowpassFilter, Mixer, Resampler};

struct Stages {
    mixer: Option<Mixer>,
    lowpass: LowpassFilter,
    resampler: Resampler,
}

/// A wired per-subscription DSP chain. `None` when the requested band
/// exactly matches the device band (pure pass-through).
pub struct Pipeline {
    stages: Option<Stages>,
}

impl Pipeline {
    /// Builds the chain mapping `device_band` (the mux tap's current band)
    /// onto `requested` (the subscriber's logical output band).
    pub fn build(device_band: HzBand, requested: HzBand, batch_size: usize) -> ProxyResult<Self> {
        if !device_band.overlaps(&requested) {
            return Err(ProxyError::OutOfRange);
        }

        if device_band == requested {
            return Ok(Self { stages: None });
        }

        let mixer = if device_band.center != requested.center {
            let mix_hz = requested.center as f64 - device_band.center as f64;
            Some(Mixer::new(mix_hz, device_band.width as f64))
        } else {
            None
        };

        let decimation = largest_power_of_two_decimation(device_band.width, requested.width);
        let lowpass = LowpassFilter::new(
            requested.width as f64,
            device_band.width as f64,
            decimation,
            batch_size,
        );

        let post_decim_rate = device_band.width as f64 / decimation as f64;
        let ratio = requested.width as f64 / post_decim_rate;
        let resampler = Resampler::new(ratio);

        Ok(Self {
            stages: Some(Stages {
                mixer,
                lowpass,
                resampler,
            }),
        })
    }

    pub fn process(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let Some(stages) = self.stages.as_mut() else {
            return input.to_vec();
        };

        let mixed = match stages.mixer.as_mut() {
            Some(mixer) => mixer.process(input),
            None => input.to_vec(),
        };
        let filtered = stages.lowpass.process(&mixed);
        stages.resampler.process(&filtered)
    }
}

/// Largest power of two `D` with `device_width >= 4*D*requested_width`.
fn largest_power_of_two_decimation(device_width: u64, requested_width: u64) -> usize {
    if requested_width == 0 {
        return 1;
    }
    let mut d: u64 = 1;
    while device_width >= 4 * (d * 2) * requested_width {
        d *= 2;
    }
    d as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bands_pass_through() {
        let band = HzBand::new(100_000_000, 2_048_000);
        let mut pipeline = Pipeline::build(band, band, 256).unwrap();
        let input = vec![Complex::new(1.0, 0.0); 64];
        let out = pipeline.process(&input);
        assert_eq!(out, input);
    }

    #[test]
    fn disjoint_bands_fail_out_of_range() {
        let device = HzBand::new(100_000_000, 2_048_000);
        let requested = HzBand::new(200_000_000, 10_000);
        let err = Pipeline::build(device, requested, 256);
        assert!(matches!(err, Err(ProxyError::OutOfRange)));
    }

    #[test]
    fn decimation_picks_largest_covering_power_of_two() {
        assert_eq!(largest_power_of_two_decimation(2_048_000, 10_000), 16);
        assert_eq!(largest_power_of_two_decimation(2_048_000, 2_048_000), 1);
    }

    #[test]
    fn narrower_subscription_shrinks_batches() {
        let device = HzBand::new(100_000_000, 2_048_000);
        let requested = HzBand::new(100_000_000, 240_000);
        let mut pipeline = Pipeline::build(device, requested, 2048).unwrap();
        let input = vec![Complex::new(1.0, 0.0); 2048];
        let mut last = Vec::new();
        for _ in 0..4 {
            last = pipeline.process(&input);
        }
        assert!(!last.is_empty());
        assert!(last.len() < input.len());
    }
}
