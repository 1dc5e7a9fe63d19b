use sdrproxy_core::{FreqBand, HzBand, ProxyResult};
use sdrproxy_dsp::SpectralAnalyzer;

use crate::device::Device;

const PPM_SAMPLE_RATE: u64 = 2_048_000;
const PPM_BUCKETS: usize = 8192;
const PPM_CENTER_MHZ: f64 = 162.0;
const PPM_FFTS: usize = 100;
const PPM_BUCKET_MHZ: f64 = PPM_SAMPLE_RATE as f64 / PPM_BUCKETS as f64 / 1.0e6;

const NOAA_CHANNELS_MHZ: [f64; 7] = [
    162.400, 162.425, 162.450, 162.475, 162.500, 162.525, 162.550,
];

/// One PPM measurement: tune to the calibration reference, measure 100
/// FFTs of 8192 bins, and find the strongest bin above DC in the upper
/// half of the capture, which covers the NOAA weather-channel set.
async fn find_ppm(device: &Device) -> ProxyResult<f64> {
    device
        .tune_raw(HzBand::new((PPM_CENTER_MHZ * 1e6) as u64, PPM_SAMPLE_RATE))
        .await?;

    let band = FreqBand::new(PPM_CENTER_MHZ, PPM_SAMPLE_RATE as f64 / 1e6);
    let analyzer = SpectralAnalyzer::new(band, PPM_BUCKETS, PPM_FFTS);

    let mut batches = Vec::with_capacity(PPM_FFTS);
    for _ in 0..PPM_FFTS {
        batches.push(device.read_raw_batch(PPM_BUCKETS).await?);
    }
    let stats = analyzer.measure(batches.into_iter())?;

    let mut top_avg = 0.0f32;
    let mut top_freq = 0.0f64;
    for (i, &avg) in stats.avg[PPM_BUCKETS / 2 + 2..].iter().enumerate() {
        if avg > top_avg {
            top_avg = avg;
            top_freq = PPM_CENTER_MHZ + (i as f64 + 2.0) * PPM_BUCKET_MHZ;
        }
    }

    let mut target_freq = 0.0f64;
    let mut best_diff = f64::MAX;
    for &f in &NOAA_CHANNELS_MHZ {
        let diff = (top_freq - f).abs();
        if diff < best_diff {
            target_freq = f;
            best_diff = diff;
        }
    }

    Ok(1e6 * best_diff / target_freq)
}

/// Iterates PPM correction until convergence, returning the final PPM
/// estimate to apply via `set_freq_correction`.
pub async fn calibrate(device: &Device) -> ProxyResult<f64> {
    let mut ppm = find_ppm(device).await?;
    loop {
        if ppm < 1.0 {
            break;
        }
        device.set_freq_correction(ppm.round().max(0.0) as u32).await?;
        ppm = find_ppm(device).await?;
        if ppm < 2.0 {
            break;
        }
        device.set_freq_correction(0).await?;
    }
    Ok(ppm)
}
