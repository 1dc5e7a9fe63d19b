use std::net::SocketAddr;
use std::time::{Duration, Instant};

use num_complex::Complex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{info, warn};

use sdrproxy_core::{HzBand, ProxyError, ProxyResult, SdrHwInfo};

use crate::ppm::calibrate;
use crate::rate::{next_valid_rate, validate_freq, validate_rate};
use crate::wire::{decode_dongle_header, encode_command, DongleInfo, Opcode};

pub const MIN_FREQ_HZ: u64 = 25_000_000;
pub const MAX_FREQ_HZ: u64 = 1_750_000_000;
pub const MAX_SAMPLE_RATE: u32 = 3_200_000;

const CONNECT_ATTEMPTS: usize = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);
const CALIBRATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct DeviceState {
    conn: Option<TcpStream>,
    dongle: Option<DongleInfo>,
    last_center: u64,
    last_rate: u32,
    last_ppm: u32,
    last_calibrate: Option<Instant>,
}

/// Driver for a single TCP-attached 8-bit I/Q dongle.
pub struct Device {
    pub id: String,
    addr: SocketAddr,
    state: Mutex<DeviceState>,
}

impl Device {
    pub fn new(id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            addr,
            state: Mutex::new(DeviceState {
                conn: None,
                dongle: None,
                last_center: 0,
                last_rate: 0,
                last_ppm: 0,
                last_calibrate: None,
            }),
        }
    }

    async fn connect(&self) -> ProxyResult<(TcpStream, DongleInfo)> {
        let mut last_err = None;
        for attempt in 0..CONNECT_ATTEMPTS {
            match TcpStream::connect(self.addr).await {
                Ok(mut stream) => {
                    let mut header = [0u8; 12];
                    if let Err(e) = stream.read_exact(&mut header).await {
                        last_err = Some(ProxyError::Io(e));
                    } else {
                        match decode_dongle_header(&header) {
                            Ok(info) => return Ok((stream, info)),
                            Err(e) => last_err = Some(e),
                        }
                    }
                }
                Err(e) => {
                    warn!("device {} connect attempt {attempt} failed: {e}", self.id);
                    last_err = Some(ProxyError::Io(e));
                }
            }
            tokio::time::sleep(CONNECT_RETRY_DELAY).await;
        }
        Err(last_err.unwrap_or(ProxyError::DeviceUnavailable(self.id.clone())))
    }

    async fn ensure_connected(&self, state: &mut DeviceState) -> ProxyResult<()> {
        if state.conn.is_none() {
            let (stream, info) = self.connect().await?;
            state.conn = Some(stream);
            state.dongle = Some(info);
        }
        Ok(())
    }

    async fn send_command(stream: &mut TcpStream, opcode: Opcode, value: u32) -> ProxyResult<()> {
        let buf = encode_command(opcode, value);
        stream.write_all(&buf).await.map_err(ProxyError::Io)
    }

    /// Resets the data connection so the next read is aligned to whatever
    /// tuning command was just issued.
    async fn reset_conn(&self, state: &mut DeviceState) -> ProxyResult<()> {
        state.conn = None;
        state.dongle = None;
        self.ensure_connected(state).await
    }

    /// Tunes without the calibration/history bookkeeping `set_band` does;
    /// used internally by the PPM search, which tunes far more often than a
    /// normal retune and must not recurse into calibration itself.
    pub(crate) async fn tune_raw(&self, band: HzBand) -> ProxyResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await?;
        {
            let stream = state.conn.as_mut().unwrap();
            Self::send_command(stream, Opcode::SampleRate, band.width as u32).await?;
            Self::send_command(stream, Opcode::CenterFreq, band.center as u32).await?;
        }
        state.last_center = band.center;
        state.last_rate = band.width as u32;
        self.reset_conn(&mut state).await
    }

    pub async fn set_band(&self, band: HzBand) -> ProxyResult<()> {
        validate_freq(band.center, MIN_FREQ_HZ, MAX_FREQ_HZ)?;
        validate_rate(band.width as u32)?;

        let needs_calibration = {
            let state = self.state.lock().await;
            state
                .last_calibrate
                .map(|t| t.elapsed() > CALIBRATION_INTERVAL)
                .unwrap_or(true)
        };

        if needs_calibration {
            let first_calibration = {
                let state = self.state.lock().await;
                state.last_calibrate.is_none()
            };
            if first_calibration {
                let mut state = self.state.lock().await;
                self.ensure_connected(&mut state).await?;
                let stream = state.conn.as_mut().unwrap();
                Self::send_command(stream, Opcode::AgcMode, 1).await?;
            }
            {
                let mut state = self.state.lock().await;
                state.last_calibrate = Some(Instant::now());
            }
            let ppm = calibrate(self).await?;
            self.set_freq_correction(ppm.round().max(0.0) as u32).await?;
            info!("device {} calibrated: ppm={ppm:.2}", self.id);
        }

        let mut state = self.state.lock().await;
        if state.last_center == band.center && state.last_rate == band.width as u32 {
            return Ok(());
        }
        self.ensure_connected(&mut state).await?;
        {
            let stream = state.conn.as_mut().unwrap();
            Self::send_command(stream, Opcode::SampleRate, band.width as u32).await?;
            Self::send_command(stream, Opcode::CenterFreq, band.center as u32).await?;
        }
        state.last_center = band.center;
        state.last_rate = band.width as u32;
        self.reset_conn(&mut state).await
    }

    pub async fn set_freq_correction(&self, ppm: u32) -> ProxyResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await?;
        {
            let stream = state.conn.as_mut().unwrap();
            Self::send_command(stream, Opcode::FreqCorrection, ppm).await?;
        }
        state.last_ppm = ppm;
        Ok(())
    }

    pub async fn current_band(&self) -> HzBand {
        let state = self.state.lock().await;
        HzBand::new(state.last_center, state.last_rate as u64)
    }

    pub async fn info(&self) -> SdrHwInfo {
        let state = self.state.lock().await;
        SdrHwInfo {
            id: self.id.clone(),
            min_hz: MIN_FREQ_HZ,
            max_hz: MAX_FREQ_HZ,
            min_sample_rate: 240_000,
            max_sample_rate: MAX_SAMPLE_RATE,
            bit_depth: 8,
            center_hz: state.last_center,
            sample_rate: state.last_rate,
        }
    }

    /// Default tuning width chosen when no hint is supplied.
    pub fn default_width_for(&self, requested_width_hz: u64) -> u32 {
        next_valid_rate(requested_width_hz)
    }

    pub async fn close(&self) -> ProxyResult<()> {
        let mut state = self.state.lock().await;
        state.conn = None;
        state.dongle = None;
        Ok(())
    }

    /// Reads exactly `n` complex samples from the current data connection,
    /// retrying short reads until the batch is full. A partial batch at
    /// end-of-stream is discarded and reported as `EndOfStream`.
    pub(crate) async fn read_raw_batch(&self, n: usize) -> ProxyResult<Vec<Complex<f32>>> {
        let mut buf = vec![0u8; n * 2];
        let mut filled = 0usize;
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await?;
        let stream = state.conn.as_mut().unwrap();
        while filled < buf.len() {
            let read = stream.read(&mut buf[filled..]).await.map_err(ProxyError::Io)?;
            if read == 0 {
                return Err(ProxyError::EndOfStream);
            }
            filled += read;
        }
        Ok(sdrproxy_core::iq::decode_batch_exact(&buf))
    }
}

/// Adapts a [`Device`]'s current data connection into a
/// [`sdrproxy_mux::BatchSource`].
pub struct DeviceReader {
    device: std::sync::Arc<Device>,
    batch_size: usize,
}

impl DeviceReader {
    pub fn new(device: std::sync::Arc<Device>, batch_size: usize) -> Self {
        Self { device, batch_size }
    }
}

#[async_trait::async_trait]
impl sdrproxy_mux::BatchSource for DeviceReader {
    async fn read_batch(&mut self) -> ProxyResult<Vec<Complex<f32>>> {
        self.device.read_raw_batch(self.batch_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_band_rejects_out_of_range_frequency_without_connecting() {
        let device = Device::new("test", "127.0.0.1:1".parse().unwrap());
        let band = HzBand::new(MAX_FREQ_HZ + 1, 1_024_000);
        let err = device.set_band(band).await;
        assert!(matches!(err, Err(ProxyError::FrequencyOutOfRange { .. })));
    }

    #[tokio::test]
    async fn set_band_rejects_forbidden_rate_without_connecting() {
        let device = Device::new("test", "127.0.0.1:1".parse().unwrap());
        let band = HzBand::new(100_000_000, 500_000);
        let err = device.set_band(band).await;
        assert!(matches!(err, Err(ProxyError::BadSampleRate(_))));
    }
}
