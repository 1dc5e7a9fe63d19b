use thiserror::Error;

/// Errors surfaced across the proxy's public operations.
///
/// DSP stages do not use this type: they signal end-of-stream and
/// cancellation by closing their output channel rather than returning an
/// error (see the crate-level docs on propagation policy).
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("center frequency out of range: {center_hz} not in [{min_hz}, {max_hz}]")]
    FrequencyOutOfRange {
        center_hz: u64,
        min_hz: u64,
        max_hz: u64,
    },

    #[error("sample rate out of range: {rate} not in [{min_rate}, {max_rate}]")]
    RateOutOfRange {
        rate: u32,
        min_rate: u32,
        max_rate: u32,
    },

    #[error("sample rate {0} is not an allowed device rate")]
    BadSampleRate(u32),

    #[error("signal '{0}' already exists with different parameters")]
    SignalExists(String),

    #[error("requested band does not overlap the device band")]
    OutOfRange,

    #[error("malformed wire data: {0}")]
    BadFormat(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("end of stream")]
    EndOfStream,

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProxyResult<T> = Result<T, ProxyError>;
