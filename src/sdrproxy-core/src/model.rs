use serde::{Deserialize, Serialize};

use crate::band::HzBand;

/// The tuning/format actually in effect for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdrFormat {
    pub bit_depth: u32,
    pub center_hz: u64,
    pub sample_rate: u32,
}

/// Static and current hardware description for an enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdrHwInfo {
    pub id: String,
    pub min_hz: u64,
    pub max_hz: u64,
    pub min_sample_rate: u32,
    pub max_sample_rate: u32,
    pub bit_depth: u32,
    pub center_hz: u64,
    pub sample_rate: u32,
}

/// A subscription request: the wire and in-memory key for a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxRequest {
    #[serde(flatten)]
    pub band: RequestBand,
    pub name: String,
    pub radio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_tune_hz: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_width_hz: Option<u64>,
}

/// `HzBand` flattened onto `RxRequest` as `center_hz`/`width_hz`, matching
/// the wire field names; kept distinct from [`HzBand`] because the
/// in-memory type uses bare `center`/`width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBand {
    pub center_hz: u64,
    pub width_hz: u64,
}

impl From<RequestBand> for HzBand {
    fn from(rb: RequestBand) -> Self {
        HzBand::new(rb.center_hz, rb.width_hz)
    }
}

impl From<HzBand> for RequestBand {
    fn from(hzb: HzBand) -> Self {
        RequestBand {
            center_hz: hzb.center,
            width_hz: hzb.width,
        }
    }
}

impl RxRequest {
    pub fn band(&self) -> HzBand {
        self.band.into()
    }

    /// Two requests are the same subscription iff band and radio match;
    /// `name` is the lookup key and is checked separately by the registry.
    pub fn same_subscription(&self, other: &RxRequest) -> bool {
        self.band == other.band && self.radio == other.radio
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RxResponse {
    pub format: SdrFormat,
    pub radio: SdrHwInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RxSignal {
    pub request: RxRequest,
    pub response: RxResponse,
}
