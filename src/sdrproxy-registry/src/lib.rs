//! Request deduplication, radio sharing, and reference-counted device
//! teardown. The single read-write lock here guards the `signals` and
//! `radios` maps; device state itself is mutated only by its owning
//! `Device`, never directly by the registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sdrproxy_core::{HzBand, ProxyError, ProxyResult, RxRequest, RxResponse, RxSignal, SdrFormat};
use sdrproxy_device::{next_valid_rate, Device, DeviceReader};
use sdrproxy_mux::Mux;
use sdrproxy_pipeline::Pipeline;

pub type DeviceLocator = Arc<dyn Fn(&str) -> Option<SocketAddr> + Send + Sync>;

const DEFAULT_BATCH_SIZE: usize = 2048;
const DEFAULT_TUNE_WIDTH_HZ: u64 = 2_048_000;

struct RadioEntry {
    device: Arc<Device>,
    mux: Mux<DeviceReader>,
    batch_size: usize,
    ref_count: AtomicUsize,
}

/// A live subscription: its request, its eventual response, and the
/// handles needed to tear it down.
pub struct SignalEntry {
    pub request: RxRequest,
    response: Mutex<Option<RxResponse>>,
    ready_rx: watch::Receiver<bool>,
    ready_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    radio_id: String,
    mux_sub_id: Mutex<Option<u64>>,
    pipeline: Mutex<Option<Pipeline>>,
    /// Count of streams currently open against this name. The entry (and
    /// its radio reference) is only torn down when this drops to zero, so
    /// two concurrent opens of the same idempotent subscription don't tear
    /// each other's stream down on the first one to disconnect.
    stream_count: AtomicUsize,
}

impl SignalEntry {
    fn new(request: RxRequest) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        let radio_id = request.radio.clone();
        Self {
            request,
            response: Mutex::new(None),
            ready_rx,
            ready_tx,
            cancel: CancellationToken::new(),
            radio_id,
            mux_sub_id: Mutex::new(None),
            pipeline: Mutex::new(None),
            stream_count: AtomicUsize::new(0),
        }
    }

    pub async fn wait_ready(&self) {
        let mut rx = self.ready_rx.clone();
        let _ = rx.wait_for(|&r| r).await;
    }

    pub async fn response(&self) -> Option<RxResponse> {
        self.response.lock().await.clone()
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

struct RegistryState {
    signals: HashMap<String, Arc<SignalEntry>>,
    radios: HashMap<String, Arc<RadioEntry>>,
}

pub struct Registry {
    state: RwLock<RegistryState>,
    locator: DeviceLocator,
}

/// Handle returned to a caller that successfully opened a subscription:
/// the entry (for response/listing) plus the raw streaming pieces the
/// wire-protocol layer drives directly.
pub struct OpenedSignal {
    pub entry: Arc<SignalEntry>,
    pub mux_subscription: sdrproxy_mux::Subscription,
    pub pipeline: Mutex<Pipeline>,
}

impl Registry {
    pub fn new(locator: DeviceLocator) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                signals: HashMap::new(),
                radios: HashMap::new(),
            }),
            locator,
        }
    }

    pub async fn open_signal(&self, req: RxRequest) -> ProxyResult<OpenedSignal> {
        let entry = {
            let mut state = self.state.write().await;
            if let Some(existing) = state.signals.get(&req.name) {
                if existing.request.same_subscription(&req) {
                    existing.clone()
                } else {
                    return Err(ProxyError::SignalExists(req.name.clone()));
                }
            } else {
                let entry = Arc::new(SignalEntry::new(req.clone()));
                state.signals.insert(req.name.clone(), entry.clone());
                entry
            }
        };

        if *entry.ready_rx.borrow() {
            entry.wait_ready().await;
            return self.rewire_existing(&entry).await;
        }

        match self.wire_signal(&entry).await {
            Ok(opened) => Ok(opened),
            Err(err) => {
                let mut state = self.state.write().await;
                state.signals.remove(&entry.request.name);
                Err(err)
            }
        }
    }

    async fn rewire_existing(&self, entry: &Arc<SignalEntry>) -> ProxyResult<OpenedSignal> {
        // A second concurrent open of the same signal shares the same
        // logical subscription; it gets its own mux tap at the already
        // negotiated band so both callers observe the same sample stream.
        let radio = self.acquire_radio(&entry.radio_id, None, None, 0).await?;
        let mux_subscription = radio.mux.attach(radio.batch_size, None).await?;
        let device_band = radio.device.current_band().await;
        let pipeline = Pipeline::build(device_band, entry.request.band(), radio.batch_size)?;
        entry.stream_count.fetch_add(1, Ordering::SeqCst);
        Ok(OpenedSignal {
            entry: entry.clone(),
            mux_subscription,
            pipeline: Mutex::new(pipeline),
        })
    }

    async fn wire_signal(&self, entry: &Arc<SignalEntry>) -> ProxyResult<OpenedSignal> {
        let req = &entry.request;
        let radio = self
            .acquire_radio(
                &req.radio,
                req.hint_tune_hz,
                req.hint_width_hz,
                req.band().width,
            )
            .await?;

        let device_band = radio.device.current_band().await;
        let requested_band = req.band();
        let pipeline = Pipeline::build(device_band, requested_band, radio.batch_size)?;
        let mux_subscription = radio.mux.attach(radio.batch_size, None).await?;

        let response = RxResponse {
            format: SdrFormat {
                bit_depth: 8,
                center_hz: requested_band.center,
                sample_rate: requested_band.width as u32,
            },
            radio: radio.device.info().await,
        };
        *entry.response.lock().await = Some(response);
        *entry.mux_sub_id.lock().await = Some(mux_subscription.id());
        entry.stream_count.fetch_add(1, Ordering::SeqCst);
        let _ = entry.ready_tx.send(true);

        Ok(OpenedSignal {
            entry: entry.clone(),
            mux_subscription,
            pipeline: Mutex::new(pipeline),
        })
    }

    async fn acquire_radio(
        &self,
        radio_id: &str,
        hint_tune_hz: Option<u64>,
        hint_width_hz: Option<u64>,
        requested_width: u64,
    ) -> ProxyResult<Arc<RadioEntry>> {
        {
            let state = self.state.read().await;
            if let Some(radio) = state.radios.get(radio_id) {
                radio.ref_count.fetch_add(1, Ordering::SeqCst);
                return Ok(radio.clone());
            }
        }

        let mut state = self.state.write().await;
        if let Some(radio) = state.radios.get(radio_id) {
            radio.ref_count.fetch_add(1, Ordering::SeqCst);
            return Ok(radio.clone());
        }

        let addr = (self.locator)(radio_id)
            .ok_or_else(|| ProxyError::DeviceUnavailable(radio_id.to_string()))?;
        let device = Arc::new(Device::new(radio_id, addr));

        // A tuning hint with no width hint gets the device's fixed default
        // rate, not the requested-width ladder lookup: the ladder only
        // applies when there's no hint at all (sdrproxy/server/server.go).
        let width = match (hint_tune_hz, hint_width_hz) {
            (_, Some(w)) => w,
            (Some(_), None) => DEFAULT_TUNE_WIDTH_HZ,
            (None, None) => next_valid_rate(requested_width) as u64,
        };
        let center = hint_tune_hz.unwrap_or(100_000_000);
        device.set_band(HzBand::new(center, width)).await?;

        let batch_size = DEFAULT_BATCH_SIZE;
        let mux = Mux::new(DeviceReader::new(device.clone(), batch_size));

        let radio = Arc::new(RadioEntry {
            device,
            mux,
            batch_size,
            ref_count: AtomicUsize::new(1),
        });
        state.radios.insert(radio_id.to_string(), radio.clone());
        info!("radio {radio_id} opened");
        Ok(radio)
    }

    /// Releases one stream's hold on `name`. Only once every stream opened
    /// against this name has closed is the entry removed from the registry
    /// and its radio reference released (closing the device if no other
    /// subscription still references it).
    pub async fn close_signal(&self, name: &str) -> ProxyResult<()> {
        let entry = {
            let state = self.state.read().await;
            state.signals.get(name).cloned()
        };
        let Some(entry) = entry else {
            return Ok(());
        };

        if entry.stream_count.fetch_sub(1, Ordering::SeqCst) != 1 {
            // Another stream against the same name is still open.
            return Ok(());
        }

        {
            let mut state = self.state.write().await;
            state.signals.remove(name);
        }
        entry.cancel.cancel();

        let mut state = self.state.write().await;
        if let Some(radio) = state.radios.get(&entry.radio_id).cloned() {
            if radio.ref_count.fetch_sub(1, Ordering::SeqCst) == 1 {
                state.radios.remove(&entry.radio_id);
                drop(state);
                if let Err(e) = radio.device.close().await {
                    warn!("error closing radio {}: {e}", entry.radio_id);
                }
                info!("radio {} closed (no remaining subscribers)", entry.radio_id);
            }
        }
        Ok(())
    }

    /// Snapshot of every currently-registered `{request, response}` pair.
    pub async fn list(&self) -> Vec<RxSignal> {
        let state = self.state.read().await;
        let mut out = Vec::with_capacity(state.signals.len());
        for entry in state.signals.values() {
            if let Some(response) = entry.response().await {
                out.push(RxSignal {
                    request: entry.request.clone(),
                    response,
                });
            }
        }
        out
    }

    /// Hardware info for every radio currently backing a subscription.
    /// Radios with no open subscription aren't tracked, so they don't
    /// appear here until something opens a signal against them.
    pub async fn list_radios(&self) -> Vec<sdrproxy_core::SdrHwInfo> {
        let radios: Vec<Arc<RadioEntry>> = {
            let state = self.state.read().await;
            state.radios.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(radios.len());
        for radio in radios {
            out.push(radio.device.info().await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrproxy_core::RequestBand;

    fn locator() -> DeviceLocator {
        Arc::new(|_id: &str| "127.0.0.1:1".parse().ok())
    }

    fn request(name: &str, center: u64) -> RxRequest {
        RxRequest {
            band: RequestBand {
                center_hz: center,
                width_hz: 200_000,
            },
            name: name.to_string(),
            radio: "r0".to_string(),
            hint_tune_hz: None,
            hint_width_hz: None,
        }
    }

    #[tokio::test]
    async fn mismatched_reopen_fails_with_signal_exists() {
        // Device open itself will fail (nothing listening on 127.0.0.1:1),
        // which this test doesn't reach: name collision is checked first.
        let registry = Registry::new(locator());
        let _ = registry.open_signal(request("x", 100_000_000)).await;
        let second = registry.open_signal(request("x", 200_000_000)).await;
        assert!(matches!(second, Err(ProxyError::SignalExists(_))));
    }

    #[tokio::test]
    async fn listing_is_empty_for_fresh_registry() {
        let registry = Registry::new(locator());
        assert!(registry.list().await.is_empty());
    }
}
