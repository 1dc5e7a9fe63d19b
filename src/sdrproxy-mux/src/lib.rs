//! Single backing reader, fanned out to many bounded subscriber channels
//! with slow-consumer eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use num_complex::Complex;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sdrproxy_core::{ProxyError, ProxyResult};

pub type Batch = Arc<Vec<Complex<f32>>>;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 4;
const SLOW_CONSUMER_DEADLINE: Duration = Duration::from_secs(1);

/// The backing device/file batch producer. Implementors do their own
/// decoding; the mux only moves already-decoded batches.
#[async_trait::async_trait]
pub trait BatchSource: Send {
    async fn read_batch(&mut self) -> ProxyResult<Vec<Complex<f32>>>;
}

struct SubSlot {
    tx: mpsc::Sender<Batch>,
    cancel: CancellationToken,
    delivered: u64,
    limit: Option<u64>,
}

struct MuxState {
    batch_size: Option<usize>,
    subs: HashMap<u64, SubSlot>,
}

struct MuxShared<S> {
    state: Mutex<MuxState>,
    source: Mutex<S>,
    notify: Notify,
    next_id: AtomicU64,
    active: AtomicBool,
}

/// One subscriber's handle on a [`Mux`].
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Batch>,
    cancel: CancellationToken,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Batch> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

pub struct Mux<S> {
    shared: Arc<MuxShared<S>>,
}

impl<S> Clone for Mux<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: BatchSource + Send + 'static> Mux<S> {
    pub fn new(source: S) -> Self {
        let shared = Arc::new(MuxShared {
            state: Mutex::new(MuxState {
                batch_size: None,
                subs: HashMap::new(),
            }),
            source: Mutex::new(source),
            notify: Notify::new(),
            next_id: AtomicU64::new(0),
            active: AtomicBool::new(false),
        });
        let mux = Self { shared };
        mux.spawn_reader();
        mux
    }

    /// Attaches a new subscriber. `batch_size` must match the size recorded
    /// by the first-ever attach for this mux's lifetime; a mismatch is a
    /// caller bug and is rejected rather than silently coerced.
    pub async fn attach(&self, batch_size: usize, limit: Option<u64>) -> ProxyResult<Subscription> {
        let mut state = self.shared.state.lock().await;
        match state.batch_size {
            None => state.batch_size = Some(batch_size),
            Some(n) if n != batch_size => {
                return Err(ProxyError::BadFormat(format!(
                    "mux batch size mismatch: existing session uses {n}, attach requested {batch_size}"
                )));
            }
            _ => {}
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        state.subs.insert(
            id,
            SubSlot {
                tx,
                cancel: cancel.clone(),
                delivered: 0,
                limit,
            },
        );
        self.shared.active.store(true, Ordering::SeqCst);
        drop(state);
        self.shared.notify.notify_one();

        Ok(Subscription { id, rx, cancel })
    }

    pub async fn detach(&self, id: u64) {
        let mut state = self.shared.state.lock().await;
        state.subs.remove(&id);
        self.shared.active.store(!state.subs.is_empty(), Ordering::SeqCst);
    }

    /// True iff at least one subscriber is currently attached.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn spawn_reader(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                // Idle until at least one subscriber attaches.
                loop {
                    let empty = shared.state.lock().await.subs.is_empty();
                    if !empty {
                        break;
                    }
                    shared.notify.notified().await;
                }

                let batch = {
                    let mut source = shared.source.lock().await;
                    source.read_batch().await
                };

                match batch {
                    Ok(samples) => {
                        let batch: Batch = Arc::new(samples);
                        Self::deliver(&shared, batch).await;
                    }
                    Err(err) => {
                        warn!("mux backing reader failed, closing all subscribers: {err}");
                        let mut state = shared.state.lock().await;
                        state.subs.clear();
                        shared.active.store(false, Ordering::SeqCst);
                    }
                }
            }
        });
    }

    async fn deliver(shared: &Arc<MuxShared<S>>, batch: Batch) {
        let mut state = shared.state.lock().await;
        let single_subscriber = state.subs.len() == 1;
        let mut to_remove = Vec::new();

        for (&id, slot) in state.subs.iter_mut() {
            if slot.cancel.is_cancelled() {
                to_remove.push(id);
                continue;
            }

            let send_result = if single_subscriber {
                // No deadline: the only consumer cannot starve anyone else.
                Some(slot.tx.send(batch.clone()).await.is_ok())
            } else {
                match tokio::time::timeout(SLOW_CONSUMER_DEADLINE, slot.tx.send(batch.clone())).await {
                    Ok(res) => Some(res.is_ok()),
                    Err(_elapsed) => {
                        debug!("subscriber {id} missed delivery deadline, evicting");
                        None
                    }
                }
            };

            match send_result {
                Some(true) => {
                    slot.delivered += 1;
                    if let Some(limit) = slot.limit {
                        if slot.delivered >= limit {
                            to_remove.push(id);
                        }
                    }
                }
                Some(false) | None => to_remove.push(id),
            }
        }

        for id in to_remove {
            state.subs.remove(&id);
        }
        shared.active.store(!state.subs.is_empty(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc as tmpsc;

    struct CountingSource {
        batch_len: usize,
        tx: tmpsc::UnboundedSender<()>,
        produced: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl BatchSource for CountingSource {
        async fn read_batch(&mut self) -> ProxyResult<Vec<Complex<f32>>> {
            self.produced.fetch_add(1, Ordering::SeqCst);
            let _ = self.tx.send(());
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(vec![Complex::new(0.0, 0.0); self.batch_len])
        }
    }

    #[tokio::test]
    async fn two_subscribers_receive_same_sequence() {
        let produced = Arc::new(AtomicUsize::new(0));
        let (tick_tx, _tick_rx) = tmpsc::unbounded_channel();
        let source = CountingSource {
            batch_len: 8,
            tx: tick_tx,
            produced: produced.clone(),
        };
        let mux = Mux::new(source);

        let mut a = mux.attach(8, None).await.unwrap();
        let mut b = mux.attach(8, None).await.unwrap();

        for _ in 0..5 {
            let ba = a.recv().await.unwrap();
            let bb = b.recv().await.unwrap();
            assert_eq!(ba.len(), bb.len());
        }
    }

    #[tokio::test]
    async fn mismatched_batch_size_is_rejected() {
        let produced = Arc::new(AtomicUsize::new(0));
        let (tick_tx, _tick_rx) = tmpsc::unbounded_channel();
        let source = CountingSource {
            batch_len: 8,
            tx: tick_tx,
            produced,
        };
        let mux = Mux::new(source);
        let _a = mux.attach(8, None).await.unwrap();
        let err = mux.attach(16, None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn active_iff_subscribers_present() {
        let produced = Arc::new(AtomicUsize::new(0));
        let (tick_tx, _tick_rx) = tmpsc::unbounded_channel();
        let source = CountingSource {
            batch_len: 4,
            tx: tick_tx,
            produced,
        };
        let mux = Mux::new(source);
        assert!(!mux.is_active());
        let sub = mux.attach(4, None).await.unwrap();
        assert!(mux.is_active());
        mux.detach(sub.id()).await;
        assert!(!mux.is_active());
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_while_fast_subscriber_continues() {
        let produced = Arc::new(AtomicUsize::new(0));
        let (tick_tx, _tick_rx) = tmpsc::unbounded_channel();
        let source = CountingSource {
            batch_len: 4,
            tx: tick_tx,
            produced,
        };
        let mux = Mux::new(source);

        let mut fast = mux.attach(4, None).await.unwrap();
        let mut slow = mux.attach(4, None).await.unwrap();

        let fast_task = tokio::spawn(async move {
            let mut count: usize = 0;
            while fast.recv().await.is_some() {
                count += 1;
                if count >= 50 {
                    break;
                }
            }
            count
        });

        // Never drain `slow`: its channel fills past capacity and the mux's
        // next delivery attempt blocks on it past SLOW_CONSUMER_DEADLINE,
        // evicting it. The eviction closes its channel once buffered batches
        // are drained.
        let drained = tokio::time::timeout(Duration::from_secs(3), async {
            let mut n = 0;
            while slow.recv().await.is_some() {
                n += 1;
            }
            n
        })
        .await
        .expect("slow subscriber was never evicted");
        assert!(drained <= SUBSCRIBER_CHANNEL_CAPACITY);

        let fast_count = tokio::time::timeout(Duration::from_secs(2), fast_task)
            .await
            .expect("fast subscriber task timed out")
            .unwrap();
        assert!(
            fast_count > SUBSCRIBER_CHANNEL_CAPACITY,
            "fast subscriber should keep receiving past the slow one's eviction, got {fast_count}"
        );
    }

    #[tokio::test]
    async fn per_subscriber_limit_detaches_after_budget() {
        let produced = Arc::new(AtomicUsize::new(0));
        let (tick_tx, _tick_rx) = tmpsc::unbounded_channel();
        let source = CountingSource {
            batch_len: 4,
            tx: tick_tx,
            produced,
        };
        let mux = Mux::new(source);
        let mut sub = mux.attach(4, Some(3)).await.unwrap();
        let mut count = 0;
        while sub.recv().await.is_some() {
            count += 1;
            if count > 10 {
                break;
            }
        }
        assert_eq!(count, 3);
    }
}
