//! Bandwidth profiles and the priority request queue
//!
//! The detected network type selects a cap on concurrent remote requests.
//! When the cap is reached, new requests queue by priority; a processor
//! task wakes every 100 ms and starts as many queued requests as the cap
//! permits. Within a priority, requests start in arrival order.

use super::{TransportError, TransportResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the queue processor wakes.
pub const QUEUE_WAKE_INTERVAL: Duration = Duration::from_millis(100);

/// Network classification used to pick a bandwidth profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    /// Wireless LAN.
    Wifi,
    /// Metered cellular link.
    Mobile,
    /// Wired connection.
    Ethernet,
    /// Could not be classified.
    Unknown,
}

impl NetworkType {
    /// Parse the environment signal form (`wifi|mobile|ethernet|unknown`).
    pub fn parse(text: &str) -> Self {
        match text.to_ascii_lowercase().as_str() {
            "wifi" => NetworkType::Wifi,
            "mobile" | "cellular" => NetworkType::Mobile,
            "ethernet" | "wired" => NetworkType::Ethernet,
            _ => NetworkType::Unknown,
        }
    }

    /// The bandwidth profile for this network type.
    pub fn profile(&self) -> BandwidthProfile {
        match self {
            NetworkType::Wifi => BandwidthProfile {
                max_concurrent: 8,
                max_bytes_per_sec: 10 * 1024 * 1024,
            },
            NetworkType::Mobile => BandwidthProfile {
                max_concurrent: 2,
                max_bytes_per_sec: 1024 * 1024,
            },
            NetworkType::Ethernet => BandwidthProfile {
                max_concurrent: 16,
                max_bytes_per_sec: 50 * 1024 * 1024,
            },
            NetworkType::Unknown => BandwidthProfile {
                max_concurrent: 4,
                max_bytes_per_sec: 2 * 1024 * 1024,
            },
        }
    }
}

/// Caps applied while a network type is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandwidthProfile {
    /// Concurrent in-flight requests.
    pub max_concurrent: usize,
    /// Download budget per second.
    pub max_bytes_per_sec: u64,
}

/// Priority of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPriority {
    /// Background work.
    Low,
    /// Default.
    Normal,
    /// User-visible work.
    High,
    /// Blocking the user right now.
    Urgent,
}

struct Waiting {
    priority: RequestPriority,
    seq: u64,
    reply: oneshot::Sender<Permit>,
}

struct QueueInner {
    pending: Mutex<Vec<Waiting>>,
    active: AtomicUsize,
    seq: AtomicU64,
    max_concurrent: usize,
}

/// Grant to run one request; returning it (dropping) frees a slot.
pub struct Permit {
    inner: Arc<QueueInner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The priority request queue. Clones share the same queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    /// Queue capped by a bandwidth profile.
    pub fn new(profile: BandwidthProfile) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                seq: AtomicU64::new(0),
                max_concurrent: profile.max_concurrent.max(1),
            }),
        }
    }

    /// Wait for a slot at the given priority. The permit arrives when the
    /// processor grants one; dropping it frees the slot.
    pub async fn acquire(
        &self,
        priority: RequestPriority,
        token: &CancellationToken,
    ) -> TransportResult<Permit> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            pending.push(Waiting {
                priority,
                seq: self.inner.seq.fetch_add(1, Ordering::SeqCst),
                reply: tx,
            });
        }

        tokio::select! {
            _ = token.cancelled() => Err(TransportError::Cancelled),
            permit = rx => permit.map_err(|_| TransportError::Cancelled),
        }
    }

    /// Requests currently in flight.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Requests waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Start the processor task. It wakes every 100 ms and grants as many
    /// permits as the cap allows, highest priority first.
    pub fn start_processor(&self, token: CancellationToken) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(QUEUE_WAKE_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => drain_queue(&inner),
                }
            }
        })
    }
}

fn drain_queue(inner: &Arc<QueueInner>) {
    loop {
        if inner.active.load(Ordering::SeqCst) >= inner.max_concurrent {
            return;
        }
        let next = {
            let mut pending = inner.pending.lock();
            if pending.is_empty() {
                return;
            }
            // Highest priority first, arrival order within a priority.
            let best = pending
                .iter()
                .enumerate()
                .max_by_key(|(_, w)| (w.priority, std::cmp::Reverse(w.seq)))
                .map(|(i, _)| i);
            match best {
                Some(i) => pending.remove(i),
                None => return,
            }
        };

        inner.active.fetch_add(1, Ordering::SeqCst);
        let permit = Permit {
            inner: Arc::clone(inner),
        };
        if next.reply.send(permit).is_err() {
            // Receiver gave up; the permit's drop released the slot.
            log::debug!("queued request abandoned before its slot was granted");
        }
    }
}
