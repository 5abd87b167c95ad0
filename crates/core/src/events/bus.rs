use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use tokio::{sync::mpsc, time::Instant};
use tracing::trace;
use uuid::Uuid;

use crate::events::{EnrichedEvent, Event};

pub struct BusConfig {
    pub session_id: Uuid,
}

#[derive(Default)]
pub struct BusMetrics {
    pub published_total: AtomicU64,
    pub forwarded_total: AtomicU64,
    pub suppressed_total: AtomicU64,
}

impl BusMetrics {
    pub fn record_suppressed(&self, event_type: &'static str) {
        let total = self.suppressed_total.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(event_type, total, "event suppressed at boundary");
    }
}

/// Per-job event log.
///
/// `publish` records every event on the internal transcript. Only events that
/// an [`OutputFilter`](crate::stages::OutputFilter) admits are passed to
/// `forward`, which appends them to the external transcript and hands them to
/// the response channel if one is attached.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

pub struct EventBusInner {
    session_id: Uuid,
    next_ingest_seq: AtomicU64,
    internal: Mutex<Vec<Arc<EnrichedEvent>>>,
    external: Mutex<Vec<Arc<EnrichedEvent>>>,
    response_tx: Option<mpsc::UnboundedSender<Arc<EnrichedEvent>>>,
    metrics: BusMetrics,
}

impl EventBus {
    pub fn new(cfg: BusConfig) -> Self {
        Self::build(cfg, None)
    }

    /// Bus whose forwarded events are also streamed to the returned receiver.
    pub fn with_response_channel(
        cfg: BusConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Arc<EnrichedEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(cfg, Some(tx)), rx)
    }

    fn build(cfg: BusConfig, response_tx: Option<mpsc::UnboundedSender<Arc<EnrichedEvent>>>) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                session_id: cfg.session_id,
                next_ingest_seq: AtomicU64::new(0),
                internal: Mutex::new(Vec::new()),
                external: Mutex::new(Vec::new()),
                response_tx,
                metrics: BusMetrics::default(),
            }),
        }
    }

    pub fn publish(&self, event: Arc<dyn Event>) -> Arc<EnrichedEvent> {
        let ingest_seq = self.inner.next_ingest_seq.fetch_add(1, Ordering::Relaxed);

        let enriched_event = Arc::new(EnrichedEvent {
            event,
            session_id: self.inner.session_id,
            ingest_seq,
            ingested_at: Instant::now(),
        });

        self.inner
            .internal
            .lock()
            .expect("EventBus internal log poisoned")
            .push(Arc::clone(&enriched_event));
        self.inner.metrics.published_total.fetch_add(1, Ordering::Relaxed);

        enriched_event
    }

    pub fn forward(&self, event: &Arc<EnrichedEvent>) {
        self.inner
            .external
            .lock()
            .expect("EventBus external log poisoned")
            .push(Arc::clone(event));
        self.inner.metrics.forwarded_total.fetch_add(1, Ordering::Relaxed);

        if let Some(tx) = &self.inner.response_tx {
            // A dropped receiver only means nobody is listening live.
            let _ = tx.send(Arc::clone(event));
        }
    }

    pub fn suppress(&self, event: &Arc<EnrichedEvent>) {
        self.inner.metrics.record_suppressed(event.event.event_type());
    }

    pub fn internal_transcript(&self) -> Vec<Arc<EnrichedEvent>> {
        self.inner
            .internal
            .lock()
            .expect("EventBus internal log poisoned")
            .clone()
    }

    pub fn external_transcript(&self) -> Vec<Arc<EnrichedEvent>> {
        self.inner
            .external
            .lock()
            .expect("EventBus external log poisoned")
            .clone()
    }

    /// Forwarded events with `ingest_seq >= since`.
    pub fn external_since(&self, since: u64) -> Vec<Arc<EnrichedEvent>> {
        self.external_transcript()
            .into_iter()
            .filter(|e| e.ingest_seq >= since)
            .collect()
    }

    pub fn next_seq(&self) -> u64 {
        self.inner.next_ingest_seq.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.inner.metrics
    }
}
