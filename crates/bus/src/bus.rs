use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BusError;
use crate::topic::Topic;

/// A subscriber callback. One handler invocation is in flight per
/// subscription at any time; the bus serializes deliveries.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, topic: &Topic, payload: serde_json::Value);
}

/// Cancellation handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle does NOT cancel the subscription; call
/// [`SubscriptionHandle::cancel`] or close the bus.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Stop delivering payloads to this subscription.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the subscription has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Operational counters shared by both transports.
#[derive(Debug, Default)]
pub struct BusCounters {
    published: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    broker_fallbacks: AtomicU64,
}

impl BusCounters {
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broker_fallback(&self) {
        self.broker_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn broker_fallbacks(&self) -> u64 {
        self.broker_fallbacks.load(Ordering::Relaxed)
    }
}

/// The pub/sub contract glueing the pipeline stages together.
///
/// Ordering is FIFO per (topic, publisher); there is no cross-topic
/// guarantee. `publish` never blocks longer than the transport's publish
/// timeout; on timeout the payload is dropped and the drop counter
/// incremented.
#[async_trait]
pub trait EventBus: Send + Sync + std::fmt::Debug {
    /// Enqueue a payload on a topic.
    async fn publish(&self, topic: &Topic, payload: serde_json::Value) -> Result<(), BusError>;

    /// Register a handler for a topic. Deliveries to the handler are
    /// serialized; a panicking handler is caught and logged and the
    /// subscription continues.
    async fn subscribe(
        &self,
        topic: &Topic,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle, BusError>;

    /// Cancel all subscriptions and drain queued payloads up to the
    /// transport's drain timeout.
    async fn close(&self);

    /// Operational counters for the stats surface.
    fn counters(&self) -> &BusCounters;
}
