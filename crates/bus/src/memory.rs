use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::bus::{BusCounters, EventBus, EventHandler, SubscriptionHandle};
use crate::error::BusError;
use crate::topic::Topic;

/// Tuning knobs for the in-process transport.
#[derive(Debug, Clone)]
pub struct MemoryBusConfig {
    /// Bounded queue depth per topic.
    pub queue_capacity: usize,
    /// How long a publish may block on a full queue before dropping.
    pub publish_timeout: Duration,
    /// How long `close` waits for queued payloads to drain.
    pub drain_timeout: Duration,
}

impl Default for MemoryBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            publish_timeout: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// One registered subscription: its delivery queue and cancellation token.
struct Subscriber {
    sender: mpsc::Sender<serde_json::Value>,
    token: CancellationToken,
}

/// Per-topic state: the bounded ingress queue and the live subscriber list.
struct TopicState {
    sender: mpsc::Sender<serde_json::Value>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

/// In-process bus: bounded queue per topic, one dispatcher task per topic,
/// one delivery worker per subscription.
///
/// Publishing blocks up to [`MemoryBusConfig::publish_timeout`] when the
/// topic queue is full, then drops the payload and increments the drop
/// counter. Handler invocations are serialized per subscription; a handler
/// panic is caught and logged and delivery continues.
pub struct MemoryBus {
    config: MemoryBusConfig,
    topics: Mutex<HashMap<String, TopicState>>,
    tracker: TaskTracker,
    hard_cancel: CancellationToken,
    closed: AtomicBool,
    counters: Arc<BusCounters>,
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus").finish_non_exhaustive()
    }
}

impl MemoryBus {
    #[must_use]
    pub fn new(config: MemoryBusConfig) -> Self {
        Self {
            config,
            topics: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            hard_cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            counters: Arc::new(BusCounters::default()),
        }
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, TopicState>> {
        // A poisoned lock means a panic while holding it; the map itself is
        // still structurally sound, so keep going with the inner value.
        self.topics.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Get or lazily create the queue + dispatcher for a topic.
    fn topic_sender(
        &self,
        topic: &Topic,
    ) -> (mpsc::Sender<serde_json::Value>, Arc<Mutex<Vec<Subscriber>>>) {
        let mut topics = self.lock_topics();
        let state = topics.entry(topic.as_str().to_owned()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.config.queue_capacity);
            let subscribers: Arc<Mutex<Vec<Subscriber>>> = Arc::new(Mutex::new(Vec::new()));
            self.tracker.spawn(dispatch_loop(
                topic.clone(),
                rx,
                Arc::clone(&subscribers),
                self.hard_cancel.clone(),
            ));
            TopicState {
                sender: tx,
                subscribers,
            }
        });
        (state.sender.clone(), Arc::clone(&state.subscribers))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(MemoryBusConfig::default())
    }
}

/// Forward payloads from the topic queue to every live subscription queue.
async fn dispatch_loop(
    topic: Topic,
    mut rx: mpsc::Receiver<serde_json::Value>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    hard_cancel: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            p = rx.recv() => match p {
                Some(p) => p,
                // All senders dropped: the bus is closing and the queue has
                // drained.
                None => break,
            },
            () = hard_cancel.cancelled() => break,
        };

        // Snapshot live subscriber queues, pruning cancelled ones.
        let targets: Vec<mpsc::Sender<serde_json::Value>> = {
            let mut subs = subscribers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            subs.retain(|s| !s.token.is_cancelled());
            subs.iter().map(|s| s.sender.clone()).collect()
        };

        for target in targets {
            // Applies backpressure to the topic queue when a subscriber lags.
            if target.send(payload.clone()).await.is_err() {
                debug!(topic = %topic, "subscriber queue closed, skipping");
            }
        }
    }
}

/// Deliver payloads to one handler, one at a time, isolating panics.
async fn delivery_loop(
    topic: Topic,
    mut rx: mpsc::Receiver<serde_json::Value>,
    handler: Arc<dyn EventHandler>,
    token: CancellationToken,
    counters: Arc<BusCounters>,
) {
    loop {
        let payload = tokio::select! {
            p = rx.recv() => match p {
                Some(p) => p,
                None => break,
            },
            () = token.cancelled() => break,
        };

        let h = Arc::clone(&handler);
        let t = topic.clone();
        // Spawn so a panicking handler surfaces as a join error instead of
        // tearing down the delivery worker.
        let mut join = tokio::spawn(async move { h.handle(&t, payload).await });
        let result = tokio::select! {
            r = &mut join => r,
            () = token.cancelled() => {
                join.abort();
                let _ = join.await;
                break;
            }
        };
        match result {
            Ok(()) => counters.record_delivered(),
            Err(e) if e.is_panic() => {
                error!(topic = %topic, "subscriber handler panicked, subscription continues");
            }
            Err(_) => break,
        }
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &Topic, payload: serde_json::Value) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let (sender, _) = self.topic_sender(topic);
        match sender
            .send_timeout(payload, self.config.publish_timeout)
            .await
        {
            Ok(()) => {
                self.counters.record_published();
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                self.counters.record_dropped();
                warn!(topic = %topic, "topic queue full, payload dropped");
                Err(BusError::PublishTimeout {
                    topic: topic.as_str().to_owned(),
                    timeout_ms: u64::try_from(self.config.publish_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(BusError::Closed),
        }
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let (_, subscribers) = self.topic_sender(topic);
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let token = self.hard_cancel.child_token();

        {
            let mut subs = subscribers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            subs.push(Subscriber {
                sender: tx,
                token: token.clone(),
            });
        }

        self.tracker.spawn(delivery_loop(
            topic.clone(),
            rx,
            handler,
            token.clone(),
            Arc::clone(&self.counters),
        ));

        Ok(SubscriptionHandle::new(token))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the topic senders lets each dispatcher drain its queue and
        // exit naturally; delivery workers follow when their queues close.
        self.lock_topics().clear();
        self.tracker.close();

        if tokio::time::timeout(self.config.drain_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!("drain timeout elapsed, aborting in-flight deliveries");
            self.hard_cancel.cancel();
            self.tracker.wait().await;
        }
    }

    fn counters(&self) -> &BusCounters {
        self.counters.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use super::*;

    struct CountingHandler {
        seen: AtomicU64,
        in_flight: AtomicU64,
        max_in_flight: AtomicU64,
    }

    impl CountingHandler {
        fn new() -> Self {
            Self {
                seen: AtomicU64::new(0),
                in_flight: AtomicU64::new(0),
                max_in_flight: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _topic: &Topic, _payload: serde_json::Value) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingHandler {
        calls: AtomicU64,
    }

    #[async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _topic: &Topic, payload: serde_json::Value) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if payload["boom"].as_bool() == Some(true) {
                panic!("handler exploded");
            }
        }
    }

    #[tokio::test]
    async fn publish_then_subscribe_delivery() {
        let bus = MemoryBus::default();
        let handler = Arc::new(CountingHandler::new());
        bus.subscribe(&Topic::alerts(), Arc::clone(&handler) as Arc<dyn EventHandler>)
            .await
            .unwrap();

        for i in 0..10 {
            bus.publish(&Topic::alerts(), serde_json::json!({ "i": i }))
                .await
                .unwrap();
        }

        bus.close().await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 10);
        assert_eq!(bus.counters().published(), 10);
        assert_eq!(bus.counters().delivered(), 10);
    }

    #[tokio::test]
    async fn handler_invocations_are_serialized() {
        let bus = MemoryBus::default();
        let handler = Arc::new(CountingHandler::new());
        bus.subscribe(&Topic::alerts(), Arc::clone(&handler) as Arc<dyn EventHandler>)
            .await
            .unwrap();

        for _ in 0..20 {
            bus.publish(&Topic::alerts(), serde_json::json!({}))
                .await
                .unwrap();
        }

        bus.close().await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 20);
        assert_eq!(
            handler.max_in_flight.load(Ordering::SeqCst),
            1,
            "at most one handler invocation in flight"
        );
    }

    #[tokio::test]
    async fn full_queue_drops_after_timeout() {
        let bus = MemoryBus::new(MemoryBusConfig {
            queue_capacity: 1,
            publish_timeout: Duration::from_millis(10),
            drain_timeout: Duration::from_millis(200),
        });
        // No subscribers: the dispatcher empties the queue, so saturate it by
        // publishing into a topic whose dispatcher is busy. A capacity-1
        // queue with a slow consumer drops quickly.
        struct Slow;
        #[async_trait]
        impl EventHandler for Slow {
            async fn handle(&self, _t: &Topic, _p: serde_json::Value) {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        }
        bus.subscribe(&Topic::alerts(), Arc::new(Slow)).await.unwrap();

        let mut dropped = 0;
        for _ in 0..8 {
            if bus
                .publish(&Topic::alerts(), serde_json::json!({}))
                .await
                .is_err()
            {
                dropped += 1;
            }
        }
        assert!(dropped > 0, "a saturated queue must eventually drop");
        assert_eq!(bus.counters().dropped(), dropped);
    }

    #[tokio::test]
    async fn handler_panic_does_not_kill_subscription() {
        let bus = MemoryBus::default();
        let handler = Arc::new(PanickingHandler {
            calls: AtomicU64::new(0),
        });
        bus.subscribe(&Topic::alerts(), Arc::clone(&handler) as Arc<dyn EventHandler>)
            .await
            .unwrap();

        bus.publish(&Topic::alerts(), serde_json::json!({ "boom": true }))
            .await
            .unwrap();
        bus.publish(&Topic::alerts(), serde_json::json!({ "boom": false }))
            .await
            .unwrap();

        bus.close().await;
        assert_eq!(
            handler.calls.load(Ordering::SeqCst),
            2,
            "delivery continues after a panic"
        );
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_receiving() {
        let bus = MemoryBus::default();
        let handler = Arc::new(CountingHandler::new());
        let sub = bus
            .subscribe(&Topic::alerts(), Arc::clone(&handler) as Arc<dyn EventHandler>)
            .await
            .unwrap();

        bus.publish(&Topic::alerts(), serde_json::json!({}))
            .await
            .unwrap();
        // Allow delivery before cancelling.
        tokio::time::sleep(Duration::from_millis(50)).await;
        sub.cancel();
        assert!(sub.is_cancelled());

        bus.publish(&Topic::alerts(), serde_json::json!({}))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        bus.close().await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_bus_rejects_publish() {
        let bus = MemoryBus::default();
        bus.close().await;
        let err = bus
            .publish(&Topic::alerts(), serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Closed));
    }

    #[tokio::test]
    async fn independent_topics_do_not_interfere() {
        let bus = MemoryBus::default();
        let alerts = Arc::new(CountingHandler::new());
        let actions = Arc::new(CountingHandler::new());
        bus.subscribe(&Topic::alerts(), Arc::clone(&alerts) as Arc<dyn EventHandler>)
            .await
            .unwrap();
        bus.subscribe(&Topic::actions(), Arc::clone(&actions) as Arc<dyn EventHandler>)
            .await
            .unwrap();

        bus.publish(&Topic::alerts(), serde_json::json!({}))
            .await
            .unwrap();
        bus.publish(&Topic::alerts(), serde_json::json!({}))
            .await
            .unwrap();
        bus.publish(&Topic::actions(), serde_json::json!({}))
            .await
            .unwrap();

        bus.close().await;
        assert_eq!(alerts.seen.load(Ordering::SeqCst), 2);
        assert_eq!(actions.seen.load(Ordering::SeqCst), 1);
    }
}
