use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{BusCounters, EventBus, EventHandler, SubscriptionHandle};
use crate::error::BusError;
use crate::memory::{MemoryBus, MemoryBusConfig};
use crate::topic::Topic;

/// Reconnect backoff bounds: 100ms doubling up to 30s.
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
/// How long a single broker operation may take before we degrade.
const BROKER_OP_TIMEOUT: Duration = Duration::from_secs(1);

/// Envelope wrapping every payload on the wire so a process can ignore the
/// echo of its own publishes.
#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope {
    origin: String,
    payload: serde_json::Value,
}

/// Networked transport: payloads are delivered locally through an inner
/// [`MemoryBus`] and mirrored as JSON through a Redis broker so other
/// processes see them.
///
/// While the broker is unreachable the bus transparently degrades to
/// memory-only delivery (WARN logged once per outage) and keeps retrying
/// with exponential backoff. Remote payloads received after a reconnect may
/// replay; subscribers must be idempotent.
pub struct BrokerBus {
    client: redis::Client,
    inner: Arc<MemoryBus>,
    conn: tokio::sync::Mutex<Option<ConnectionManager>>,
    degraded: AtomicBool,
    origin: String,
    listened: Mutex<HashSet<String>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for BrokerBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBus").finish_non_exhaustive()
    }
}

impl BrokerBus {
    /// Create a broker bus from a Redis connection URL.
    ///
    /// The URL is only parsed here; the first connection is established
    /// lazily so a broker outage at startup degrades instead of failing.
    pub fn new(broker_url: &str, config: MemoryBusConfig) -> Result<Self, BusError> {
        let client =
            redis::Client::open(broker_url).map_err(|e| BusError::Broker(e.to_string()))?;
        Ok(Self {
            client,
            inner: Arc::new(MemoryBus::new(config)),
            conn: tokio::sync::Mutex::new(None),
            degraded: AtomicBool::new(false),
            origin: Uuid::new_v4().to_string(),
            listened: Mutex::new(HashSet::new()),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Mirror a payload to the broker; failures flip the bus into degraded
    /// mode instead of propagating.
    async fn mirror_to_broker(&self, topic: &Topic, payload: &serde_json::Value) {
        let envelope = Envelope {
            origin: self.origin.clone(),
            payload: payload.clone(),
        };
        let wire = match serde_json::to_string(&envelope) {
            Ok(w) => w,
            Err(e) => {
                error!(topic = %topic, error = %e, "payload serialization failed, not mirrored");
                return;
            }
        };

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let connect = tokio::time::timeout(
                BROKER_OP_TIMEOUT,
                ConnectionManager::new(self.client.clone()),
            )
            .await;
            match connect {
                Ok(Ok(cm)) => *guard = Some(cm),
                Ok(Err(e)) => {
                    self.enter_degraded(&e.to_string());
                    return;
                }
                Err(_) => {
                    self.enter_degraded("connection attempt timed out");
                    return;
                }
            }
        }

        // Checked above.
        let Some(cm) = guard.as_mut() else { return };
        let publish = tokio::time::timeout(
            BROKER_OP_TIMEOUT,
            cm.publish::<_, _, ()>(topic.as_str(), wire),
        )
        .await;
        match publish {
            Ok(Ok(())) => self.leave_degraded(),
            Ok(Err(e)) => {
                *guard = None;
                self.enter_degraded(&e.to_string());
            }
            Err(_) => {
                *guard = None;
                self.enter_degraded("publish timed out");
            }
        }
    }

    fn enter_degraded(&self, reason: &str) {
        self.inner.counters().record_broker_fallback();
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(reason, "broker unreachable, degrading to in-memory delivery");
        }
    }

    fn leave_degraded(&self) {
        if self.degraded.swap(false, Ordering::AcqRel) {
            info!("broker connection restored");
        }
    }

    /// Whether the broker is currently unreachable.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Spawn the remote-message listener for a topic, once.
    fn ensure_listener(&self, topic: &Topic) {
        {
            let mut listened = self
                .listened
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !listened.insert(topic.as_str().to_owned()) {
                return;
            }
        }

        let client = self.client.clone();
        let topic = topic.clone();
        let origin = self.origin.clone();
        let cancel = self.cancel.clone();
        let local = Arc::clone(&self.inner);
        self.tracker.spawn(async move {
            let mut backoff = BACKOFF_INITIAL;
            loop {
                if cancel.is_cancelled() {
                    return;
                }

                match client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if let Err(e) = pubsub.subscribe(topic.as_str()).await {
                            debug!(topic = %topic, error = %e, "broker subscribe failed");
                        } else {
                            backoff = BACKOFF_INITIAL;
                            let mut stream = pubsub.on_message();
                            loop {
                                let msg = tokio::select! {
                                    m = stream.next() => m,
                                    () = cancel.cancelled() => return,
                                };
                                let Some(msg) = msg else { break };
                                let Ok(wire) = msg.get_payload::<String>() else {
                                    continue;
                                };
                                match serde_json::from_str::<Envelope>(&wire) {
                                    Ok(env) if env.origin != origin => {
                                        if let Err(e) = local.publish(&topic, env.payload).await {
                                            warn!(topic = %topic, error = %e, "remote payload dropped");
                                        }
                                    }
                                    // Echo of our own publish, already
                                    // delivered locally.
                                    Ok(_) => {}
                                    Err(e) => {
                                        warn!(topic = %topic, error = %e, "undecodable broker payload dropped");
                                    }
                                }
                            }
                            warn!(topic = %topic, "broker subscription lost, reconnecting");
                        }
                    }
                    Err(e) => {
                        debug!(topic = %topic, error = %e, "broker connection failed");
                    }
                }

                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    () = cancel.cancelled() => return,
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
        });
    }
}

#[async_trait]
impl EventBus for BrokerBus {
    async fn publish(&self, topic: &Topic, payload: serde_json::Value) -> Result<(), BusError> {
        // Local delivery first: the memory transport is the source of truth
        // for in-process subscribers, broker mirroring is best-effort.
        let local = self.inner.publish(topic, payload.clone()).await;
        self.mirror_to_broker(topic, &payload).await;
        local
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle, BusError> {
        let handle = self.inner.subscribe(topic, handler).await?;
        self.ensure_listener(topic);
        Ok(handle)
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.inner.close().await;
    }

    fn counters(&self) -> &BusCounters {
        self.inner.counters()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;

    struct CountingHandler {
        seen: AtomicU64,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _topic: &Topic, _payload: serde_json::Value) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn unreachable_bus() -> BrokerBus {
        // Port 9 (discard) is never a Redis server; connection fails fast.
        BrokerBus::new("redis://127.0.0.1:9/", MemoryBusConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        assert!(BrokerBus::new("not a url", MemoryBusConfig::default()).is_err());
    }

    #[tokio::test]
    async fn degrades_to_memory_when_broker_unreachable() {
        let bus = unreachable_bus();
        let handler = Arc::new(CountingHandler {
            seen: AtomicU64::new(0),
        });
        bus.subscribe(&Topic::alerts(), Arc::clone(&handler) as Arc<dyn EventHandler>)
            .await
            .unwrap();

        for _ in 0..3 {
            bus.publish(&Topic::alerts(), serde_json::json!({}))
                .await
                .unwrap();
        }

        bus.close().await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 3, "local delivery survives outage");
        assert!(bus.is_degraded());
        assert!(bus.counters().broker_fallbacks() >= 1);
    }
}
