//! Topic-based pub/sub carrying events between pipeline stages.
//!
//! Two transports implement the [`EventBus`] contract: an in-process
//! [`MemoryBus`] with bounded per-topic queues, and a [`BrokerBus`] that
//! mirrors payloads through a Redis broker and transparently degrades to the
//! memory transport while the broker is unreachable.
//!
//! Delivery is at-least-once within a process and best-effort across
//! processes; subscribers must be idempotent against replays.

pub mod broker;
pub mod bus;
pub mod error;
pub mod memory;
pub mod topic;

pub use broker::BrokerBus;
pub use bus::{BusCounters, EventBus, EventHandler, SubscriptionHandle};
pub use error::BusError;
pub use memory::{MemoryBus, MemoryBusConfig};
pub use topic::Topic;
