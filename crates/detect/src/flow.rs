use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::Duration;

use crate::packet::{PacketRecord, Proto, TcpFlags};

/// The 5-tuple identifying a unidirectional flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub proto: Proto,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowKey {
    #[must_use]
    pub fn from_packet(pkt: &PacketRecord) -> Self {
        Self {
            src_ip: pkt.src_ip,
            dst_ip: pkt.dst_ip,
            proto: pkt.proto,
            src_port: pkt.src_port,
            dst_port: pkt.dst_port,
        }
    }
}

/// Aggregated per-flow state with online inter-arrival statistics.
///
/// Invariants maintained by `update`: `last_seen >= first_seen`,
/// `packets >= 1`, `bytes >= packets` (size floor of one byte per packet).
#[derive(Debug, Clone)]
pub struct Flow {
    pub packets: u64,
    pub bytes: u64,
    pub first_seen: f64,
    pub last_seen: f64,
    /// Number of inter-arrival samples (`packets - 1`).
    pub iat_count: u64,
    /// Welford running mean of inter-arrival times.
    pub iat_mean: f64,
    /// Welford running sum of squared deviations.
    pub iat_m2: f64,
    pub iat_min: f64,
    pub iat_max: f64,
    /// Union of TCP flags seen.
    pub flags: TcpFlags,
    /// Set when the flow has changed since its last emission for scoring.
    pub dirty: bool,
}

impl Flow {
    #[must_use]
    pub fn from_packet(pkt: &PacketRecord) -> Self {
        Self {
            packets: 1,
            bytes: pkt.size.max(1),
            first_seen: pkt.ts,
            last_seen: pkt.ts,
            iat_count: 0,
            iat_mean: 0.0,
            iat_m2: 0.0,
            iat_min: 0.0,
            iat_max: 0.0,
            flags: pkt.flags,
            dirty: true,
        }
    }

    /// Fold one more packet into the flow.
    pub fn update(&mut self, pkt: &PacketRecord) {
        // Out-of-order capture timestamps clamp to zero inter-arrival rather
        // than producing negative samples.
        let iat = (pkt.ts - self.last_seen).max(0.0);
        if self.iat_count == 0 {
            self.iat_min = iat;
            self.iat_max = iat;
        } else {
            self.iat_min = self.iat_min.min(iat);
            self.iat_max = self.iat_max.max(iat);
        }

        // Welford's online update.
        self.iat_count += 1;
        let delta = iat - self.iat_mean;
        self.iat_mean += delta / self.iat_count as f64;
        self.iat_m2 += delta * (iat - self.iat_mean);

        self.packets += 1;
        self.bytes += pkt.size.max(1);
        self.last_seen = self.last_seen.max(pkt.ts);
        self.flags = self.flags.union(pkt.flags);
        self.dirty = true;
    }

    /// Sample standard deviation of inter-arrival times; 0 with fewer than
    /// two samples.
    #[must_use]
    pub fn iat_std(&self) -> f64 {
        if self.iat_count < 2 {
            0.0
        } else {
            (self.iat_m2 / (self.iat_count - 1) as f64).sqrt()
        }
    }
}

/// Flow table owned by the single ingest worker.
///
/// Tracks recency with a monotonic touch counter and a `BTreeMap` index so
/// both LRU eviction and idle sweeps are `O(log n)` per operation.
pub struct FlowTable {
    max_flows: usize,
    idle_timeout: Duration,
    flows: HashMap<FlowKey, (Flow, u64)>,
    /// touch counter -> key, oldest first.
    recency: BTreeMap<u64, FlowKey>,
    next_touch: u64,
}

impl FlowTable {
    #[must_use]
    pub fn new(max_flows: usize, idle_timeout: Duration) -> Self {
        Self {
            max_flows: max_flows.max(1),
            idle_timeout,
            flows: HashMap::new(),
            recency: BTreeMap::new(),
            next_touch: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Fold a packet in. When the table is full and the packet opens a new
    /// flow, the least-recently-seen flow is evicted and returned so the
    /// caller can emit it for scoring.
    pub fn upsert(&mut self, pkt: &PacketRecord) -> Option<(FlowKey, Flow)> {
        let key = FlowKey::from_packet(pkt);
        let touch = self.next_touch;
        self.next_touch += 1;

        if let Some((flow, old_touch)) = self.flows.get_mut(&key) {
            flow.update(pkt);
            self.recency.remove(old_touch);
            *old_touch = touch;
            self.recency.insert(touch, key);
            return None;
        }

        let evicted = if self.flows.len() >= self.max_flows {
            self.evict_lru()
        } else {
            None
        };

        self.flows.insert(key.clone(), (Flow::from_packet(pkt), touch));
        self.recency.insert(touch, key);
        evicted
    }

    fn evict_lru(&mut self) -> Option<(FlowKey, Flow)> {
        let (&touch, _) = self.recency.iter().next()?;
        let key = self.recency.remove(&touch)?;
        let (flow, _) = self.flows.remove(&key)?;
        Some((key, flow))
    }

    /// Evict every flow idle past the timeout, judged against `now`
    /// (event-time watermark, Unix seconds). Returns the evicted flows.
    pub fn sweep_idle(&mut self, now: f64) -> Vec<(FlowKey, Flow)> {
        let cutoff = now - self.idle_timeout.as_secs_f64();
        let mut evicted = Vec::new();
        // Recency order correlates with last_seen, so the first live flow
        // ends the walk.
        loop {
            let Some((touch, key)) = self
                .recency
                .iter()
                .next()
                .map(|(t, k)| (*t, k.clone()))
            else {
                break;
            };
            let Some((flow, _)) = self.flows.get(&key) else {
                self.recency.remove(&touch);
                continue;
            };
            if flow.last_seen < cutoff {
                self.recency.remove(&touch);
                if let Some((flow, _)) = self.flows.remove(&key) {
                    evicted.push((key, flow));
                }
            } else {
                break;
            }
        }
        evicted
    }

    /// Snapshot all flows changed since their last emission, clearing the
    /// dirty flag. Used by the periodic flush that bounds detection latency.
    pub fn take_dirty(&mut self) -> Vec<(FlowKey, Flow)> {
        let mut out = Vec::new();
        for (key, (flow, _)) in &mut self.flows {
            if flow.dirty {
                flow.dirty = false;
                out.push((key.clone(), flow.clone()));
            }
        }
        out
    }

    /// Drain every remaining flow (end of stream).
    pub fn drain_all(&mut self) -> Vec<(FlowKey, Flow)> {
        self.recency.clear();
        self.flows.drain().map(|(k, (f, _))| (k, f)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(ts: f64, src_port: u16, size: u64) -> PacketRecord {
        PacketRecord {
            ts,
            src_ip: "192.0.2.1".parse().unwrap(),
            dst_ip: "10.0.0.5".parse().unwrap(),
            proto: Proto::Tcp,
            src_port,
            dst_port: 443,
            size,
            flags: TcpFlags(TcpFlags::ACK),
        }
    }

    #[test]
    fn welford_stats_match_direct_computation() {
        let mut flow = Flow::from_packet(&pkt(100.0, 1, 500));
        // Arrivals at +1.0, +3.0, +6.0 -> iats 1.0, 2.0, 3.0.
        flow.update(&pkt(101.0, 1, 500));
        flow.update(&pkt(103.0, 1, 500));
        flow.update(&pkt(106.0, 1, 500));

        assert_eq!(flow.packets, 4);
        assert_eq!(flow.bytes, 2000);
        assert!((flow.iat_mean - 2.0).abs() < 1e-9);
        assert!((flow.iat_std() - 1.0).abs() < 1e-9);
        assert!((flow.iat_min - 1.0).abs() < 1e-9);
        assert!((flow.iat_max - 3.0).abs() < 1e-9);
    }

    #[test]
    fn single_packet_flow_has_zero_iat_stats() {
        let flow = Flow::from_packet(&pkt(100.0, 1, 60));
        assert_eq!(flow.packets, 1);
        assert!(flow.iat_mean.abs() < f64::EPSILON);
        assert!(flow.iat_std().abs() < f64::EPSILON);
    }

    #[test]
    fn invariants_hold_with_out_of_order_and_tiny_packets() {
        let mut flow = Flow::from_packet(&pkt(100.0, 1, 1));
        flow.update(&pkt(99.5, 1, 1)); // out of order
        assert!(flow.last_seen >= flow.first_seen);
        assert!(flow.bytes >= flow.packets);
    }

    #[test]
    fn lru_eviction_when_full() {
        let mut table = FlowTable::new(2, Duration::from_secs(30));
        assert!(table.upsert(&pkt(1.0, 1000, 60)).is_none());
        assert!(table.upsert(&pkt(2.0, 1001, 60)).is_none());
        // Touch the first flow so the second becomes LRU.
        assert!(table.upsert(&pkt(3.0, 1000, 60)).is_none());

        let evicted = table.upsert(&pkt(4.0, 1002, 60));
        let (key, _) = evicted.expect("table at capacity must evict");
        assert_eq!(key.src_port, 1001);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn idle_sweep_evicts_only_stale_flows() {
        let mut table = FlowTable::new(100, Duration::from_secs(30));
        table.upsert(&pkt(0.0, 1000, 60));
        table.upsert(&pkt(25.0, 1001, 60));

        let evicted = table.sweep_idle(40.0);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0.src_port, 1000);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn take_dirty_clears_flag() {
        let mut table = FlowTable::new(100, Duration::from_secs(30));
        table.upsert(&pkt(1.0, 1000, 60));
        assert_eq!(table.take_dirty().len(), 1);
        assert!(table.take_dirty().is_empty(), "flag cleared after snapshot");
        table.upsert(&pkt(2.0, 1000, 60));
        assert_eq!(table.take_dirty().len(), 1, "update re-dirties");
    }
}
