use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::flow::{Flow, FlowKey};
use crate::packet::Proto;

/// Fixed feature order, set at startup. Changing it requires retraining any
/// fitted scorer, so it is a constant rather than configuration.
pub const FEATURE_NAMES: [&str; 10] = [
    "bytes",
    "packets",
    "iat_mean",
    "iat_std",
    "iat_min",
    "iat_max",
    "proto_tcp",
    "proto_udp",
    "proto_icmp",
    "proto_other",
];

/// A fixed-length feature vector extracted from one flow snapshot.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub key: FlowKey,
    pub values: [f64; FEATURE_NAMES.len()],
}

impl FeatureVector {
    #[must_use]
    pub fn from_flow(key: FlowKey, flow: &Flow) -> Self {
        let proto_onehot = |p: Proto| if key.proto == p { 1.0 } else { 0.0 };
        let values = [
            flow.bytes as f64,
            flow.packets as f64,
            flow.iat_mean,
            flow.iat_std(),
            flow.iat_min,
            flow.iat_max,
            proto_onehot(Proto::Tcp),
            proto_onehot(Proto::Udp),
            proto_onehot(Proto::Icmp),
            proto_onehot(Proto::Other),
        ];
        Self { key, values }
    }

    /// Named view of the vector, carried on the emitted alert.
    #[must_use]
    pub fn named(&self) -> BTreeMap<String, f64> {
        FEATURE_NAMES
            .iter()
            .zip(self.values.iter())
            .map(|(name, v)| ((*name).to_owned(), *v))
            .collect()
    }
}

/// A pre-fitted per-feature min/max scaler, optionally attached to a
/// trained scorer. The heuristic scorer does its own normalization and
/// ignores this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
}

impl FeatureScaler {
    /// Scale a vector in place to `[0, 1]` per feature. Degenerate features
    /// (min == max) scale to 0.
    pub fn apply(&self, values: &mut [f64]) {
        for (i, v) in values.iter_mut().enumerate() {
            let (min, max) = (
                self.mins.get(i).copied().unwrap_or(0.0),
                self.maxs.get(i).copied().unwrap_or(1.0),
            );
            let range = max - min;
            *v = if range > 0.0 {
                ((*v - min) / range).clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::packet::{PacketRecord, TcpFlags};

    use super::*;

    fn flow_and_key() -> (FlowKey, Flow) {
        let pkt = PacketRecord {
            ts: 100.0,
            src_ip: "192.0.2.1".parse().unwrap(),
            dst_ip: "10.0.0.5".parse().unwrap(),
            proto: Proto::Udp,
            src_port: 53,
            dst_port: 53,
            size: 512,
            flags: TcpFlags::default(),
        };
        (FlowKey::from_packet(&pkt), Flow::from_packet(&pkt))
    }

    #[test]
    fn vector_order_matches_names() {
        let (key, flow) = flow_and_key();
        let fv = FeatureVector::from_flow(key, &flow);
        let named = fv.named();
        assert_eq!(named["bytes"], 512.0);
        assert_eq!(named["packets"], 1.0);
        assert_eq!(named["proto_udp"], 1.0);
        assert_eq!(named["proto_tcp"], 0.0);
        assert_eq!(named.len(), FEATURE_NAMES.len());
    }

    #[test]
    fn single_packet_vector_is_well_defined() {
        let (key, flow) = flow_and_key();
        let fv = FeatureVector::from_flow(key, &flow);
        assert_eq!(fv.values[2], 0.0, "iat_mean");
        assert_eq!(fv.values[3], 0.0, "iat_std");
    }

    #[test]
    fn scaler_clamps_and_handles_degenerate_ranges() {
        let scaler = FeatureScaler {
            mins: vec![0.0, 5.0],
            maxs: vec![10.0, 5.0],
        };
        let mut values = vec![15.0, 7.0];
        scaler.apply(&mut values);
        assert_eq!(values[0], 1.0, "clamped above max");
        assert_eq!(values[1], 0.0, "degenerate range scales to 0");
    }
}
