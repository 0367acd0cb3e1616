use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::levels::{Severity, SeverityThresholds};
use crate::types::{AlertId, SensorId};

/// An alert emitted by the detection engine for one scored flow.
///
/// Alerts are immutable once emitted; downstream corrections append new
/// records rather than mutating this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Unique, time-ordered alert identifier.
    pub id: AlertId,

    /// When the alert was emitted.
    pub ts: DateTime<Utc>,

    /// Source address of the offending flow.
    pub src_ip: IpAddr,

    /// Destination address of the offending flow.
    pub dst_ip: IpAddr,

    /// Transport protocol of the flow (`tcp`, `udp`, `icmp`, ...).
    pub proto: String,

    /// The feature vector the scorer saw, keyed by feature name.
    pub features: BTreeMap<String, f64>,

    /// Model score in `[0, 1]`.
    pub model_score: f64,

    /// Scorer confidence in `[0, 1]`.
    pub confidence: f64,

    /// Severity bucketed from the model score.
    pub severity: Severity,

    /// Sensor that observed the traffic.
    pub sensor_id: SensorId,
}

impl AlertEvent {
    /// Build an alert from a scored flow, bucketing severity from the score.
    ///
    /// `model_score` and `confidence` are clamped to `[0, 1]`; out-of-range
    /// scorer output is a scorer bug the pipeline tolerates rather than
    /// propagates.
    #[must_use]
    pub fn new(
        src_ip: IpAddr,
        dst_ip: IpAddr,
        proto: impl Into<String>,
        features: BTreeMap<String, f64>,
        model_score: f64,
        confidence: f64,
        thresholds: &SeverityThresholds,
        sensor_id: SensorId,
    ) -> Self {
        let model_score = model_score.clamp(0.0, 1.0);
        Self {
            id: AlertId::generate(),
            ts: Utc::now(),
            src_ip,
            dst_ip,
            proto: proto.into(),
            features,
            model_score,
            confidence: confidence.clamp(0.0, 1.0),
            severity: thresholds.bucket(model_score),
            sensor_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> BTreeMap<String, f64> {
        let mut f = BTreeMap::new();
        f.insert("bytes".to_owned(), 1024.0);
        f.insert("packets".to_owned(), 10.0);
        f
    }

    #[test]
    fn alert_severity_follows_thresholds() {
        let t = SeverityThresholds::default();
        let alert = AlertEvent::new(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            "tcp",
            features(),
            0.85,
            0.85,
            &t,
            SensorId::new("sensor-1"),
        );
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn alert_clamps_out_of_range_scores() {
        let t = SeverityThresholds::default();
        let alert = AlertEvent::new(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            "udp",
            features(),
            1.7,
            -0.2,
            &t,
            SensorId::new("sensor-1"),
        );
        assert!((alert.model_score - 1.0).abs() < f64::EPSILON);
        assert!(alert.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn alert_serde_roundtrip() {
        let t = SeverityThresholds::default();
        let alert = AlertEvent::new(
            "203.0.113.7".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
            "tcp",
            features(),
            0.6,
            0.6,
            &t,
            SensorId::new("edge-1"),
        );
        let json = serde_json::to_string(&alert).unwrap();
        let back: AlertEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, alert.id);
        assert_eq!(back.severity, Severity::Medium);
        assert_eq!(back.src_ip, alert.src_ip);
    }
}
