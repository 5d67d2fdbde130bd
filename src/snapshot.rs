// src/snapshot.rs
//
// The serializable state snapshot handed to consumers (dashboard transport,
// overlay rendering). This is the only contract the outside world gets;
// internal structures never cross the boundary directly.

use crate::analysis::incidents::{Alert, IncidentRecord};
use crate::analysis::lanes::LaneStats;
use crate::analysis::signals::{LaneSignal, SignalState};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub timestamp: f64,
    pub metrics: TrafficMetrics,
    pub alerts: Vec<AlertView>,
    pub signals: SignalMetrics,
    pub chart: ChartData,
    pub incidents: Vec<IncidentRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficMetrics {
    pub fps: f64,
    pub total_vehicles: usize,
    pub total_persons: usize,
    pub ambulance_active: bool,
    pub avg_wait_secs: f64,
    pub vehicle_types: BTreeMap<String, usize>,
    pub session_uptime_secs: f64,
    pub peak_vehicles: usize,
    pub total_accidents: u64,
    pub total_emergency: u64,
    pub total_alerts: usize,
    pub lanes: Vec<LaneBreakdown>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaneBreakdown {
    pub name: String,
    pub vehicles: usize,
    pub density: f32,
    pub queue: usize,
    pub avg_wait: f64,
    pub congestion: String,
    pub ambulance: bool,
}

impl From<&LaneStats> for LaneBreakdown {
    fn from(s: &LaneStats) -> Self {
        Self {
            name: s.name.clone(),
            vehicles: s.vehicle_count,
            density: s.density_ratio,
            queue: s.queue_length,
            avg_wait: s.avg_wait_time,
            congestion: s.congestion_level().to_string(),
            ambulance: s.ambulance_present,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertView {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub lane: Option<String>,
    pub severity: String,
    pub timestamp: f64,
    pub age: f64,
}

impl AlertView {
    pub fn from_alert(alert: &Alert, now: f64) -> Self {
        Self {
            kind: alert.kind.as_str().to_string(),
            message: alert.message.clone(),
            lane: alert.lane.clone(),
            severity: alert.severity.as_str().to_string(),
            timestamp: alert.timestamp,
            age: (alert.age(now) * 10.0).round() / 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalMetrics {
    pub signals: Vec<SignalView>,
    pub active_lane: String,
    pub total_cycles: u64,
    pub emergency_active: bool,
    pub emergency_lane: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalView {
    pub name: String,
    pub state: SignalState,
    pub time_left: f64,
    pub last_green: f64,
}

impl From<&LaneSignal> for SignalView {
    fn from(sig: &LaneSignal) -> Self {
        Self {
            name: sig.name.clone(),
            state: sig.state,
            time_left: (sig.time_left * 10.0).round() / 10.0,
            last_green: sig.last_green,
        }
    }
}

/// Time-series payload for the dashboard chart: relative ages (seconds ago)
/// aligned with one vehicle-count series per lane.
#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub labels: Vec<f64>,
    pub series: Vec<LaneSeries>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaneSeries {
    pub name: String,
    pub counts: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::incidents::{AlertKind, Severity};

    #[test]
    fn test_alert_view_serializes_with_type_field() {
        let alert = Alert {
            kind: AlertKind::Ambulance,
            message: "Ambulance detected in North lane".to_string(),
            lane: Some("North".to_string()),
            severity: Severity::Critical,
            timestamp: 10.0,
        };
        let view = AlertView::from_alert(&alert, 12.5);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["type"], "ambulance");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["age"], 2.5);
    }

    #[test]
    fn test_lane_breakdown_from_stats() {
        let stats = LaneStats {
            name: "East".to_string(),
            vehicle_count: 9,
            density_ratio: 0.4,
            queue_length: 3,
            avg_wait_time: 7.5,
            ..LaneStats::default()
        };
        let breakdown: LaneBreakdown = (&stats).into();
        assert_eq!(breakdown.congestion, "heavy");
        assert_eq!(breakdown.vehicles, 9);
        let json = serde_json::to_string(&breakdown).unwrap();
        assert!(json.contains("\"congestion\":\"heavy\""));
    }
}
