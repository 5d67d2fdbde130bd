// src/analysis/incidents.rs
//
// Rule-based incident detection and the alert system.
//
// Accident heuristics run in a fixed priority order and at most one
// accident alert is emitted per tick:
//   1. Two-phase collision confirmation. Overlapping or near-touching
//      vehicle pairs become pending candidates; a candidate confirms only
//      after the involved vehicles stay stopped long enough. Pairs that
//      never stop expire as false positives.
//   2. Scene: a stopped vehicle surrounded by several pedestrians.
//   3. Stall: a vehicle stopped well past normal queueing time.
//   4. Pedestrian directly next to a moving vehicle (no confirmation delay).
//
// Ambulance and congestion alerts are independent of the accident path.
// All lists are bounded and age-trimmed; nothing grows without limit.

use crate::analysis::lanes::LaneStats;
use crate::analysis::tracker::Track;
use crate::snapshot::{ChartData, LaneSeries, TrafficMetrics};
use crate::types::{Detection, IncidentConfig};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Edge gap below which two boxes count as touching
const COLLISION_EDGE_GAP_PX: f32 = 30.0;
/// Centroid distance bound paired with the edge-gap test
const COLLISION_CENTROID_PX: f32 = 100.0;
/// Persistence multiplier for the one-vehicle-stopped confirmation path
const SINGLE_STOP_CONFIRM_FACTOR: f64 = 1.5;
/// Radius for counting pedestrians around a stopped vehicle
const SCENE_PERSON_RADIUS_PX: f32 = 150.0;
const SCENE_MIN_PERSONS: usize = 2;
/// Per-axis distance for the immediate pedestrian-proximity alert
const PEDESTRIAN_PROXIMITY_PX: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Ambulance,
    Accident,
    Congestion,
    Crowd,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ambulance => "ambulance",
            Self::Accident => "accident",
            Self::Congestion => "congestion",
            Self::Crowd => "crowd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub lane: Option<String>,
    pub severity: Severity,
    pub timestamp: f64,
}

impl Alert {
    pub fn age(&self, now: f64) -> f64 {
        (now - self.timestamp).max(0.0)
    }
}

/// Noteworthy moments kept for the dashboard incident feed, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentRecord {
    pub kind: String,
    pub description: String,
    pub lane: Option<String>,
    pub timestamp: f64,
}

/// Pending confirmation entries, keyed so a candidate is tracked once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PendingKey {
    /// Ordered pair of track ids (low, high)
    Pair(u64, u64),
    /// Single stopped vehicle, scene heuristic
    Scene(u64),
    /// Single stopped vehicle, stall heuristic
    Stall(u64),
}

#[derive(Debug, Clone)]
struct Pending {
    first_seen: f64,
    lane: Option<String>,
}

pub struct IncidentAnalyzer {
    config: IncidentConfig,
    lane_names: Vec<String>,

    alerts: Vec<Alert>,
    pendings: BTreeMap<PendingKey, Pending>,
    last_congestion: HashMap<String, f64>,
    last_crowd: f64,

    count_history: VecDeque<(f64, Vec<usize>)>,
    incidents: VecDeque<IncidentRecord>,
    last_incident: f64,

    // Session counters
    session_start: f64,
    peak_vehicles: usize,
    total_accidents: u64,
    total_emergency: u64,

    // Tick-rate estimation
    fps_ticks: u32,
    fps_window_start: f64,
    current_fps: f64,

    latest_metrics: Option<TrafficMetrics>,
}

impl IncidentAnalyzer {
    pub fn new(config: IncidentConfig, lane_names: Vec<String>, now: f64) -> Self {
        Self {
            config,
            lane_names,
            alerts: Vec::new(),
            pendings: BTreeMap::new(),
            last_congestion: HashMap::new(),
            last_crowd: f64::NEG_INFINITY,
            count_history: VecDeque::new(),
            incidents: VecDeque::new(),
            last_incident: f64::NEG_INFINITY,
            session_start: now,
            peak_vehicles: 0,
            total_accidents: 0,
            total_emergency: 0,
            fps_ticks: 0,
            fps_window_start: now,
            current_fps: 0.0,
            latest_metrics: None,
        }
    }

    /// Main analysis tick. Returns the alerts generated this tick; the full
    /// maintained alert list is available via `alerts()`.
    pub fn update(
        &mut self,
        tracks: &[Track],
        lane_stats: &[LaneStats],
        detections: &[Detection],
        now: f64,
    ) -> Vec<Alert> {
        let mut new_alerts: Vec<Alert> = Vec::new();

        self.tick_fps(now);

        let vehicle_tracks: Vec<&Track> = tracks.iter().filter(|t| t.is_vehicle).collect();
        self.peak_vehicles = self.peak_vehicles.max(vehicle_tracks.len());

        // Ambulance alerts: one while no unexpired ambulance alert exists.
        for track in tracks.iter().filter(|t| t.is_ambulance) {
            let already = self
                .alerts
                .iter()
                .chain(new_alerts.iter())
                .any(|a| a.kind == AlertKind::Ambulance && a.age(now) < self.config.alert_expiry_secs);
            if !already {
                info!(
                    "ambulance T{} detected in {} lane",
                    track.id,
                    track.lane.as_deref().unwrap_or("unknown")
                );
                new_alerts.push(Alert {
                    kind: AlertKind::Ambulance,
                    message: format!(
                        "Ambulance detected in {} lane",
                        track.lane.as_deref().unwrap_or("unknown")
                    ),
                    lane: track.lane.clone(),
                    severity: Severity::Critical,
                    timestamp: now,
                });
                self.total_emergency += 1;
            }
        }

        // Accident heuristics, one alert per tick, priority order.
        if let Some(alert) = self.check_accidents(&vehicle_tracks, detections, now) {
            if alert.severity == Severity::Critical {
                self.total_accidents += 1;
            }
            new_alerts.push(alert);
        }

        // Congestion, rate-limited per lane.
        for stats in lane_stats {
            if stats.vehicle_count > self.config.congestion_vehicle_threshold {
                let last = self
                    .last_congestion
                    .get(&stats.name)
                    .copied()
                    .unwrap_or(f64::NEG_INFINITY);
                if now - last >= self.config.congestion_interval_secs {
                    self.last_congestion.insert(stats.name.clone(), now);
                    new_alerts.push(Alert {
                        kind: AlertKind::Congestion,
                        message: format!(
                            "Heavy congestion in {} lane ({} vehicles)",
                            stats.name, stats.vehicle_count
                        ),
                        lane: Some(stats.name.clone()),
                        severity: Severity::Medium,
                        timestamp: now,
                    });
                }
            }
        }

        // Crowd advisory, rate-limited like congestion.
        let person_count = tracks.iter().filter(|t| t.is_person).count();
        if person_count > self.config.crowd_person_threshold
            && now - self.last_crowd >= self.config.congestion_interval_secs
        {
            self.last_crowd = now;
            new_alerts.push(Alert {
                kind: AlertKind::Crowd,
                message: format!("Large crowd of {person_count} pedestrians crossing"),
                lane: None,
                severity: Severity::Low,
                timestamp: now,
            });
        }

        self.capture_incident(&new_alerts, lane_stats, now);

        // Alert list maintenance: expire, append, cap oldest-first.
        self.alerts.retain(|a| a.age(now) < self.config.alert_expiry_secs);
        self.alerts.extend(new_alerts.iter().cloned());
        if self.alerts.len() > self.config.max_alerts {
            let excess = self.alerts.len() - self.config.max_alerts;
            self.alerts.drain(..excess);
        }

        // Per-lane count history for the chart, trimmed by age.
        let counts: Vec<usize> = self
            .lane_names
            .iter()
            .map(|name| {
                lane_stats
                    .iter()
                    .find(|s| &s.name == name)
                    .map(|s| s.vehicle_count)
                    .unwrap_or(0)
            })
            .collect();
        self.count_history.push_back((now, counts));
        while let Some((t, _)) = self.count_history.front() {
            if now - t > self.config.history_window_secs {
                self.count_history.pop_front();
            } else {
                break;
            }
        }

        self.latest_metrics = Some(self.build_metrics(tracks, lane_stats, detections, now));

        new_alerts
    }

    fn tick_fps(&mut self, now: f64) {
        self.fps_ticks += 1;
        let elapsed = now - self.fps_window_start;
        if elapsed >= 1.0 {
            self.current_fps = self.fps_ticks as f64 / elapsed;
            self.fps_ticks = 0;
            self.fps_window_start = now;
        }
    }

    fn check_accidents(
        &mut self,
        vehicle_tracks: &[&Track],
        detections: &[Detection],
        now: f64,
    ) -> Option<Alert> {
        let mut accident: Option<Alert> = None;

        self.seed_collision_candidates(vehicle_tracks, now);
        if let Some(alert) = self.resolve_collision_pendings(vehicle_tracks, now) {
            accident = Some(alert);
        }

        if let Some(alert) = self.check_scene(vehicle_tracks, detections, now) {
            accident.get_or_insert(alert);
        }

        if let Some(alert) = self.check_stalls(vehicle_tracks, now) {
            accident.get_or_insert(alert);
        }

        if accident.is_none() {
            accident = self.check_pedestrian_proximity(vehicle_tracks, detections, now);
        }

        accident
    }

    /// Phase one: record overlapping or near-touching vehicle pairs.
    fn seed_collision_candidates(&mut self, vehicle_tracks: &[&Track], now: f64) {
        for (i, a) in vehicle_tracks.iter().enumerate() {
            for b in vehicle_tracks.iter().skip(i + 1) {
                let key = PendingKey::Pair(a.id.min(b.id), a.id.max(b.id));
                if self.pendings.contains_key(&key) {
                    continue;
                }

                let overlap = iou(&a.bbox, &b.bbox);
                let gap = edge_gap(&a.bbox, &b.bbox);
                let (acx, acy) = a.centroid();
                let (bcx, bcy) = b.centroid();
                let centroid_dist = ((acx - bcx).powi(2) + (acy - bcy).powi(2)).sqrt();

                let candidate = overlap > self.config.overlap_iou
                    || (gap < COLLISION_EDGE_GAP_PX && centroid_dist < COLLISION_CENTROID_PX);
                if candidate {
                    debug!(
                        "collision candidate T{}/T{}: iou={:.2} gap={:.0}px dist={:.0}px",
                        a.id, b.id, overlap, gap, centroid_dist
                    );
                    self.pendings.insert(
                        key,
                        Pending {
                            first_seen: now,
                            lane: a.lane.clone(),
                        },
                    );
                }
            }
        }
    }

    /// Phase two: confirm or expire pending pairs based on stop persistence.
    fn resolve_collision_pendings(
        &mut self,
        vehicle_tracks: &[&Track],
        now: f64,
    ) -> Option<Alert> {
        let confirm = self.config.collision_confirm_secs;
        let discard = self.config.collision_discard_secs;
        let mut alert: Option<Alert> = None;
        let mut remove: Vec<PendingKey> = Vec::new();

        for (key, pending) in &self.pendings {
            let PendingKey::Pair(id_a, id_b) = *key else { continue };
            let age = now - pending.first_seen;

            let a = vehicle_tracks.iter().find(|t| t.id == id_a);
            let b = vehicle_tracks.iter().find(|t| t.id == id_b);
            let (Some(a), Some(b)) = (a, b) else {
                // One of the pair vanished; nothing to confirm against.
                remove.push(*key);
                continue;
            };

            if a.is_stopped && b.is_stopped && age >= confirm {
                warn!(
                    "collision confirmed: T{} and T{} stopped for {:.1}s",
                    a.id, b.id, age
                );
                if alert.is_none() {
                    alert = Some(Alert {
                        kind: AlertKind::Accident,
                        message: format!(
                            "Collision confirmed between vehicle #{} and #{}",
                            a.id, b.id
                        ),
                        lane: pending.lane.clone(),
                        severity: Severity::Critical,
                        timestamp: now,
                    });
                }
                remove.push(*key);
            } else if (a.is_stopped ^ b.is_stopped) && age >= confirm * SINGLE_STOP_CONFIRM_FACTOR {
                let (stopped, other) = if a.is_stopped { (a, b) } else { (b, a) };
                warn!(
                    "collision suspected: T{} stopped {:.1}s after contact with T{}",
                    stopped.id, age, other.id
                );
                if alert.is_none() {
                    alert = Some(Alert {
                        kind: AlertKind::Accident,
                        message: format!(
                            "Vehicle #{} stopped after impact with #{}",
                            stopped.id, other.id
                        ),
                        lane: pending.lane.clone(),
                        severity: Severity::Critical,
                        timestamp: now,
                    });
                }
                remove.push(*key);
            } else if !a.is_stopped && !b.is_stopped && age >= discard {
                debug!("collision candidate T{}/T{} discarded, both moving", a.id, b.id);
                remove.push(*key);
            }
        }

        for key in remove {
            self.pendings.remove(&key);
        }
        alert
    }

    /// A stopped vehicle with pedestrians gathered around it.
    fn check_scene(
        &mut self,
        vehicle_tracks: &[&Track],
        detections: &[Detection],
        now: f64,
    ) -> Option<Alert> {
        let mut alert: Option<Alert> = None;
        let mut remove: Vec<PendingKey> = Vec::new();
        let mut live: Vec<u64> = Vec::new();

        for track in vehicle_tracks {
            if !track.is_stopped || track.wait_time(now) < self.config.scene_min_stop_secs {
                continue;
            }
            let (cx, cy) = track.centroid();
            let persons_nearby = detections
                .iter()
                .filter(|d| d.is_person)
                .filter(|d| {
                    let (px, py) = d.centroid();
                    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt() < SCENE_PERSON_RADIUS_PX
                })
                .count();
            if persons_nearby < SCENE_MIN_PERSONS {
                continue;
            }

            live.push(track.id);
            let key = PendingKey::Scene(track.id);
            let entry = self.pendings.entry(key).or_insert_with(|| Pending {
                first_seen: now,
                lane: track.lane.clone(),
            });
            if now - entry.first_seen >= self.config.collision_confirm_secs {
                warn!(
                    "accident scene: T{} stopped with {} pedestrians nearby",
                    track.id, persons_nearby
                );
                if alert.is_none() {
                    alert = Some(Alert {
                        kind: AlertKind::Accident,
                        message: format!(
                            "Possible accident scene around vehicle #{} ({} pedestrians)",
                            track.id, persons_nearby
                        ),
                        lane: entry.lane.clone(),
                        severity: Severity::Critical,
                        timestamp: now,
                    });
                }
                remove.push(key);
            }
        }

        // Scene entries whose conditions no longer hold.
        let stale: Vec<PendingKey> = self
            .pendings
            .keys()
            .filter(|k| matches!(k, PendingKey::Scene(id) if !live.contains(id)))
            .copied()
            .collect();
        remove.extend(stale);

        for key in remove {
            self.pendings.remove(&key);
        }
        alert
    }

    /// A vehicle stopped long past normal queueing.
    fn check_stalls(&mut self, vehicle_tracks: &[&Track], now: f64) -> Option<Alert> {
        let mut alert: Option<Alert> = None;
        let mut remove: Vec<PendingKey> = Vec::new();
        let mut live: Vec<u64> = Vec::new();

        for track in vehicle_tracks {
            if !track.is_stopped || track.wait_time(now) <= self.config.stall_min_stop_secs {
                continue;
            }
            live.push(track.id);
            let key = PendingKey::Stall(track.id);
            let entry = self.pendings.entry(key).or_insert_with(|| Pending {
                first_seen: now,
                lane: track.lane.clone(),
            });
            if now - entry.first_seen >= self.config.collision_confirm_secs {
                info!("stalled vehicle T{} ({:.0}s stopped)", track.id, track.wait_time(now));
                if alert.is_none() {
                    alert = Some(Alert {
                        kind: AlertKind::Accident,
                        message: format!(
                            "Vehicle #{} stalled in {} lane",
                            track.id,
                            entry.lane.as_deref().unwrap_or("unknown")
                        ),
                        lane: entry.lane.clone(),
                        severity: Severity::High,
                        timestamp: now,
                    });
                }
                remove.push(key);
            }
        }

        let stale: Vec<PendingKey> = self
            .pendings
            .keys()
            .filter(|k| matches!(k, PendingKey::Stall(id) if !live.contains(id)))
            .copied()
            .collect();
        remove.extend(stale);

        for key in remove {
            self.pendings.remove(&key);
        }
        alert
    }

    /// Person practically on top of a vehicle: no confirmation delay.
    fn check_pedestrian_proximity(
        &self,
        vehicle_tracks: &[&Track],
        detections: &[Detection],
        now: f64,
    ) -> Option<Alert> {
        for det in detections.iter().filter(|d| d.is_person) {
            let (px, py) = det.centroid();
            for track in vehicle_tracks {
                let (cx, cy) = track.centroid();
                if (px - cx).abs() < PEDESTRIAN_PROXIMITY_PX
                    && (py - cy).abs() < PEDESTRIAN_PROXIMITY_PX
                {
                    return Some(Alert {
                        kind: AlertKind::Accident,
                        message: format!(
                            "Pedestrian dangerously close to vehicle #{}",
                            track.id
                        ),
                        lane: track.lane.clone(),
                        severity: Severity::High,
                        timestamp: now,
                    });
                }
            }
        }
        None
    }

    /// Bounded newest-first feed of noteworthy moments, rate-limited.
    fn capture_incident(&mut self, new_alerts: &[Alert], lane_stats: &[LaneStats], now: f64) {
        if now - self.last_incident <= self.config.incident_cooldown_secs {
            return;
        }

        // Critical alerts first, then the crowd advisory, then suspected
        // long-term parking.
        let mut captured: Option<IncidentRecord> = new_alerts
            .iter()
            .find(|a| a.severity == Severity::Critical)
            .or_else(|| new_alerts.iter().find(|a| a.kind == AlertKind::Crowd))
            .map(|alert| IncidentRecord {
                kind: alert.kind.as_str().to_string(),
                description: alert.message.clone(),
                lane: alert.lane.clone(),
                timestamp: now,
            });

        if captured.is_none() {
            for stats in lane_stats {
                if stats.max_wait_time > self.config.parking_wait_secs {
                    captured = Some(IncidentRecord {
                        kind: "parking".to_string(),
                        description: format!(
                            "Potential stalled or illegally parked vehicle in {} lane",
                            stats.name
                        ),
                        lane: Some(stats.name.clone()),
                        timestamp: now,
                    });
                    break;
                }
            }
        }

        if let Some(record) = captured {
            self.incidents.push_front(record);
            self.incidents.truncate(self.config.max_incidents);
            self.last_incident = now;
        }
    }

    fn build_metrics(
        &self,
        tracks: &[Track],
        lane_stats: &[LaneStats],
        detections: &[Detection],
        now: f64,
    ) -> TrafficMetrics {
        let vehicle_tracks: Vec<&Track> = tracks.iter().filter(|t| t.is_vehicle).collect();
        let avg_wait = if vehicle_tracks.is_empty() {
            0.0
        } else {
            vehicle_tracks.iter().map(|t| t.wait_time(now)).sum::<f64>()
                / vehicle_tracks.len() as f64
        };

        let mut vehicle_types: BTreeMap<String, usize> =
            ["car", "motorcycle", "bus", "truck", "person"]
                .iter()
                .map(|k| (k.to_string(), 0))
                .collect();
        for det in detections {
            let label = det.label.to_lowercase();
            if let Some(count) = vehicle_types.get_mut(&label) {
                *count += 1;
            } else if det.is_person {
                *vehicle_types.entry("person".to_string()).or_insert(0) += 1;
            }
        }

        TrafficMetrics {
            fps: self.current_fps,
            total_vehicles: vehicle_tracks.len(),
            total_persons: tracks.iter().filter(|t| t.is_person).count(),
            ambulance_active: tracks.iter().any(|t| t.is_ambulance),
            avg_wait_secs: avg_wait,
            vehicle_types,
            session_uptime_secs: (now - self.session_start).max(0.0),
            peak_vehicles: self.peak_vehicles,
            total_accidents: self.total_accidents,
            total_emergency: self.total_emergency,
            total_alerts: self.alerts.len(),
            lanes: lane_stats.iter().map(Into::into).collect(),
        }
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn incidents(&self) -> &VecDeque<IncidentRecord> {
        &self.incidents
    }

    pub fn metrics(&self) -> Option<&TrafficMetrics> {
        self.latest_metrics.as_ref()
    }

    /// Chart payload: relative-time labels with the per-lane count series.
    pub fn chart_data(&self, now: f64) -> ChartData {
        let labels: Vec<f64> = self
            .count_history
            .iter()
            .map(|(t, _)| ((now - t) * 10.0).round() / 10.0)
            .collect();
        let series = self
            .lane_names
            .iter()
            .enumerate()
            .map(|(i, name)| LaneSeries {
                name: name.clone(),
                counts: self
                    .count_history
                    .iter()
                    .map(|(_, counts)| counts.get(i).copied().unwrap_or(0))
                    .collect(),
            })
            .collect();
        ChartData { labels, series }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pendings.len()
    }
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Distance between the closest edges of two boxes; zero on any axis where
/// they overlap.
fn edge_gap(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let gx = (b[0] - a[2]).max(a[0] - b[2]).max(0.0);
    let gy = (b[1] - a[3]).max(a[1] - b[3]).max(0.0);
    (gx * gx + gy * gy).sqrt()
}
