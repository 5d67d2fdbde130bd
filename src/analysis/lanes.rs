// src/analysis/lanes.rs
//
// Virtual lane regions and per-lane occupancy statistics. Lanes are an
// ordered list of named polygons; when polygons overlap, the earliest
// registered lane wins containment. Statistics are rebuilt from scratch
// every tick, nothing carries over.

use crate::analysis::tracker::Track;
use crate::types::LaneSpec;
use anyhow::{bail, Result};
use serde::Serialize;

/// Vehicle-count buckets for the dashboard.
pub const CONGESTION_LIGHT_MAX: usize = 3;
pub const CONGESTION_MODERATE_MAX: usize = 8;

#[derive(Debug, Clone)]
struct LaneZone {
    name: String,
    polygon: Vec<(f32, f32)>, // pixel coordinates
    area: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LaneStats {
    pub name: String,
    pub vehicle_count: usize,
    pub person_count: usize,
    pub ambulance_present: bool,
    /// Occupied bbox area over lane polygon area, capped at 1.0
    pub density_ratio: f32,
    /// Mean wait over currently stopped vehicles in the lane
    pub avg_wait_time: f64,
    pub max_wait_time: f64,
    /// Count of stopped vehicles
    pub queue_length: usize,
}

impl LaneStats {
    pub fn congestion_level(&self) -> &'static str {
        if self.vehicle_count == 0 {
            "free"
        } else if self.vehicle_count <= CONGESTION_LIGHT_MAX {
            "light"
        } else if self.vehicle_count <= CONGESTION_MODERATE_MAX {
            "moderate"
        } else {
            "heavy"
        }
    }

    /// Weighted score used only to break ties when picking the next active
    /// lane. Density dominates; an ambulance outweighs everything.
    pub fn priority_score(&self) -> f64 {
        let mut score = self.vehicle_count as f64 * 2.0;
        score += self.density_ratio as f64 * 50.0;
        score += self.avg_wait_time * 0.5;
        score += self.queue_length as f64 * 3.0;
        if self.ambulance_present {
            score += 10_000.0;
        }
        score
    }
}

pub struct LaneMap {
    zones: Vec<LaneZone>,
    stats: Vec<LaneStats>,
}

impl LaneMap {
    /// Scale the normalized polygons to the frame resolution. Registration
    /// order is preserved because it decides overlap priority.
    pub fn new(specs: &[LaneSpec], frame_width: usize, frame_height: usize) -> Result<Self> {
        let mut zones = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.polygon.len() < 3 {
                bail!("lane '{}' needs at least 3 polygon points", spec.name);
            }
            let polygon: Vec<(f32, f32)> = spec
                .polygon
                .iter()
                .map(|p| (p[0] * frame_width as f32, p[1] * frame_height as f32))
                .collect();
            let area = polygon_area(&polygon);
            if area <= 0.0 {
                bail!("lane '{}' polygon has zero area", spec.name);
            }
            zones.push(LaneZone {
                name: spec.name.clone(),
                polygon,
                area,
            });
        }
        let stats = zones
            .iter()
            .map(|z| LaneStats {
                name: z.name.clone(),
                ..LaneStats::default()
            })
            .collect();
        Ok(Self { zones, stats })
    }

    pub fn names(&self) -> Vec<String> {
        self.zones.iter().map(|z| z.name.clone()).collect()
    }

    /// First polygon containing the point wins.
    pub fn assign(&self, cx: f32, cy: f32) -> Option<&str> {
        self.zones
            .iter()
            .find(|z| point_in_polygon(&z.polygon, cx, cy))
            .map(|z| z.name.as_str())
    }

    /// Assign each track to a lane and rebuild all lane statistics.
    pub fn update(&mut self, tracks: &mut [Track], now: f64) -> &[LaneStats] {
        let n = self.zones.len();
        let mut vehicles = vec![0usize; n];
        let mut persons = vec![0usize; n];
        let mut ambulance = vec![false; n];
        let mut stopped = vec![0usize; n];
        let mut waits: Vec<Vec<f64>> = vec![Vec::new(); n];
        let mut bbox_area = vec![0.0f32; n];

        for track in tracks.iter_mut() {
            let (cx, cy) = track.centroid();
            let idx = self
                .zones
                .iter()
                .position(|z| point_in_polygon(&z.polygon, cx, cy));
            track.lane = idx.map(|i| self.zones[i].name.clone());

            let Some(i) = idx else { continue };

            if track.is_vehicle {
                vehicles[i] += 1;
                bbox_area[i] += track.area();
                if track.is_stopped {
                    stopped[i] += 1;
                    waits[i].push(track.wait_time(now));
                }
                if track.is_ambulance {
                    ambulance[i] = true;
                }
            } else if track.is_person {
                persons[i] += 1;
            }
        }

        for (i, zone) in self.zones.iter().enumerate() {
            let s = &mut self.stats[i];
            s.vehicle_count = vehicles[i];
            s.person_count = persons[i];
            s.ambulance_present = ambulance[i];
            s.density_ratio = (bbox_area[i] / zone.area.max(1.0)).min(1.0);
            s.avg_wait_time = if waits[i].is_empty() {
                0.0
            } else {
                waits[i].iter().sum::<f64>() / waits[i].len() as f64
            };
            s.max_wait_time = waits[i].iter().cloned().fold(0.0, f64::max);
            s.queue_length = stopped[i];
        }

        &self.stats
    }

    pub fn stats(&self) -> &[LaneStats] {
        &self.stats
    }

    pub fn get(&self, name: &str) -> Option<&LaneStats> {
        self.stats.iter().find(|s| s.name == name)
    }

    /// Lane names sorted by priority score, highest first.
    pub fn priority_order(&self) -> Vec<&str> {
        let mut order: Vec<&LaneStats> = self.stats.iter().collect();
        order.sort_by(|a, b| {
            b.priority_score()
                .partial_cmp(&a.priority_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.iter().map(|s| s.name.as_str()).collect()
    }

    /// Lane with the largest max wait, if any lanes exist.
    pub fn max_wait_lane(&self) -> Option<(&str, f64)> {
        self.stats
            .iter()
            .max_by(|a, b| {
                a.max_wait_time
                    .partial_cmp(&b.max_wait_time)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|s| (s.name.as_str(), s.max_wait_time))
    }
}

/// Shoelace formula.
fn polygon_area(polygon: &[(f32, f32)]) -> f32 {
    let n = polygon.len();
    let mut acc = 0.0f32;
    for i in 0..n {
        let (x1, y1) = polygon[i];
        let (x2, y2) = polygon[(i + 1) % n];
        acc += x1 * y2 - x2 * y1;
    }
    (acc * 0.5).abs()
}

/// Even-odd ray casting.
fn point_in_polygon(polygon: &[(f32, f32)], x: f32, y: f32) -> bool {
    let mut inside = false;
    let n = polygon.len();
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tracker::CentroidTracker;
    use crate::types::{Detection, TrackerConfig};

    fn quad_specs() -> Vec<LaneSpec> {
        vec![
            LaneSpec {
                name: "North".to_string(),
                polygon: vec![[0.0, 0.0], [0.5, 0.0], [0.5, 0.5], [0.0, 0.5]],
            },
            LaneSpec {
                name: "South".to_string(),
                polygon: vec![[0.5, 0.0], [1.0, 0.0], [1.0, 0.5], [0.5, 0.5]],
            },
        ]
    }

    fn make_tracks(dets: Vec<Detection>, now: f64) -> Vec<Track> {
        let mut tracker = CentroidTracker::new(TrackerConfig {
            max_disappeared: 10,
            max_distance: 80.0,
            stop_speed_px: 3.0,
        });
        tracker.update(&dets, now)
    }

    fn vehicle_at(cx: f32, cy: f32, half: f32) -> Detection {
        Detection {
            bbox: [cx - half, cy - half, cx + half, cy + half],
            label: "car".to_string(),
            confidence: 0.9,
            is_vehicle: true,
            is_person: false,
            is_ambulance: false,
        }
    }

    #[test]
    fn test_polygon_area_and_containment() {
        let square = vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)];
        assert!((polygon_area(&square) - 10_000.0).abs() < 1e-3);
        assert!(point_in_polygon(&square, 50.0, 50.0));
        assert!(!point_in_polygon(&square, 150.0, 50.0));
    }

    #[test]
    fn test_assignment_by_quadrant() {
        let lanes = LaneMap::new(&quad_specs(), 1000, 1000).unwrap();
        assert_eq!(lanes.assign(250.0, 250.0), Some("North"));
        assert_eq!(lanes.assign(750.0, 250.0), Some("South"));
        assert_eq!(lanes.assign(250.0, 900.0), None);
    }

    #[test]
    fn test_overlapping_polygons_earlier_lane_wins() {
        let specs = vec![
            LaneSpec {
                name: "A".to_string(),
                polygon: vec![[0.0, 0.0], [0.6, 0.0], [0.6, 1.0], [0.0, 1.0]],
            },
            LaneSpec {
                name: "B".to_string(),
                polygon: vec![[0.4, 0.0], [1.0, 0.0], [1.0, 1.0], [0.4, 1.0]],
            },
        ];
        let lanes = LaneMap::new(&specs, 1000, 1000).unwrap();
        // Inside both polygons: registration order decides.
        assert_eq!(lanes.assign(500.0, 500.0), Some("A"));
    }

    #[test]
    fn test_density_ratio_clamped_to_one() {
        let mut lanes = LaneMap::new(&quad_specs(), 100, 100).unwrap();
        // One huge vehicle whose bbox dwarfs the 50x50 lane polygon.
        let mut tracks = make_tracks(vec![vehicle_at(25.0, 25.0, 200.0)], 0.0);
        let stats = lanes.update(&mut tracks, 0.0);
        assert!(stats[0].density_ratio <= 1.0);
        assert!(stats[0].density_ratio > 0.99);
    }

    #[test]
    fn test_unassigned_tracks_excluded_from_aggregates() {
        let mut lanes = LaneMap::new(&quad_specs(), 1000, 1000).unwrap();
        // Bottom half of the frame is uncovered by any polygon.
        let mut tracks = make_tracks(vec![vehicle_at(500.0, 900.0, 20.0)], 0.0);
        let stats = lanes.update(&mut tracks, 0.0);
        assert!(tracks[0].lane.is_none());
        assert!(stats.iter().all(|s| s.vehicle_count == 0));
    }

    #[test]
    fn test_wait_aggregates_cover_stopped_vehicles_only() {
        let mut lanes = LaneMap::new(&quad_specs(), 1000, 1000).unwrap();
        let mut tracker = CentroidTracker::new(TrackerConfig {
            max_disappeared: 10,
            max_distance: 80.0,
            stop_speed_px: 3.0,
        });
        // Two vehicles in North; one holds still, one keeps moving.
        tracker.update(
            &[vehicle_at(100.0, 100.0, 20.0), vehicle_at(300.0, 100.0, 20.0)],
            0.0,
        );
        tracker.update(
            &[vehicle_at(100.0, 100.0, 20.0), vehicle_at(340.0, 100.0, 20.0)],
            1.0,
        );
        let mut tracks = tracker.update(
            &[vehicle_at(100.0, 100.0, 20.0), vehicle_at(380.0, 100.0, 20.0)],
            5.0,
        );

        let stats = lanes.update(&mut tracks, 5.0);
        let north = &stats[0];
        assert_eq!(north.vehicle_count, 2);
        assert_eq!(north.queue_length, 1);
        // Stopped at t=1, so 4s of wait by t=5.
        assert!((north.avg_wait_time - 4.0).abs() < 1e-6);
        assert!((north.max_wait_time - 4.0).abs() < 1e-6);

        assert_eq!(lanes.get("North").map(|s| s.vehicle_count), Some(2));
    }

    #[test]
    fn test_congestion_buckets() {
        let mut s = LaneStats::default();
        assert_eq!(s.congestion_level(), "free");
        s.vehicle_count = 3;
        assert_eq!(s.congestion_level(), "light");
        s.vehicle_count = 8;
        assert_eq!(s.congestion_level(), "moderate");
        s.vehicle_count = 9;
        assert_eq!(s.congestion_level(), "heavy");
    }

    #[test]
    fn test_priority_order_and_max_wait_lane() {
        let mut lanes = LaneMap::new(&quad_specs(), 1000, 1000).unwrap();
        let mut tracker = CentroidTracker::new(TrackerConfig {
            max_disappeared: 10,
            max_distance: 80.0,
            stop_speed_px: 3.0,
        });
        // Three cars parked in South since t=1; the North car only comes to
        // rest on the last tick, so its wait is still zero.
        let south = |x: f32| vehicle_at(x, 100.0, 25.0);
        tracker.update(
            &[south(700.0), south(800.0), south(900.0), vehicle_at(100.0, 100.0, 25.0)],
            0.0,
        );
        tracker.update(
            &[south(700.0), south(800.0), south(900.0), vehicle_at(140.0, 100.0, 25.0)],
            1.0,
        );
        let mut tracks = tracker.update(
            &[south(700.0), south(800.0), south(900.0), vehicle_at(140.0, 100.0, 25.0)],
            8.0,
        );
        lanes.update(&mut tracks, 8.0);

        assert_eq!(lanes.priority_order()[0], "South");
        let (name, wait) = lanes.max_wait_lane().unwrap();
        assert_eq!(name, "South");
        assert!((wait - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_priority_score_formula_and_ambulance_bonus() {
        let mut s = LaneStats {
            name: "North".to_string(),
            vehicle_count: 4,
            density_ratio: 0.5,
            avg_wait_time: 10.0,
            queue_length: 2,
            ..LaneStats::default()
        };
        let expected = 4.0 * 2.0 + 0.5 * 50.0 + 10.0 * 0.5 + 2.0 * 3.0;
        assert!((s.priority_score() - expected).abs() < 1e-6);

        s.ambulance_present = true;
        assert!(s.priority_score() > 10_000.0);
    }
}
