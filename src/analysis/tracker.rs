// src/analysis/tracker.rs
//
// Centroid-based multi-object tracker. Assigns persistent ids to detections
// across frames and derives per-track motion: speed, stopped state, and
// accumulated wait time.
//
// Design:
//   - Greedy nearest-neighbor matching over the full pairwise distance
//     matrix; no bipartite assignment. Good enough for intersection scenes
//     and bounded per-tick cost.
//   - Equidistant candidates resolve by (distance, track id, detection
//     index), so matching is deterministic across runs.
//   - Tracks age through detection gaps and are pruned after
//     max_disappeared consecutive misses. Ids are never reused.

use crate::types::{Detection, TrackerConfig};
use tracing::{debug, info};

/// A tracked object with persistent identity.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub bbox: [f32; 4],
    pub label: String,
    pub is_vehicle: bool,
    pub is_person: bool,
    pub is_ambulance: bool,

    pub created_at: f64,
    pub last_seen: f64,
    pub frames_tracked: u32,
    pub frames_missing: u32,

    prev_cx: f32,
    prev_cy: f32,
    /// Pixels moved between the last two matched ticks
    pub speed_px: f32,

    pub lane: Option<String>,

    pub is_stopped: bool,
    wait_start: Option<f64>,
    total_wait: f64,
}

impl Track {
    fn new(id: u64, det: &Detection, now: f64) -> Self {
        let (cx, cy) = det.centroid();
        Self {
            id,
            bbox: det.bbox,
            label: det.label.clone(),
            is_vehicle: det.is_vehicle,
            is_person: det.is_person,
            is_ambulance: det.is_ambulance,
            created_at: now,
            last_seen: now,
            frames_tracked: 1,
            frames_missing: 0,
            prev_cx: cx,
            prev_cy: cy,
            speed_px: 0.0,
            lane: None,
            is_stopped: false,
            wait_start: None,
            total_wait: 0.0,
        }
    }

    pub fn centroid(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) * 0.5,
            (self.bbox[1] + self.bbox[3]) * 0.5,
        )
    }

    pub fn width(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bbox[3] - self.bbox[1]).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Seconds since this track was first seen.
    pub fn age(&self, now: f64) -> f64 {
        (now - self.created_at).max(0.0)
    }

    /// Total time spent stopped, including the current stop if ongoing.
    pub fn wait_time(&self, now: f64) -> f64 {
        match self.wait_start {
            Some(start) => self.total_wait + (now - start).max(0.0),
            None => self.total_wait,
        }
    }

    fn apply_detection(&mut self, det: &Detection, now: f64, stop_speed_px: f32) {
        let (prev_cx, prev_cy) = self.centroid();
        self.prev_cx = prev_cx;
        self.prev_cy = prev_cy;

        self.bbox = det.bbox;
        self.label = det.label.clone();
        self.is_ambulance = det.is_ambulance;
        self.last_seen = now;
        self.frames_tracked += 1;
        self.frames_missing = 0;

        self.update_motion(now, stop_speed_px);
    }

    /// Recompute speed and stopped state from the position delta. Wait time
    /// accrues only while stopped and flushes into the running total the
    /// instant motion resumes.
    fn update_motion(&mut self, now: f64, stop_speed_px: f32) {
        let (cx, cy) = self.centroid();
        let dx = cx - self.prev_cx;
        let dy = cy - self.prev_cy;
        self.speed_px = (dx * dx + dy * dy).sqrt();

        if self.speed_px < stop_speed_px {
            if !self.is_stopped {
                self.is_stopped = true;
                self.wait_start = Some(now);
            }
        } else if self.is_stopped {
            self.is_stopped = false;
            if let Some(start) = self.wait_start.take() {
                self.total_wait += (now - start).max(0.0);
            }
        }
    }
}

pub struct CentroidTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl CentroidTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::with_capacity(32),
            next_id: 1,
        }
    }

    /// Process one tick of detections. Returns a copy of the active track
    /// set; downstream stages annotate the copies without touching tracker
    /// internals.
    pub fn update(&mut self, detections: &[Detection], now: f64) -> Vec<Track> {
        if detections.is_empty() {
            self.age_all();
            return self.tracks.clone();
        }

        if self.tracks.is_empty() {
            for det in detections {
                self.register(det, now);
            }
            return self.tracks.clone();
        }

        // Full pairwise distance matrix, flattened to candidate triples and
        // processed in ascending order. Once a candidate exceeds the match
        // bound every later one does too.
        let mut pairs: Vec<(usize, usize, f32)> =
            Vec::with_capacity(self.tracks.len() * detections.len());
        for (ti, track) in self.tracks.iter().enumerate() {
            let (tcx, tcy) = track.centroid();
            for (di, det) in detections.iter().enumerate() {
                let (dcx, dcy) = det.centroid();
                let dist = ((tcx - dcx).powi(2) + (tcy - dcy).powi(2)).sqrt();
                pairs.push((ti, di, dist));
            }
        }
        pairs.sort_by(|a, b| {
            a.2.partial_cmp(&b.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.tracks[a.0].id.cmp(&self.tracks[b.0].id))
                .then_with(|| a.1.cmp(&b.1))
        });

        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut matched_dets = vec![false; detections.len()];

        for (ti, di, dist) in &pairs {
            if *dist > self.config.max_distance {
                break;
            }
            if matched_tracks[*ti] || matched_dets[*di] {
                continue;
            }
            matched_tracks[*ti] = true;
            matched_dets[*di] = true;
            self.tracks[*ti].apply_detection(
                &detections[*di],
                now,
                self.config.stop_speed_px,
            );
        }

        for (di, det) in detections.iter().enumerate() {
            if !matched_dets[di] {
                self.register(det, now);
            }
        }

        for (ti, matched) in matched_tracks.iter().enumerate() {
            if !matched {
                self.tracks[ti].frames_missing += 1;
            }
        }

        self.prune();
        self.tracks.clone()
    }

    fn register(&mut self, det: &Detection, now: f64) {
        let track = Track::new(self.next_id, det, now);
        debug!(
            "new track T{}: {} bbox=[{:.0},{:.0},{:.0},{:.0}]",
            track.id, track.label, track.bbox[0], track.bbox[1], track.bbox[2], track.bbox[3]
        );
        self.next_id += 1;
        self.tracks.push(track);
    }

    fn age_all(&mut self) {
        for track in &mut self.tracks {
            track.frames_missing += 1;
        }
        self.prune();
    }

    fn prune(&mut self) {
        let max_disappeared = self.config.max_disappeared;
        self.tracks.retain(|t| {
            if t.frames_missing > max_disappeared {
                info!("track T{} dropped after {} missed ticks", t.id, t.frames_missing);
                return false;
            }
            true
        });
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn total_active(&self) -> usize {
        self.tracks.len()
    }

    pub fn vehicle_tracks(&self) -> Vec<&Track> {
        self.tracks.iter().filter(|t| t.is_vehicle).collect()
    }

    pub fn ambulance_tracks(&self) -> Vec<&Track> {
        self.tracks.iter().filter(|t| t.is_ambulance).collect()
    }

    /// Vehicles that have been stopped for at least `min_wait` seconds.
    pub fn stopped_vehicles(&self, min_wait: f64, now: f64) -> Vec<&Track> {
        self.tracks
            .iter()
            .filter(|t| t.is_vehicle && t.is_stopped && t.wait_time(now) >= min_wait)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TrackerConfig {
        TrackerConfig {
            max_disappeared: 10,
            max_distance: 80.0,
            stop_speed_px: 3.0,
        }
    }

    fn det_at(cx: f32, cy: f32) -> Detection {
        Detection {
            bbox: [cx - 20.0, cy - 10.0, cx + 20.0, cy + 10.0],
            label: "car".to_string(),
            confidence: 0.8,
            is_vehicle: true,
            is_person: false,
            is_ambulance: false,
        }
    }

    #[test]
    fn test_all_detections_register_on_empty_tracker() {
        let mut tracker = CentroidTracker::new(cfg());
        let dets = vec![det_at(100.0, 100.0), det_at(300.0, 100.0), det_at(500.0, 100.0)];
        let tracks = tracker.update(&dets, 0.0);
        assert_eq!(tracks.len(), 3);
        let ids: Vec<u64> = tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_nearby_detection_updates_existing_track() {
        let mut tracker = CentroidTracker::new(cfg());
        tracker.update(&[det_at(100.0, 100.0)], 0.0);

        // Within the 80px bound: must update, not spawn.
        let tracks = tracker.update(&[det_at(130.0, 100.0)], 0.033);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, 1);
        assert_eq!(tracks[0].frames_tracked, 2);
    }

    #[test]
    fn test_far_detection_spawns_new_track() {
        let mut tracker = CentroidTracker::new(cfg());
        tracker.update(&[det_at(100.0, 100.0)], 0.0);

        let tracks = tracker.update(&[det_at(400.0, 400.0)], 0.033);
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().any(|t| t.id == 2));
    }

    #[test]
    fn test_ids_never_reused_after_deletion() {
        let mut tracker = CentroidTracker::new(cfg());
        tracker.update(&[det_at(100.0, 100.0)], 0.0);

        // Starve the track past max_disappeared.
        for i in 0..12 {
            tracker.update(&[], 0.033 * (i + 1) as f64);
        }
        assert_eq!(tracker.total_active(), 0);

        let tracks = tracker.update(&[det_at(100.0, 100.0)], 1.0);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, 2, "deleted id must not come back");
    }

    #[test]
    fn test_equidistant_tiebreak_is_deterministic() {
        // Two detections exactly equidistant from one track. The lower
        // detection index must win, and the other spawns a new track.
        let mut tracker = CentroidTracker::new(cfg());
        tracker.update(&[det_at(100.0, 100.0)], 0.0);

        let dets = vec![det_at(140.0, 100.0), det_at(60.0, 100.0)];
        let tracks = tracker.update(&dets, 0.033);
        assert_eq!(tracks.len(), 2);
        let existing = tracks.iter().find(|t| t.id == 1).unwrap();
        assert_eq!(existing.centroid(), (140.0, 100.0));
    }

    #[test]
    fn test_stop_and_wait_accounting() {
        let mut tracker = CentroidTracker::new(cfg());
        tracker.update(&[det_at(100.0, 100.0)], 0.0);

        // Moving fast: not stopped.
        let tracks = tracker.update(&[det_at(120.0, 100.0)], 1.0);
        assert!(!tracks[0].is_stopped);

        // Holds position: flips to stopped at t=2.
        let tracks = tracker.update(&[det_at(120.5, 100.0)], 2.0);
        assert!(tracks[0].is_stopped);

        // Still stopped at t=6: four seconds of ongoing wait.
        let tracks = tracker.update(&[det_at(120.5, 100.0)], 6.0);
        assert!(tracks[0].is_stopped);
        assert!((tracks[0].wait_time(6.0) - 4.0).abs() < 1e-6);

        // Resumes at t=7: the stop window flushes into the total.
        let tracks = tracker.update(&[det_at(200.0, 100.0)], 7.0);
        assert!(!tracks[0].is_stopped);
        assert!((tracks[0].wait_time(7.0) - 5.0).abs() < 1e-6);

        // Total no longer grows while moving.
        assert!((tracks[0].wait_time(20.0) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_detections_ages_everyone() {
        let mut tracker = CentroidTracker::new(cfg());
        tracker.update(&[det_at(100.0, 100.0), det_at(300.0, 100.0)], 0.0);

        let tracks = tracker.update(&[], 0.033);
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.frames_missing == 1));
    }

    #[test]
    fn test_stopped_vehicles_filter_and_age() {
        let mut tracker = CentroidTracker::new(cfg());
        tracker.update(&[det_at(100.0, 100.0), det_at(400.0, 100.0)], 0.0);
        // First car parks, second keeps moving.
        tracker.update(&[det_at(100.0, 100.0), det_at(440.0, 100.0)], 1.0);
        tracker.update(&[det_at(100.0, 100.0), det_at(480.0, 100.0)], 6.0);

        let stopped = tracker.stopped_vehicles(3.0, 6.0);
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].id, 1);
        assert!(tracker.stopped_vehicles(10.0, 6.0).is_empty());
        assert_eq!(tracker.vehicle_tracks().len(), 2);

        assert_eq!(tracker.tracks().len(), 2);
        assert!((tracker.tracks()[0].age(6.0) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_ambulance_flag_follows_detection() {
        let mut tracker = CentroidTracker::new(cfg());
        tracker.update(&[det_at(100.0, 100.0)], 0.0);

        let mut amb = det_at(110.0, 100.0);
        amb.is_ambulance = true;
        amb.label = "ambulance".to_string();
        let tracks = tracker.update(&[amb], 0.033);
        assert!(tracks[0].is_ambulance);
        assert_eq!(tracker.ambulance_tracks().len(), 1);
    }
}
