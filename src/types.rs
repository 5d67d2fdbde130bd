// src/types.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub video: VideoConfig,
    pub tracker: TrackerConfig,
    pub lanes: Vec<LaneSpec>,
    pub signal: SignalConfig,
    pub incident: IncidentConfig,
    pub scenario: ScenarioConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub frame_width: usize,
    pub frame_height: usize,
    pub target_fps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Ticks a track survives without a matching detection before removal
    pub max_disappeared: u32,
    /// Maximum centroid distance (pixels) for a detection to match a track
    pub max_distance: f32,
    /// Below this speed (pixels/tick) a track counts as stopped
    pub stop_speed_px: f32,
}

/// A named lane region. Polygon points are normalized 0-1 and scaled to the
/// frame resolution at construction; list order decides overlap priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneSpec {
    pub name: String,
    pub polygon: Vec<[f32; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub base_green_secs: f64,
    pub min_green_secs: f64,
    pub max_green_secs: f64,
    pub yellow_secs: f64,
    /// Force a lane green once it has waited this long since its last green
    pub max_wait_secs: f64,
    pub ambulance_override: bool,
    pub emergency_green_secs: f64,
    /// Ambulance must be absent this long before normal scheduling resumes
    pub emergency_grace_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentConfig {
    pub overlap_iou: f32,
    pub collision_confirm_secs: f64,
    /// Candidate pairs where neither vehicle ever stops expire after this
    pub collision_discard_secs: f64,
    pub scene_min_stop_secs: f64,
    pub stall_min_stop_secs: f64,
    pub congestion_vehicle_threshold: usize,
    pub congestion_interval_secs: f64,
    pub crowd_person_threshold: usize,
    pub parking_wait_secs: f64,
    pub alert_expiry_secs: f64,
    pub max_alerts: usize,
    pub history_window_secs: f64,
    pub incident_cooldown_secs: f64,
    pub max_incidents: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub seed: u64,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// One frame from the acquisition source. Pixel payload is opaque to the
/// core; only geometry and timing matter here.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp: f64,
}

/// A single detector output for one frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] pixels
    pub label: String,
    pub confidence: f32,
    pub is_vehicle: bool,
    pub is_person: bool,
    pub is_ambulance: bool,
}

impl Detection {
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
}
