// src/pipeline/shared.rs
//
// The single lock-guarded interchange block between the two pipeline
// stages. Acquisition writes the latest frame; analysis writes its latest
// products. Every access is a short copy-in or copy-out; the guarded
// structures are never handed out by reference.

use crate::analysis::lanes::LaneStats;
use crate::analysis::tracker::Track;
use crate::snapshot::StateSnapshot;
use crate::types::{Detection, Frame};

#[derive(Default)]
pub struct SharedState {
    /// Most recently acquired frame, overwritten each acquisition tick
    pub frame: Option<Frame>,
    /// Latest analysis products, for overlay and publishing
    pub detections: Vec<Detection>,
    pub tracks: Vec<Track>,
    pub lane_stats: Vec<LaneStats>,
    /// Latest consumer-facing snapshot assembled by the analysis stage
    pub published: Option<StateSnapshot>,
}
