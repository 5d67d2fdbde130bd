// src/sim.rs
//
// Synthetic intersection scenario for running the pipeline without a camera
// or a detection model. Deterministic given the same seed: vehicle paths are
// pure functions of the frame timestamp, and the per-detection jitter is
// derived from the seed plus the tick index.
//
// The script covers the interesting paths: steady flow in every quadrant, a
// queue that builds up in one lane, a two-car contact that ends with both
// stopped, an ambulance passage, and a pair of pedestrians.

use crate::source::{Detector, FrameSource};
use crate::types::{Detection, Frame};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CAR_SIZE: f32 = 56.0;
const PERSON_W: f32 = 18.0;
const PERSON_H: f32 = 42.0;
/// Scripted contact moment for the collision pair
const CRASH_AT_SECS: f64 = 18.0;
const AMBULANCE_FROM_SECS: f64 = 30.0;
const AMBULANCE_TO_SECS: f64 = 42.0;

/// Frame generator pacing a fixed-length synthetic clip.
pub struct SyntheticSource {
    width: usize,
    height: usize,
    fps: f64,
    total_frames: u64,
    emitted: u64,
}

impl SyntheticSource {
    pub fn new(width: usize, height: usize, fps: f64, duration_secs: f64) -> Self {
        Self {
            width,
            height,
            fps,
            total_frames: (duration_secs * fps).max(1.0) as u64,
            emitted: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.emitted >= self.total_frames {
            return Ok(None);
        }
        let timestamp = self.emitted as f64 / self.fps;
        self.emitted += 1;
        Ok(Some(Frame {
            data: Vec::new(),
            width: self.width,
            height: self.height,
            timestamp,
        }))
    }

    fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

/// Scripted stand-in for the detection model.
pub struct ScriptedDetector {
    seed: u64,
    width: f32,
    height: f32,
}

impl ScriptedDetector {
    pub fn new(seed: u64, width: usize, height: usize) -> Self {
        Self {
            seed,
            width: width as f32,
            height: height as f32,
        }
    }

    fn car(&self, cx: f32, cy: f32, jitter: (f32, f32)) -> Detection {
        let half = CAR_SIZE * 0.5;
        let cx = (cx + jitter.0).clamp(half, self.width - half);
        let cy = (cy + jitter.1).clamp(half, self.height - half);
        Detection {
            bbox: [cx - half, cy - half, cx + half, cy + half],
            label: "car".to_string(),
            confidence: 0.85,
            is_vehicle: true,
            is_person: false,
            is_ambulance: false,
        }
    }

    fn person(&self, cx: f32, cy: f32) -> Detection {
        Detection {
            bbox: [
                cx - PERSON_W * 0.5,
                cy - PERSON_H * 0.5,
                cx + PERSON_W * 0.5,
                cy + PERSON_H * 0.5,
            ],
            label: "person".to_string(),
            confidence: 0.8,
            is_vehicle: false,
            is_person: true,
            is_ambulance: false,
        }
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let t = frame.timestamp;
        let tick = (t * 30.0) as u64;
        let mut rng = StdRng::seed_from_u64(self.seed ^ tick);
        let mut jitter = || -> (f32, f32) {
            (rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
        };

        let (w, h) = (self.width, self.height);
        let mut dets = Vec::new();

        // North quadrant: three cars circulating left to right.
        for i in 0..3 {
            let offset = i as f32 * 0.28;
            let x = ((t * 0.05 + offset as f64) % 0.45) as f32 * w;
            dets.push(self.car(x + 30.0, h * 0.15 + i as f32 * 60.0, jitter()));
        }

        // South quadrant: a queue that compresses over time.
        let queue_len = 2 + ((t / 12.0) as usize).min(4);
        for i in 0..queue_len {
            let x = w * 0.95 - i as f32 * (CAR_SIZE + 14.0);
            dets.push(self.car(x, h * 0.25, jitter()));
        }

        // East quadrant: two cars converge until contact, then sit still.
        let gap = ((CRASH_AT_SECS - t).max(0.0) * 9.0) as f32;
        let contact_x = w * 0.2;
        dets.push(self.car(contact_x - gap - CAR_SIZE * 0.45, h * 0.75, (0.0, 0.0)));
        dets.push(self.car(contact_x + gap + CAR_SIZE * 0.45, h * 0.75, (0.0, 0.0)));

        // West quadrant: the ambulance crosses during its window.
        if (AMBULANCE_FROM_SECS..AMBULANCE_TO_SECS).contains(&t) {
            let progress = ((t - AMBULANCE_FROM_SECS) / (AMBULANCE_TO_SECS - AMBULANCE_FROM_SECS))
                as f32;
            let cx = w * 0.55 + progress * w * 0.4;
            let half = CAR_SIZE * 0.6;
            dets.push(Detection {
                bbox: [cx - half, h * 0.8 - half, cx + half, h * 0.8 + half],
                label: "ambulance".to_string(),
                confidence: 0.9,
                is_vehicle: true,
                is_person: false,
                is_ambulance: true,
            });
        }

        // Two pedestrians idling on the far corner, away from every
        // scripted vehicle path.
        dets.push(self.person(w * 0.72, h * 0.55));
        dets.push(self.person(w * 0.76, h * 0.57));

        Ok(dets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_at(t: f64) -> Frame {
        Frame {
            data: Vec::new(),
            width: 1280,
            height: 720,
            timestamp: t,
        }
    }

    #[test]
    fn test_source_ends_after_duration() {
        let mut source = SyntheticSource::new(1280, 720, 30.0, 1.0);
        let mut frames = 0;
        while let Some(_frame) = source.next_frame().unwrap() {
            frames += 1;
        }
        assert_eq!(frames, 30);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_detector_is_deterministic_for_same_seed() {
        let mut a = ScriptedDetector::new(7, 1280, 720);
        let mut b = ScriptedDetector::new(7, 1280, 720);
        let da = a.detect(&frame_at(5.0)).unwrap();
        let db = b.detect(&frame_at(5.0)).unwrap();
        assert_eq!(da.len(), db.len());
        for (x, y) in da.iter().zip(db.iter()) {
            assert_eq!(x.bbox, y.bbox);
            assert_eq!(x.label, y.label);
        }
    }

    #[test]
    fn test_ambulance_appears_only_in_window() {
        let mut det = ScriptedDetector::new(7, 1280, 720);
        assert!(!det
            .detect(&frame_at(10.0))
            .unwrap()
            .iter()
            .any(|d| d.is_ambulance));
        assert!(det
            .detect(&frame_at(35.0))
            .unwrap()
            .iter()
            .any(|d| d.is_ambulance));
        assert!(!det
            .detect(&frame_at(50.0))
            .unwrap()
            .iter()
            .any(|d| d.is_ambulance));
    }

    #[test]
    fn test_collision_pair_holds_position_after_contact() {
        let mut det = ScriptedDetector::new(7, 1280, 720);
        let before = det.detect(&frame_at(CRASH_AT_SECS + 1.0)).unwrap();
        let after = det.detect(&frame_at(CRASH_AT_SECS + 2.0)).unwrap();
        // The scripted pair carries no jitter, so their boxes freeze.
        let pair =
            |dets: &[Detection]| -> Vec<[f32; 4]> {
                dets.iter()
                    .filter(|d| d.is_vehicle && (d.bbox[3] - 540.0).abs() < 60.0)
                    .map(|d| d.bbox)
                    .collect()
            };
        assert_eq!(pair(&before), pair(&after));
    }
}
