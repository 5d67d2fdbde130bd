// src/source.rs
//
// Boundary traits for the two external collaborators: the frame source and
// the detection model. The core never schedules either on its own; the
// acquisition stage pulls frames at the target rate and the analysis stage
// runs the detector exactly once per tick on the latest frame.

use crate::types::{Detection, Frame};
use anyhow::Result;

/// Supplies frames of a fixed, known resolution. `Ok(None)` signals end of
/// stream; the core does not rewind or reopen the source.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn resolution(&self) -> (usize, usize);
}

/// Produces the ordered detection list for one frame.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}
