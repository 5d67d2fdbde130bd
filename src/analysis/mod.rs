// src/analysis/mod.rs
//
// The decision core, one module per stage of the analysis chain:
//   tracker   - persistent identities from per-frame detections
//   lanes     - lane assignment and per-lane occupancy statistics
//   signals   - adaptive phase scheduling with fairness and preemption
//   incidents - accident heuristics, alerts, and history windows

pub mod incidents;
pub mod lanes;
pub mod signals;
pub mod tracker;
