// src/analysis/signals.rs
//
// Adaptive signal scheduler. One state machine per lane (GREEN / YELLOW /
// RED) plus a single active-phase scheduler:
//   - green time scales between base and max with lane density, with a
//     small bonus for long stopped queues
//   - fairness: a lane that waited past max_wait_secs is forced next
//   - emergency: an ambulance-present lane preempts everything until the
//     ambulance has been gone for a grace period
//
// Outside emergency mode exactly one lane is non-red at any instant: the
// active green, or the yellow of the phase that is ending.

use crate::analysis::lanes::LaneStats;
use crate::types::SignalConfig;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{info, warn};

const PHASE_HISTORY_CAP: usize = 100;
/// Queue length above which clearing time is added
const QUEUE_BONUS_THRESHOLD: usize = 4;
const QUEUE_BONUS_SECS_PER_VEHICLE: f64 = 1.5;
/// Density at or above this ratio counts as fully dense
const DENSITY_SATURATION: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalState {
    Green,
    Yellow,
    Red,
}

/// Signal state and timing for one lane.
#[derive(Debug, Clone, Serialize)]
pub struct LaneSignal {
    pub name: String,
    pub state: SignalState,
    pub time_left: f64,
    pub last_green: f64,
    pub total_green: f64,
    pub total_wait: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseChange {
    pub lane: String,
    pub time: f64,
    pub duration: f64,
}

pub struct SignalScheduler {
    config: SignalConfig,
    signals: Vec<LaneSignal>,

    active_idx: usize,
    phase_start: f64,
    phase_duration: f64,
    in_yellow: bool,
    yellow_start: f64,

    emergency_active: bool,
    emergency_idx: Option<usize>,
    emergency_start: f64,
    last_ambulance_seen: f64,

    total_cycles: u64,
    last_update: f64,
    phase_history: VecDeque<PhaseChange>,
}

impl SignalScheduler {
    pub fn new(lane_names: &[String], config: SignalConfig, now: f64) -> Self {
        let signals = lane_names
            .iter()
            .map(|name| LaneSignal {
                name: name.clone(),
                state: SignalState::Red,
                time_left: 0.0,
                last_green: now,
                total_green: 0.0,
                total_wait: 0.0,
            })
            .collect();

        let mut scheduler = Self {
            config,
            signals,
            active_idx: 0,
            phase_start: now,
            phase_duration: 0.0,
            in_yellow: false,
            yellow_start: 0.0,
            emergency_active: false,
            emergency_idx: None,
            emergency_start: 0.0,
            last_ambulance_seen: f64::NEG_INFINITY,
            total_cycles: 0,
            last_update: now,
            phase_history: VecDeque::with_capacity(PHASE_HISTORY_CAP),
        };
        if !scheduler.signals.is_empty() {
            scheduler.activate_phase(0, None, now);
        }
        scheduler
    }

    pub fn active_lane(&self) -> &str {
        &self.signals[self.active_idx].name
    }

    pub fn signals(&self) -> &[LaneSignal] {
        &self.signals
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn emergency_active(&self) -> bool {
        self.emergency_active
    }

    pub fn emergency_lane(&self) -> Option<&str> {
        self.emergency_idx.map(|i| self.signals[i].name.as_str())
    }

    pub fn phase_history(&self) -> &VecDeque<PhaseChange> {
        &self.phase_history
    }

    /// Green duration from current lane statistics: density scales between
    /// base and max (saturating at DENSITY_SATURATION), long queues add a
    /// clearing bonus, and the result clamps into [min, max].
    pub fn compute_green_time(&self, stats: &LaneStats) -> f64 {
        let effective = if stats.density_ratio > 0.0 {
            (stats.density_ratio / DENSITY_SATURATION).min(1.0) as f64
        } else {
            0.0
        };
        let mut green = self.config.base_green_secs
            + (self.config.max_green_secs - self.config.base_green_secs) * effective;

        if stats.queue_length > QUEUE_BONUS_THRESHOLD {
            green += (stats.queue_length - QUEUE_BONUS_THRESHOLD) as f64
                * QUEUE_BONUS_SECS_PER_VEHICLE;
        }

        // Bounds applied min-last so a misconfigured min > max still yields
        // a value instead of panicking.
        green.min(self.config.max_green_secs).max(self.config.min_green_secs)
    }

    /// Main scheduler tick. `stats` is the current lane statistics in lane
    /// registration order (the same order the scheduler was built with).
    pub fn update(&mut self, stats: &[LaneStats], now: f64) {
        if self.signals.is_empty() {
            return;
        }

        self.accrue_totals(now);

        // Emergency override path.
        let ambulance_idx = self
            .signals
            .iter()
            .enumerate()
            .find(|(_, sig)| {
                stats
                    .iter()
                    .any(|s| s.name == sig.name && s.ambulance_present)
            })
            .map(|(i, _)| i);

        if let Some(idx) = ambulance_idx {
            self.last_ambulance_seen = now;
            if self.config.ambulance_override
                && (!self.emergency_active || self.emergency_idx != Some(idx))
            {
                self.trigger_emergency(idx, now);
            }
        } else if self.emergency_active
            && now - self.last_ambulance_seen > self.config.emergency_grace_secs
        {
            self.clear_emergency(stats, now);
        }

        if self.emergency_active {
            if let Some(idx) = self.emergency_idx {
                self.signals[idx].time_left =
                    (self.emergency_start + self.config.emergency_green_secs - now).max(0.0);
            }
            return;
        }

        // Yellow transition.
        if self.in_yellow {
            let yellow_elapsed = now - self.yellow_start;
            self.signals[self.active_idx].time_left =
                (self.config.yellow_secs - yellow_elapsed).max(0.0);

            if yellow_elapsed >= self.config.yellow_secs {
                self.in_yellow = false;
                self.signals[self.active_idx].state = SignalState::Red;
                self.advance_phase(stats, now);
            }
            return;
        }

        // Active green phase. Refresh the duration from current stats when
        // available; keep the previous value when the lane's stats are
        // momentarily missing.
        if let Some(s) = stats.iter().find(|s| s.name == self.active_lane()) {
            self.phase_duration = self.compute_green_time(s);
        }

        let elapsed = now - self.phase_start;
        self.signals[self.active_idx].time_left = (self.phase_duration - elapsed).max(0.0);

        if elapsed >= self.phase_duration {
            self.in_yellow = true;
            self.yellow_start = now;
            self.signals[self.active_idx].state = SignalState::Yellow;
            self.signals[self.active_idx].time_left = self.config.yellow_secs;
        }
    }

    /// Cumulative green/wait bookkeeping per lane since the last tick.
    fn accrue_totals(&mut self, now: f64) {
        let dt = (now - self.last_update).max(0.0);
        self.last_update = now;
        for sig in &mut self.signals {
            match sig.state {
                SignalState::Green | SignalState::Yellow => sig.total_green += dt,
                SignalState::Red => sig.total_wait += dt,
            }
        }
    }

    /// Pick the next lane: fairness override first, then priority score.
    fn advance_phase(&mut self, stats: &[LaneStats], now: f64) {
        let mut fairness_candidate: Option<usize> = None;
        let mut longest_wait = 0.0;
        for (i, sig) in self.signals.iter().enumerate() {
            if i == self.active_idx {
                continue;
            }
            let wait = now - sig.last_green;
            if wait > self.config.max_wait_secs && wait > longest_wait {
                fairness_candidate = Some(i);
                longest_wait = wait;
            }
        }

        let next_idx = if let Some(idx) = fairness_candidate {
            info!(
                "fairness override: {} waited {:.0}s, forcing green",
                self.signals[idx].name, longest_wait
            );
            idx
        } else {
            let mut best_idx = (self.active_idx + 1) % self.signals.len();
            let mut best_score = f64::NEG_INFINITY;
            for (i, sig) in self.signals.iter().enumerate() {
                if i == self.active_idx {
                    continue;
                }
                let score = stats
                    .iter()
                    .find(|s| s.name == sig.name)
                    .map(|s| s.priority_score())
                    .unwrap_or(0.0);
                if score > best_score {
                    best_score = score;
                    best_idx = i;
                }
            }
            best_idx
        };

        let next_stats = stats.iter().find(|s| s.name == self.signals[next_idx].name);
        self.activate_phase(next_idx, next_stats, now);
        self.total_cycles += 1;
    }

    fn activate_phase(&mut self, idx: usize, stats: Option<&LaneStats>, now: f64) {
        for sig in &mut self.signals {
            sig.state = SignalState::Red;
            sig.time_left = 0.0;
        }

        self.active_idx = idx;
        self.phase_start = now;
        self.in_yellow = false;
        self.phase_duration = stats
            .map(|s| self.compute_green_time(s))
            .unwrap_or(self.config.base_green_secs);

        let sig = &mut self.signals[idx];
        sig.state = SignalState::Green;
        sig.last_green = now;
        sig.time_left = self.phase_duration;

        info!(
            "phase: {} green for {:.1}s",
            self.signals[idx].name, self.phase_duration
        );

        if self.phase_history.len() >= PHASE_HISTORY_CAP {
            self.phase_history.pop_front();
        }
        self.phase_history.push_back(PhaseChange {
            lane: self.signals[idx].name.clone(),
            time: now,
            duration: self.phase_duration,
        });
    }

    fn trigger_emergency(&mut self, idx: usize, now: f64) {
        warn!(
            "emergency preemption: forcing {} green for ambulance",
            self.signals[idx].name
        );
        self.emergency_active = true;
        self.emergency_idx = Some(idx);
        self.emergency_start = now;
        self.in_yellow = false;

        for sig in &mut self.signals {
            sig.state = SignalState::Red;
            sig.time_left = 0.0;
        }
        let sig = &mut self.signals[idx];
        sig.state = SignalState::Green;
        sig.time_left = self.config.emergency_green_secs;
        sig.last_green = now;
    }

    /// Resume normal scheduling from the pre-emergency active phase.
    fn clear_emergency(&mut self, stats: &[LaneStats], now: f64) {
        info!("emergency cleared, resuming normal scheduling");
        self.emergency_active = false;
        self.emergency_idx = None;
        let resume_stats = stats
            .iter()
            .find(|s| s.name == self.signals[self.active_idx].name);
        self.activate_phase(self.active_idx, resume_stats, now);
    }
}
