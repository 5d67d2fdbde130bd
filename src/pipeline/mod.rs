// src/pipeline/mod.rs
//
// Two-stage realtime orchestrator.
//
// The acquisition stage pulls frames at the target rate and republishes the
// latest analysis snapshot to the subscriber. The analysis stage runs the
// detector -> tracker -> lanes -> signals -> incidents chain continuously
// against whatever frame is newest when its tick begins; it may skip frames
// when slow, and acquisition may republish a stale snapshot when fast.
// The only interchange is the mutex-guarded SharedState block.
//
// Shutdown is cooperative: both loops watch one running flag, and stop()
// waits a bounded time for each stage's exit ack before joining.

pub mod shared;

use crate::analysis::incidents::IncidentAnalyzer;
use crate::analysis::lanes::LaneMap;
use crate::analysis::signals::SignalScheduler;
use crate::analysis::tracker::CentroidTracker;
use crate::snapshot::{AlertView, SignalMetrics, SignalView, StateSnapshot};
use crate::source::{Detector, FrameSource};
use crate::types::Config;
use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender};
use shared::SharedState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Idle backoff for the analysis stage while no frame exists yet
const NO_FRAME_SLEEP: Duration = Duration::from_millis(10);
/// Breather between analysis ticks so the lock is not hammered
const TICK_SLEEP: Duration = Duration::from_millis(10);
/// Bounded wait for each stage to acknowledge shutdown
const JOIN_TIMEOUT: Duration = Duration::from_secs(3);

pub type SnapshotCallback = Box<dyn Fn(&StateSnapshot) -> Result<()> + Send>;

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub struct Pipeline {
    shared: Arc<Mutex<SharedState>>,
    running: Arc<AtomicBool>,
    stages: Vec<(&'static str, JoinHandle<()>, Receiver<()>)>,
}

impl Pipeline {
    /// Spawn both stages and return immediately.
    pub fn start(
        config: Config,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        on_state: Option<SnapshotCallback>,
    ) -> Result<Self> {
        // Validate lane geometry up front; the analysis thread gets its own
        // instance built from the same specs.
        LaneMap::new(&config.lanes, config.video.frame_width, config.video.frame_height)?;

        let shared = Arc::new(Mutex::new(SharedState::default()));
        let running = Arc::new(AtomicBool::new(true));

        let (acq_done_tx, acq_done_rx) = bounded::<()>(1);
        let (ana_done_tx, ana_done_rx) = bounded::<()>(1);

        let acq_handle = {
            let shared = Arc::clone(&shared);
            let running = Arc::clone(&running);
            let interval = 1.0 / config.video.target_fps.max(1.0);
            std::thread::spawn(move || {
                acquisition_loop(source, shared, running, interval, on_state, acq_done_tx);
            })
        };

        let ana_handle = {
            let shared = Arc::clone(&shared);
            let running = Arc::clone(&running);
            let config = config.clone();
            std::thread::spawn(move || {
                analysis_loop(config, detector, shared, running, ana_done_tx);
            })
        };

        info!("pipeline started: acquisition + analysis stages running");

        Ok(Self {
            shared,
            running,
            stages: vec![
                ("acquisition", acq_handle, acq_done_rx),
                ("analysis", ana_handle, ana_done_rx),
            ],
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Immutable copy of the latest published snapshot, taken under the lock.
    pub fn snapshot(&self) -> Option<StateSnapshot> {
        self.shared.lock().ok()?.published.clone()
    }

    /// Cooperative shutdown with a bounded wait per stage.
    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        for (name, handle, done_rx) in self.stages {
            match done_rx.recv_timeout(JOIN_TIMEOUT) {
                Ok(()) => {
                    let _ = handle.join();
                    info!("{name} stage stopped");
                }
                Err(_) => {
                    warn!("{name} stage did not acknowledge shutdown in time");
                }
            }
        }
    }
}

fn acquisition_loop(
    mut source: Box<dyn FrameSource>,
    shared: Arc<Mutex<SharedState>>,
    running: Arc<AtomicBool>,
    interval: f64,
    on_state: Option<SnapshotCallback>,
    done: Sender<()>,
) {
    while running.load(Ordering::Relaxed) {
        let tick_start = now_secs();

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("frame source exhausted, stopping pipeline");
                running.store(false, Ordering::Relaxed);
                break;
            }
            Err(e) => {
                error!("frame read failed, stopping pipeline: {e}");
                running.store(false, Ordering::Relaxed);
                break;
            }
        };

        // Short critical section: store the frame, copy out the snapshot.
        let published = {
            let mut state = match shared.lock() {
                Ok(state) => state,
                Err(_) => break,
            };
            state.frame = Some(frame);
            state.published.clone()
        };

        // A failed publish never halts the loop.
        if let (Some(cb), Some(snapshot)) = (on_state.as_ref(), published) {
            if let Err(e) = cb(&snapshot) {
                warn!("snapshot publish failed: {e}");
            }
        }

        let elapsed = now_secs() - tick_start;
        let remaining = interval - elapsed;
        if remaining > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(remaining));
        }
    }
    let _ = done.send(());
}

fn analysis_loop(
    config: Config,
    mut detector: Box<dyn Detector>,
    shared: Arc<Mutex<SharedState>>,
    running: Arc<AtomicBool>,
    done: Sender<()>,
) {
    let mut tracker = CentroidTracker::new(config.tracker.clone());
    let mut lanes = match LaneMap::new(
        &config.lanes,
        config.video.frame_width,
        config.video.frame_height,
    ) {
        Ok(lanes) => lanes,
        Err(e) => {
            error!("lane construction failed: {e}");
            running.store(false, Ordering::Relaxed);
            let _ = done.send(());
            return;
        }
    };
    let start = now_secs();
    let mut signals = SignalScheduler::new(&lanes.names(), config.signal.clone(), start);
    let mut incidents = IncidentAnalyzer::new(config.incident.clone(), lanes.names(), start);

    while running.load(Ordering::Relaxed) {
        // Copy the newest frame out; never hold the lock across the tick.
        let frame = match shared.lock() {
            Ok(state) => state.frame.clone(),
            Err(_) => break,
        };
        let Some(frame) = frame else {
            std::thread::sleep(NO_FRAME_SLEEP);
            continue;
        };

        let now = now_secs();
        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                // Transient: skip this tick, keep prior state.
                debug!("detector failed this tick: {e}");
                std::thread::sleep(TICK_SLEEP);
                continue;
            }
        };

        let mut tracks = tracker.update(&detections, now);
        let lane_stats = lanes.update(&mut tracks, now).to_vec();
        signals.update(&lane_stats, now);
        incidents.update(&tracks, &lane_stats, &detections, now);

        let snapshot = build_snapshot(&signals, &incidents, now);

        if let Ok(mut state) = shared.lock() {
            state.detections = detections;
            state.tracks = tracks;
            state.lane_stats = lane_stats;
            state.published = Some(snapshot);
        } else {
            break;
        }

        std::thread::sleep(TICK_SLEEP);
    }
    let _ = done.send(());
}

fn build_snapshot(
    signals: &SignalScheduler,
    incidents: &IncidentAnalyzer,
    now: f64,
) -> StateSnapshot {
    let metrics = incidents
        .metrics()
        .cloned()
        .expect("metrics exist after the first incidents tick");

    StateSnapshot {
        timestamp: now,
        metrics,
        alerts: incidents
            .alerts()
            .iter()
            .map(|a| AlertView::from_alert(a, now))
            .collect(),
        signals: SignalMetrics {
            signals: signals.signals().iter().map(SignalView::from).collect(),
            active_lane: signals.active_lane().to_string(),
            total_cycles: signals.total_cycles(),
            emergency_active: signals.emergency_active(),
            emergency_lane: signals.emergency_lane().map(str::to_string),
        },
        chart: incidents.chart_data(now),
        incidents: incidents.incidents().iter().cloned().collect(),
    }
}
