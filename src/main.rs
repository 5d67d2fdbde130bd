// src/main.rs

mod analysis;
mod config;
mod pipeline;
mod sim;
mod snapshot;
mod source;
mod types;

use anyhow::Result;
use pipeline::{Pipeline, SnapshotCallback};
use sim::{ScriptedDetector, SyntheticSource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Status line cadence, in published snapshots
const STATUS_EVERY: u64 = 60;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("greenwave=info")),
        )
        .init();

    info!("🚦 Traffic De-Congestion Core Starting");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = types::Config::load(&config_path)?;
    info!("✓ Configuration loaded from {config_path}");
    info!(
        "Lanes: {} | signal green [{:.0}s..{:.0}s] | fairness cap {:.0}s",
        config.lanes.len(),
        config.signal.min_green_secs,
        config.signal.max_green_secs,
        config.signal.max_wait_secs
    );

    let (width, height) = (config.video.frame_width, config.video.frame_height);
    let source = Box::new(SyntheticSource::new(
        width,
        height,
        config.video.target_fps,
        config.scenario.duration_secs,
    ));
    let detector = Box::new(ScriptedDetector::new(config.scenario.seed, width, height));
    info!(
        "✓ Synthetic scenario ready (seed={}, {:.0}s)",
        config.scenario.seed, config.scenario.duration_secs
    );

    let publish_count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&publish_count);
    // The same snapshot can be republished when acquisition outpaces
    // analysis; only log alerts the first time their snapshot appears.
    let last_seen = Arc::new(AtomicU64::new(0));
    let on_state: SnapshotCallback = Box::new(move |snap| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n % STATUS_EVERY == 0 {
            info!(
                "tick {:>5} | fps {:>5.1} | vehicles {:>2} | active {} | alerts {} | {}",
                n,
                snap.metrics.fps,
                snap.metrics.total_vehicles,
                snap.signals.active_lane,
                snap.alerts.len(),
                if snap.signals.emergency_active {
                    "🚑 EMERGENCY"
                } else {
                    "normal"
                }
            );
        }
        let stamp = snap.timestamp.to_bits();
        if last_seen.swap(stamp, Ordering::Relaxed) != stamp {
            for alert in snap.alerts.iter().filter(|a| a.age == 0.0) {
                warn!("🚨 [{}/{}] {}", alert.kind, alert.severity, alert.message);
            }
        }
        Ok(())
    });

    let pipeline = Pipeline::start(config, source, detector, Some(on_state))?;

    while pipeline.is_running() {
        std::thread::sleep(Duration::from_millis(200));
    }

    let final_snapshot = pipeline.snapshot();
    pipeline.stop();

    if let Some(snap) = final_snapshot {
        info!("\n📊 Final Report:");
        info!("  Uptime: {:.0}s", snap.metrics.session_uptime_secs);
        info!("  Peak simultaneous vehicles: {}", snap.metrics.peak_vehicles);
        info!("  Accidents confirmed: {}", snap.metrics.total_accidents);
        info!("  Emergency activations: {}", snap.metrics.total_emergency);
        info!("  Signal cycles completed: {}", snap.signals.total_cycles);
        for lane in &snap.metrics.lanes {
            info!(
                "  {}: {} vehicles | density {:.0}% | queue {} | {}",
                lane.name,
                lane.vehicles,
                lane.density * 100.0,
                lane.queue,
                lane.congestion
            );
        }
        println!("{}", serde_json::to_string_pretty(&snap)?);
    } else {
        warn!("run ended before any snapshot was published");
    }

    Ok(())
}
