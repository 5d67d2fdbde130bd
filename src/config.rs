use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;
use tracing::warn;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config from {path}"))?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.sanity_check();
        Ok(config)
    }

    /// Out-of-range values are warned about, never fatal. Computed timings
    /// get clamped downstream anyway.
    fn sanity_check(&self) {
        if self.signal.min_green_secs > self.signal.max_green_secs {
            warn!(
                "signal.min_green_secs ({}) exceeds max_green_secs ({}); durations will clamp to max",
                self.signal.min_green_secs, self.signal.max_green_secs
            );
        }
        if self.lanes.is_empty() {
            warn!("no lanes configured; every track will stay unassigned");
        }
        for lane in &self.lanes {
            if lane.polygon.len() < 3 {
                warn!("lane '{}' polygon has fewer than 3 points", lane.name);
            }
        }
    }
}
