//! Engine configuration, stored at `/cadence/settings/player`.

use nine_s_shell::Shell;
use serde::{Deserialize, Serialize};

use crate::paths;

/// Tunables read once at engine boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Heartbeat period.
    pub heartbeat_ms: u64,
    /// Heartbeat ticks between enforcement sweeps.
    pub sweep_every_ticks: u64,
    /// Minimum spacing of position-driven saves.
    pub save_throttle_ms: u64,
    /// Length cap of the recently-played list.
    pub recent_cap: usize,
    pub probe_timeout_ms: u64,
    pub probe_debounce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 250,
            sweep_every_ticks: 4,
            save_throttle_ms: 1000,
            recent_cap: 100,
            probe_timeout_ms: 10_000,
            probe_debounce_ms: 1000,
        }
    }
}

impl EngineConfig {
    /// Read the settings scroll, falling back to defaults.
    pub fn load(shell: &Shell) -> Self {
        match shell.get(paths::SETTINGS_PLAYER) {
            Ok(Some(scroll)) => match serde_json::from_value::<EngineConfig>(scroll.data) {
                Ok(config) if config.is_valid() => config,
                _ => {
                    log::warn!("cadence: invalid player settings, using defaults");
                    Self::default()
                }
            },
            Ok(None) => Self::default(),
            Err(e) => {
                log::warn!("cadence: reading player settings failed: {}", e);
                Self::default()
            }
        }
    }

    /// Zero periods would spin the heartbeat or disable the sweep.
    pub fn is_valid(&self) -> bool {
        self.heartbeat_ms > 0 && self.sweep_every_ticks > 0 && self.recent_cap > 0
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
