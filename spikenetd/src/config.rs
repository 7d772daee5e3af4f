use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use spikenet::EngineConfig;

use crate::error::DaemonError;

pub const MAX_TICK_RATE_HZ: u32 = 1000;

/// Optional `config.json` in the data directory. Missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DaemonConfig {
    pub listen_addr: String,
    pub tick_rate_hz: u32,
    /// Ticks between autosaves while running; 0 disables autosave.
    pub autosave_every_ticks: u64,
    /// Start stepping as soon as the daemon is up.
    pub autostart: bool,
    pub engine: EngineConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9877".to_string(),
            tick_rate_hz: 60,
            autosave_every_ticks: 10_000,
            autostart: false,
            engine: EngineConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > MAX_TICK_RATE_HZ {
            return Err(DaemonError::Setting("tickRateHz must be in 1..=1000"));
        }
        if self.listen_addr.trim().is_empty() {
            return Err(DaemonError::Setting("listenAddr must not be empty"));
        }
        self.engine.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = DaemonConfig::load(Path::new("/nonexistent/spikenetd/config.json")).unwrap();
        assert_eq!(cfg, DaemonConfig::default());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: DaemonConfig =
            serde_json::from_str(r#"{"tickRateHz": 200, "engine": {"seed": 9}}"#).unwrap();
        assert_eq!(cfg.tick_rate_hz, 200);
        assert_eq!(cfg.engine.seed, 9);
        assert_eq!(cfg.engine.weight_cap, EngineConfig::default().weight_cap);
        assert_eq!(cfg.listen_addr, "127.0.0.1:9877");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_tick_rate() {
        let cfg = DaemonConfig {
            tick_rate_hz: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(DaemonError::Setting(_))));
    }
}
