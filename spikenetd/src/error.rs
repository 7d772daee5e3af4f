use std::io;
use std::path::PathBuf;

use spikenet::error::{ConfigError, SnapshotError};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("could not determine data directory")]
    NoDataDir,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Snapshot(#[from] SnapshotError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("invalid daemon setting: {0}")]
    Setting(&'static str),
    #[error("network file not found: {0:?}")]
    NotFound(PathBuf),
}
