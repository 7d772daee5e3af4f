//! Error types for the fallible edges of the engine.
//!
//! The simulation itself never fails: invalid references are ignored and
//! numeric edge cases are clamped. Only configuration validation and snapshot
//! I/O report errors.

use std::io;

/// Result alias for snapshot I/O.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad network image magic")]
    BadMagic,

    #[error("unsupported network image version {0}")]
    UnsupportedVersion(u32),

    #[error("network image payload failed to decompress")]
    Decompress,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid engine config: {0}")]
    Engine(&'static str),

    #[error("invalid module descriptor: {0}")]
    Module(&'static str),
}
