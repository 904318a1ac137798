//! Fleet control plane: sqlite-backed persistence, the robot registry, the
//! auto-schedule engine, the fleet dispatcher, the mission-run state machine
//! and a thin HTTP surface for operators and the robot interface.

use thiserror::Error;

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod registry;
pub mod scheduler;
pub mod sites;
pub mod store;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] armada_core::Error),
    #[error("sqlite error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
