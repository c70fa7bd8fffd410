// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

use crate::gesture::Gesture;

/// Frame source could not produce frames. Always fatal to the loop.
#[derive(Debug, Error)]
pub enum PerceptionError {
    #[error("camera unavailable: {0}")]
    Camera(String),

    #[error("landmark detector failed: {0}")]
    Detector(String),

    #[error("replay file {path}: line {line}: {message}")]
    Replay {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A device command did not complete. Logged, never fatal.
#[derive(Debug, Error)]
pub enum EffectorFailure {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    ExitStatus {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("action worker for {0} is gone")]
    WorkerGone(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no action registered for gesture `{0}`")]
    UnregisteredGesture(Gesture),

    #[error("gesture `{0}` cannot be bound to an action")]
    NotActionable(Gesture),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
