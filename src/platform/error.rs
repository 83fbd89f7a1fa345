//! Crate-wide error types.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

pub type LoadflameResult<T> = Result<T, LoadflameError>;

#[derive(Debug, Error)]
pub enum LoadflameError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("server exited during warm-up ({status})")]
    ServerExited { status: ExitStatus },

    #[error("pipeline stage {stage} failed ({status})")]
    StageFailed { stage: String, status: ExitStatus },

    #[error("rendered artifact {} is empty", path.display())]
    EmptyArtifact { path: PathBuf },
}

impl LoadflameError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}

pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const ARTIFACT_CREATED: u8 = SUCCESS;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGUMENTS: u8 = 2;
    /// The run completed but left no flame graph behind.
    pub const NO_ARTIFACT: u8 = 3;
}

impl LoadflameError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidArgument(_) | Self::Config(_) => exit_code::INVALID_ARGUMENTS,
            _ => exit_code::GENERAL_ERROR,
        }
    }
}
