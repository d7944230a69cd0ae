//! Error types shared across the crate.
//!
//! Fatal errors (bad input, unusable log, watcher start-up) travel as
//! [`DropsiftError`]. Per-file problems are not errors at this level: the mover
//! reports them through [`crate::file_organizer::MoveOutcome`] so that one file
//! can never abort a batch or a watch cycle.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that abort an organize, undo or watch run.
#[derive(Error, Debug)]
pub enum DropsiftError {
    /// The source directory or a mapping file is unusable.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The settings file could not be loaded or compiled.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Undo was requested but there is no log to replay.
    #[error("Action log not available: {}", path.display())]
    LogUnavailable { path: PathBuf },

    /// Appending to the action log failed.
    #[error("Failed to write action log {}: {source}", path.display())]
    LogWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Reading the action log failed.
    #[error("Failed to read action log {}: {source}", path.display())]
    LogRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// The platform watcher could not be started.
    #[error("Failed to start watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DropsiftError {
    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that mean the run could not start: bad arguments,
    /// missing prerequisites, unusable configuration.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. }
                | Self::Config(_)
                | Self::LogUnavailable { .. }
                | Self::Watch(_)
        )
    }
}

/// Result type used throughout the crate.
pub type DropsiftResult<T> = Result<T, DropsiftError>;
