// Geekworm X728 UPS Daemon
// License: GPL-3.0

use thiserror::Error;

use crate::hal::HalError;

#[derive(Debug, Error)]
pub enum UpsError {
    /// Chip absent, offline or already closed.
    #[error("GPIO chip unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("GPIO line {line} is already claimed")]
    AlreadyClaimed { line: u8 },

    #[error("line request for GPIO {line} has been released")]
    InvalidHandle { line: u8 },

    #[error("GPIO {line} is busy with a pulse")]
    Busy { line: u8 },

    /// Fuel-gauge register read failed.
    #[error("bus read failed: {0}")]
    ReadFailure(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, UpsError>;

impl UpsError {
    /// Maps a backend error raised while acquiring `line`.
    pub(crate) fn from_hal(line: u8, err: HalError) -> Self {
        match err {
            HalError::LineBusy(_) => UpsError::AlreadyClaimed { line },
            other => UpsError::ResourceUnavailable(other.to_string()),
        }
    }
}
