// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Last known state of the switch outputs, kept across restarts so the
//! charge-enable line comes back the way the user left it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::signal::LogicalLevel;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    charging: bool,
}

pub struct LastKnownState {
    path: PathBuf,
}

impl LastKnownState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LastKnownState { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Charge-enable level to restore. Anything unreadable counts as `Inactive`.
    pub fn charging(&self) -> LogicalLevel {
        match fs::read_to_string(&self.path) {
            Ok(text) => match toml::from_str::<Snapshot>(&text) {
                Ok(snapshot) => LogicalLevel::from(snapshot.charging),
                Err(e) => {
                    warn!("Ignoring unreadable state file {}: {}", self.path.display(), e);
                    LogicalLevel::Inactive
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No previous state at {}", self.path.display());
                LogicalLevel::Inactive
            }
            Err(e) => {
                warn!("Cannot read state file {}: {}", self.path.display(), e);
                LogicalLevel::Inactive
            }
        }
    }

    pub fn store_charging(&self, level: LogicalLevel) {
        if let Err(e) = self.write(Snapshot {
            charging: level.is_active(),
        }) {
            warn!("Cannot write state file {}: {}", self.path.display(), e);
        }
    }

    fn write(&self, snapshot: Snapshot) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let text = toml::to_string(&snapshot)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_restores_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let state = LastKnownState::new(dir.path().join("state.toml"));
        assert_eq!(state.charging(), LogicalLevel::Inactive);
    }

    #[test]
    fn stored_level_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.toml");
        let state = LastKnownState::new(&path);

        state.store_charging(LogicalLevel::Active);
        assert_eq!(LastKnownState::new(&path).charging(), LogicalLevel::Active);

        state.store_charging(LogicalLevel::Inactive);
        assert_eq!(state.charging(), LogicalLevel::Inactive);
    }

    #[test]
    fn garbage_file_restores_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "charging = [").unwrap();
        assert_eq!(LastKnownState::new(path).charging(), LogicalLevel::Inactive);
    }
}
