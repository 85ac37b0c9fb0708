//! Device identifier.

use std::fmt;
use std::path::Path;

use tracing::info;
use uuid::Uuid;

use crate::error::StartupError;

const DEVICE_ID_FILE: &str = "device.id";
const MAX_SIMULATED_ID_LEN: usize = 64;

/// The endpoint a session speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
    /// Stable per data directory, generated on first use.
    Real(Uuid),
    /// Caller-chosen id, used verbatim.
    Simulated(String),
}

impl Device {
    /// Load the persisted device id from `data_dir`, creating one if needed.
    pub fn real(data_dir: &Path) -> Result<Self, StartupError> {
        let path = data_dir.join(DEVICE_ID_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Uuid::parse_str(raw.trim()).map(Self::Real).map_err(|e| {
                StartupError::ModuleStartup(format!(
                    "Device id file {} is corrupt: {e}",
                    path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let id = Uuid::new_v4();
                std::fs::create_dir_all(data_dir)
                    .and_then(|()| std::fs::write(&path, id.to_string()))
                    .map_err(|e| {
                        StartupError::ModuleStartup(format!(
                            "Cannot persist device id to {}: {e}",
                            path.display()
                        ))
                    })?;
                info!(device_id = %id, "Generated device id");
                Ok(Self::Real(id))
            }
            Err(e) => Err(StartupError::ModuleStartup(format!(
                "Cannot read device id from {}: {e}",
                path.display()
            ))),
        }
    }

    /// Validate a caller-supplied simulated device id.
    pub fn simulated(id: &str) -> Result<Self, StartupError> {
        let valid = !id.is_empty()
            && id.len() <= MAX_SIMULATED_ID_LEN
            && !id.chars().all(|c| c == '.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(StartupError::ModuleStartup(format!(
                "Invalid simulated device id {id:?}"
            )));
        }
        Ok(Self::Simulated(id.to_string()))
    }

    pub const fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }

    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(id) => id.fmt(f),
            Self::Simulated(id) => f.write_str(id),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn real_device_id_is_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let first = Device::real(tmp.path()).unwrap();
        let second = Device::real(tmp.path()).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_simulated());
        assert!(tmp.path().join(DEVICE_ID_FILE).is_file());
    }

    #[test]
    fn corrupt_device_id_fails_startup() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(DEVICE_ID_FILE), "not-a-uuid").unwrap();
        assert!(matches!(
            Device::real(tmp.path()),
            Err(StartupError::ModuleStartup(_))
        ));
    }

    #[test]
    fn simulated_ids_are_restricted() {
        assert_eq!(
            Device::simulated("sim-01").unwrap().id(),
            "sim-01".to_string()
        );
        assert!(Device::simulated("").is_err());
        assert!(Device::simulated("has space").is_err());
        assert!(Device::simulated("../escape").is_err());
        assert!(Device::simulated("..").is_err());
        assert!(Device::simulated(&"x".repeat(65)).is_err());
    }
}
