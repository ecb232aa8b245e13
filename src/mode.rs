use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const MODE_FILE_NAME: &str = "storage_mode.toml";
const CURRENT_VERSION: u32 = 1;

/// Which persistence system is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Device-local mirror only.
    Local,
    /// Shared REST server.
    #[default]
    Server,
    /// Spreadsheet script endpoint.
    Sheets,
}

impl StorageMode {
    /// Label shown in the settings screen.
    pub fn display_name(&self) -> &'static str {
        match self {
            StorageMode::Local => "ローカルストレージ",
            StorageMode::Server => "サーバー（共有データベース）",
            StorageMode::Sheets => "Googleスプレッドシート",
        }
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Local => write!(f, "local"),
            StorageMode::Server => write!(f, "server"),
            StorageMode::Sheets => write!(f, "sheets"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageMode::Local),
            "server" | "api" => Ok(StorageMode::Server),
            "sheets" | "gas" | "spreadsheet" => Ok(StorageMode::Sheets),
            _ => Err(anyhow::anyhow!("Unknown storage mode: {}", s)),
        }
    }
}

/// Saved spreadsheet connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetsConnection {
    pub gas_url: String,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMode {
    pub version: u32,
    pub mode: StorageMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheets: Option<SheetsConnection>,
}

impl PersistedMode {
    pub fn new(mode: StorageMode) -> Self {
        Self {
            version: CURRENT_VERSION,
            mode,
            sheets: None,
        }
    }
}

/// Tracks the mode the session is running in and the saved preference.
///
/// The two differ when the preferred backend was unreachable at startup:
/// the session then runs locally but the preference is left alone so the
/// next session tries again.
pub struct ModeController {
    path: PathBuf,
    persisted: Mutex<PersistedMode>,
    active: Mutex<StorageMode>,
}

impl ModeController {
    /// Load the saved preference from `data_dir`, falling back to
    /// `default_mode` when nothing usable is there.
    pub fn load(data_dir: &Path, default_mode: StorageMode) -> Self {
        let path = data_dir.join(MODE_FILE_NAME);
        let persisted = load_persisted(&path).unwrap_or_else(|| PersistedMode::new(default_mode));
        Self {
            path,
            active: Mutex::new(StorageMode::Local),
            persisted: Mutex::new(persisted),
        }
    }

    fn persisted(&self) -> MutexGuard<'_, PersistedMode> {
        self.persisted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mode the current session is running in.
    pub fn current(&self) -> StorageMode {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode_name(&self) -> &'static str {
        self.current().display_name()
    }

    /// Saved preference.
    pub fn preferred(&self) -> StorageMode {
        self.persisted().mode
    }

    /// Change the session mode without touching the saved preference.
    pub fn set_active(&self, mode: StorageMode) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// Change the session mode and save it as the preference.
    pub fn switch_to(&self, mode: StorageMode) -> Result<()> {
        self.set_active(mode);
        let mut persisted = self.persisted();
        persisted.mode = mode;
        self.save(&persisted)
    }

    /// Saved spreadsheet connection, only if it was marked connected.
    pub fn sheets_connection(&self) -> Option<SheetsConnection> {
        self.persisted().sheets.clone().filter(|c| c.connected && !c.gas_url.is_empty())
    }

    pub fn set_sheets_connection(&self, gas_url: &str) -> Result<()> {
        let mut persisted = self.persisted();
        persisted.sheets = Some(SheetsConnection {
            gas_url: gas_url.to_string(),
            connected: true,
        });
        self.save(&persisted)
    }

    pub fn clear_sheets_connection(&self) -> Result<()> {
        let mut persisted = self.persisted();
        persisted.sheets = None;
        self.save(&persisted)
    }

    fn save(&self, persisted: &PersistedMode) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        let contents = toml::to_string_pretty(persisted)
            .context("Failed to serialize storage mode to TOML")?;
        fs::write(&self.path, contents).context("Failed to write storage mode file")?;
        Ok(())
    }
}

fn load_persisted(path: &Path) -> Option<PersistedMode> {
    if !path.exists() {
        return None;
    }

    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Could not read storage mode file: {}", e);
            return None;
        }
    };

    match toml::from_str(&contents) {
        Ok(persisted) => Some(persisted),
        Err(e) => {
            tracing::warn!("Storage mode file corrupt, using defaults: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str_and_display() {
        assert_eq!("local".parse::<StorageMode>().unwrap(), StorageMode::Local);
        assert_eq!("Sheets".parse::<StorageMode>().unwrap(), StorageMode::Sheets);
        assert!("ftp".parse::<StorageMode>().is_err());
        assert_eq!(StorageMode::Server.to_string(), "server");
        assert_eq!(StorageMode::Sheets.display_name(), "Googleスプレッドシート");
    }

    #[test]
    fn test_defaults_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let modes = ModeController::load(dir.path(), StorageMode::Server);

        assert_eq!(modes.preferred(), StorageMode::Server);
        assert_eq!(modes.current(), StorageMode::Local);
        assert!(modes.sheets_connection().is_none());
    }

    #[test]
    fn test_switch_persists_preference() {
        let dir = tempfile::tempdir().unwrap();
        {
            let modes = ModeController::load(dir.path(), StorageMode::Server);
            modes.switch_to(StorageMode::Local).unwrap();
            assert_eq!(modes.current(), StorageMode::Local);
        }
        let modes = ModeController::load(dir.path(), StorageMode::Server);
        assert_eq!(modes.preferred(), StorageMode::Local);
    }

    #[test]
    fn test_set_active_does_not_persist() {
        let dir = tempfile::tempdir().unwrap();
        let modes = ModeController::load(dir.path(), StorageMode::Server);
        modes.set_active(StorageMode::Local);
        assert_eq!(modes.current(), StorageMode::Local);
        assert_eq!(modes.preferred(), StorageMode::Server);
        assert!(!dir.path().join(MODE_FILE_NAME).exists());
    }

    #[test]
    fn test_sheets_connection_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://script.google.com/macros/s/abc/exec";
        {
            let modes = ModeController::load(dir.path(), StorageMode::Server);
            modes.set_sheets_connection(url).unwrap();
            modes.switch_to(StorageMode::Sheets).unwrap();
        }
        let modes = ModeController::load(dir.path(), StorageMode::Server);
        assert_eq!(modes.preferred(), StorageMode::Sheets);
        assert_eq!(modes.sheets_connection().unwrap().gas_url, url);

        modes.clear_sheets_connection().unwrap();
        assert!(modes.sheets_connection().is_none());
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MODE_FILE_NAME), "this is not valid [[ toml").unwrap();
        let modes = ModeController::load(dir.path(), StorageMode::Local);
        assert_eq!(modes.preferred(), StorageMode::Local);
    }

    #[test]
    fn test_persisted_file_format() {
        let mut persisted = PersistedMode::new(StorageMode::Sheets);
        persisted.sheets = Some(SheetsConnection {
            gas_url: "https://script.google.com/x".to_string(),
            connected: true,
        });
        let serialized = toml::to_string_pretty(&persisted).unwrap();
        assert!(serialized.contains("version = 1"));
        assert!(serialized.contains("mode = \"sheets\""));
        assert!(serialized.contains("[sheets]"));

        let bare = toml::to_string_pretty(&PersistedMode::new(StorageMode::Local)).unwrap();
        assert!(!bare.contains("sheets"));
    }
}
