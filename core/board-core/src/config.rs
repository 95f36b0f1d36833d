//! Terminal configuration.
//!
//! Values come from `~/.vitalboard/config.toml` when it exists; every field has
//! a default so a missing file or a partial file both load. Command-line flags
//! are layered on top by the host binary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::button::DEFAULT_DEBOUNCE_MS;
use crate::error::{BoardError, Result};
use crate::overdue::DEFAULT_INTERVAL_HOURS;

pub const BOARD_DIR_NAME: &str = ".vitalboard";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const SOCKET_FILE_NAME: &str = "board.sock";
pub const SOCKET_ENV: &str = "VITALBOARD_SOCKET";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// One year; longer intervals are treated as misconfiguration.
pub const MAX_INTERVAL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Pull,
    Push,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Pull => "pull",
            SyncMode::Push => "push",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = BoardError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pull" => Ok(SyncMode::Pull),
            "push" => Ok(SyncMode::Push),
            other => Err(BoardError::InvalidConfig(format!(
                "unknown sync mode {:?} (expected pull or push)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub mode: SyncMode,
    pub socket_path: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub debounce_ms: u64,
    pub measurement_interval_hours: i64,
    pub strict_time_range: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Pull,
            socket_path: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            measurement_interval_hours: DEFAULT_INTERVAL_HOURS,
            strict_time_range: false,
        }
    }
}

impl BoardConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(BoardError::InvalidConfig(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_INTERVAL_HOURS).contains(&self.measurement_interval_hours) {
            return Err(BoardError::InvalidConfig(format!(
                "measurement_interval_hours must be between 1 and {}",
                MAX_INTERVAL_HOURS
            )));
        }
        Ok(())
    }

    /// Socket from config, then `VITALBOARD_SOCKET`, then the default location.
    pub fn resolve_socket_path(&self) -> Result<PathBuf> {
        match &self.socket_path {
            Some(path) => Ok(path.clone()),
            None => default_socket_path(),
        }
    }
}

/// `~/.vitalboard`
pub fn board_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(BOARD_DIR_NAME))
        .ok_or(BoardError::HomeDirNotFound)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(board_dir()?.join(CONFIG_FILE_NAME))
}

pub fn default_socket_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(SOCKET_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(board_dir()?.join(SOCKET_FILE_NAME))
}

pub fn load_board_config(path: Option<PathBuf>) -> Result<BoardConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config file; using defaults");
        return Ok(BoardConfig::default());
    }

    let config = parse_config_file(&config_path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config_file(path: &Path) -> Result<BoardConfig> {
    let content = fs_err::read_to_string(path).map_err(|source| BoardError::ConfigReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<BoardConfig>(&content).map_err(|err| BoardError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_board_config(Some(temp.path().join("absent.toml"))).unwrap();
        assert_eq!(config, BoardConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.debounce(), Duration::from_millis(200));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "mode = \"push\"\nstrict_time_range = true\n").unwrap();

        let config = load_board_config(Some(path)).unwrap();
        assert_eq!(config.mode, SyncMode::Push);
        assert!(config.strict_time_range);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.measurement_interval_hours, 4);
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "mode = [").unwrap();

        match load_board_config(Some(path.clone())) {
            Err(BoardError::ConfigMalformed { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "poll_interval_secs = 0\n").unwrap();
        assert!(matches!(
            load_board_config(Some(path)),
            Err(BoardError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_interval_hours_bounded() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "measurement_interval_hours = 10000000000\n").unwrap();
        assert!(matches!(
            load_board_config(Some(path)),
            Err(BoardError::InvalidConfig(_))
        ));

        let yearly = BoardConfig {
            measurement_interval_hours: MAX_INTERVAL_HOURS,
            ..BoardConfig::default()
        };
        assert!(yearly.validate().is_ok());
    }

    #[test]
    fn test_explicit_socket_wins() {
        let config = BoardConfig {
            socket_path: Some(PathBuf::from("/tmp/explicit.sock")),
            ..BoardConfig::default()
        };
        assert_eq!(
            config.resolve_socket_path().unwrap(),
            PathBuf::from("/tmp/explicit.sock")
        );
    }

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("pull".parse::<SyncMode>().unwrap(), SyncMode::Pull);
        assert_eq!(" PUSH ".parse::<SyncMode>().unwrap(), SyncMode::Push);
        assert!("websocket".parse::<SyncMode>().is_err());
        assert_eq!(SyncMode::Push.to_string(), "push");
    }
}
