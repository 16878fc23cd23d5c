//! # Configuration Module
//!
//! Known device identities and a few tunables for scanning and sessions.
//! Settings are read from a TOML file when one exists; otherwise the
//! built-in defaults are used. The file is never written by the application.
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/imu-logger/config.toml
//! - Linux: ~/.config/imu-logger/config.toml
//! - Windows: %APPDATA%\imu-logger\config.toml

use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Names of devices streaming packed little-endian float triples
    pub fixed_format_names: Vec<String>,
    /// Names of devices streaming `(x,y,z)` text fragments
    pub text_stream_names: Vec<String>,
    /// Addresses of fixed-format devices, accepted whatever they advertise as a name
    pub known_addresses: Vec<String>,
    pub scan_duration_secs: u64,
    pub poll_interval_ms: u64,
    /// Where data files go; the working directory when unset
    pub output_dir: Option<PathBuf>,
    /// Lines kept in each live display
    pub display_lines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fixed_format_names: vec!["ESP32C3_IMU".to_string()],
            text_stream_names: vec!["CIRCUITPYb48a".to_string(), "CIRCUITPYc67c".to_string()],
            known_addresses: vec!["40:4C:CA:8C:60:5A".to_string()],
            scan_duration_secs: 5,
            poll_interval_ms: 1000,
            output_dir: None,
            display_lines: 200,
        }
    }
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("imu-logger")
            .join("config.toml")
    }

    /// Load config from the platform location, or defaults if there is none
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(ConfigError::ParseFailed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Directory for data files, resolved against the working directory
    pub fn output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Every name the scanner should accept
    pub fn allowed_names(&self) -> impl Iterator<Item = &str> {
        self.fixed_format_names
            .iter()
            .chain(self.text_stream_names.iter())
            .map(String::as_str)
    }

    pub fn is_known_address(&self, address: &str) -> bool {
        self.known_addresses
            .iter()
            .any(|known| known.eq_ignore_ascii_case(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fixed_format_names, vec!["ESP32C3_IMU"]);
        assert_eq!(config.text_stream_names.len(), 2);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.output_dir.is_none());
    }

    #[test]
    fn test_config_deserialization_fills_defaults() {
        let toml_str = r#"
            text_stream_names = ["CIRCUITPYaaaa"]
            poll_interval_ms = 250
        "#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.text_stream_names, vec!["CIRCUITPYaaaa"]);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.fixed_format_names, vec!["ESP32C3_IMU"]);
        assert_eq!(config.scan_duration_secs, 5);
    }

    #[test]
    fn test_missing_file_gives_defaults_without_creating_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(&path).expect("Failed to load config");
        assert_eq!(config, Config::default());
        assert!(!path.exists());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "poll_interval_ms = \"soon\"").unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn test_known_address_is_case_insensitive() {
        let config = Config::default();
        assert!(config.is_known_address("40:4c:ca:8c:60:5a"));
        assert!(!config.is_known_address("AA:BB:CC:DD:EE:FF"));
    }
}
