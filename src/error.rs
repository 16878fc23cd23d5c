//! # Error Types Module
//!
//! Centralized error handling for the IMU logger.
//! One error type per failure class, each with enough context for a status line.
//!
//! ## Error Types
//! - `ScanError`: discovery could not complete
//! - `ConnectionError`: a session failed to connect or lost its link
//! - `ParseError`: a single notification payload was malformed
//! - `RecordError`: a data file could not be created or appended to
//! - `ConfigError`: configuration file I/O and parsing errors
//!
//! ## Propagation
//! Parse and record errors are per-sample: the session logs them and keeps
//! going. Connection errors end one session only. Nothing here is fatal to
//! the application shell.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur during device scanning
#[derive(Debug, Clone)]
pub enum ScanError {
    /// Bluetooth manager initialization failed
    ManagerInit(String),
    /// No Bluetooth adapters available
    NoAdapters,
    /// Scan operation failed
    ScanFailed(String),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::ManagerInit(msg) => {
                write!(f, "Failed to initialize Bluetooth manager: {}", msg)
            }
            ScanError::NoAdapters => {
                write!(f, "No Bluetooth adapters found")
            }
            ScanError::ScanFailed(msg) => {
                write!(f, "Scan operation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ScanError {}

/// Errors that can occur while a session talks to its device
#[derive(Debug, Clone)]
pub enum ConnectionError {
    /// Failed to create the worker runtime
    RuntimeCreation(String),
    /// Bluetooth manager initialization failed
    ManagerInit(String),
    /// Bluetooth adapter not found or not available
    NoAdapter,
    /// Address did not match any peripheral seen by the adapter
    DeviceNotFound(String),
    /// Failed to connect to specific device
    DeviceConnection { address: String, reason: String },
    /// Subscribing or unsubscribing a channel failed
    Channel { channel: String, reason: String },
    /// Notification stream ended while the session was subscribed
    LinkLost(String),
    /// Disconnecting failed
    Disconnect { address: String, reason: String },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::RuntimeCreation(msg) => {
                write!(f, "Failed to create async runtime: {}", msg)
            }
            ConnectionError::ManagerInit(msg) => {
                write!(f, "Failed to initialize Bluetooth manager: {}", msg)
            }
            ConnectionError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            ConnectionError::DeviceNotFound(address) => {
                write!(f, "Device {} is not known to the adapter. Run discovery first.", address)
            }
            ConnectionError::DeviceConnection { address, reason } => {
                write!(f, "Failed to connect to device {}: {}", address, reason)
            }
            ConnectionError::Channel { channel, reason } => {
                write!(f, "Channel {} failed: {}", channel, reason)
            }
            ConnectionError::LinkLost(address) => {
                write!(f, "Lost connection to device {}", address)
            }
            ConnectionError::Disconnect { address, reason } => {
                write!(f, "Failed to disconnect from {}: {}", address, reason)
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Errors that can occur when decoding one notification
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Device name/address does not belong to a known family
    UnknownDevice(String),
    /// Fixed-format payload was not 12 bytes
    WrongLength(usize),
    /// Text fragment was not UTF-8
    InvalidUtf8,
    /// A field of an assembled tuple is not a number
    InvalidNumber(String),
    /// A closed tuple did not have three fields
    Malformed(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnknownDevice(name) => write!(f, "Unknown device '{}'", name),
            ParseError::WrongLength(len) => {
                write!(f, "Expected 12 bytes of accelerometer data, got {}", len)
            }
            ParseError::InvalidUtf8 => write!(f, "Payload is not valid UTF-8"),
            ParseError::InvalidNumber(field) => write!(f, "Invalid number '{}'", field),
            ParseError::Malformed(text) => write!(f, "Malformed tuple '{}'", text),
        }
    }
}

impl std::error::Error for ParseError {}

/// Errors that can occur while writing data files
#[derive(Debug)]
pub enum RecordError {
    /// Could not create the session's output file
    CreateFailed { path: PathBuf, source: std::io::Error },
    /// Could not append a sample
    WriteFailed { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::CreateFailed { path, source } => {
                write!(f, "Failed to create {}: {}", path.display(), source)
            }
            RecordError::WriteFailed { path, source } => {
                write!(f, "Failed to write {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordError::CreateFailed { source, .. } => Some(source),
            RecordError::WriteFailed { source, .. } => Some(source),
        }
    }
}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::NoAdapter;
        assert!(err.to_string().contains("Bluetooth"));
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::WrongLength(7);
        assert_eq!(err.to_string(), "Expected 12 bytes of accelerometer data, got 7");
    }

    #[test]
    fn test_record_error_chain() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = RecordError::WriteFailed {
            path: PathBuf::from("data.txt"),
            source: io_err,
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("data.txt"));
    }

    #[test]
    fn test_config_error_chain() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());
    }
}
