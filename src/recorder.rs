//! # Recording Module
//!
//! Names and writes the per-session acceleration data files.
//!
//! ## File Naming
//! ```text
//! acceleration_data_{device}_{label}_data_{DD-Mon-YYYY_HH-MM-SS}.txt
//! ```
//! The label is the patient/position entered for the slot, with whitespace
//! replaced by underscores, or `PositionN` when left blank. If a file of
//! that name already exists when a session starts, `_1`, `_2`, ... is added
//! before the extension so two sessions never share a file.
//!
//! ## Line Format
//! ```text
//! YYYY-MM-DD HH:MM:SS.mmm,x,y,z
//! ```
//! No header. Every sample opens the file in append mode and closes it
//! again, so nothing is lost if the application exits mid-run.

use crate::error::RecordError;
use crate::parser::Acceleration;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "acceleration_data";
const MAX_SUFFIX: u32 = 999;

/// Label used for a slot when the user left it blank
pub fn default_label(slot: usize) -> String {
    format!("Position{}", slot + 1)
}

fn sanitize(part: &str) -> String {
    part.trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, '/' | '\\' | ':') {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Build the output path for a session from its device, label and start time
pub fn build_path(
    dir: &Path,
    device_name: &str,
    label: &str,
    slot: usize,
    started: &NaiveDateTime,
) -> PathBuf {
    let label = if label.trim().is_empty() {
        default_label(slot)
    } else {
        sanitize(label)
    };
    let stamp = started.format("%d-%b-%Y_%H-%M-%S");
    let filename = format!(
        "{}_{}_{}_data_{}.txt",
        FILE_PREFIX,
        sanitize(device_name),
        label,
        stamp
    );
    dir.join(filename)
}

/// UTC time with millisecond precision, as written in data files
pub fn format_utc(utc: &DateTime<Utc>) -> String {
    utc.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// One data line, without the trailing newline
pub fn format_line(utc: &DateTime<Utc>, sample: &Acceleration) -> String {
    // Debug keeps a trailing ".0" on integral values
    format!("{},{:?},{:?},{:?}", format_utc(utc), sample.x, sample.y, sample.z)
}

/// Append one sample to `path` without truncating it
pub fn append_sample(
    path: &Path,
    utc: &DateTime<Utc>,
    sample: &Acceleration,
) -> Result<(), RecordError> {
    let write_failed = |source| RecordError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(write_failed)?;
    writeln!(file, "{}", format_line(utc, sample)).map_err(write_failed)
}

/// Output file owned by one session
#[derive(Debug)]
pub struct DataFile {
    path: PathBuf,
}

impl DataFile {
    /// Create the file exclusively, adding a numeric suffix if the name is taken
    pub fn create(path: PathBuf) -> Result<Self, RecordError> {
        let mut candidate = path.clone();
        let mut suffix = 0;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(_) => {
                    log::info!("Recording to {}", candidate.display());
                    return Ok(Self { path: candidate });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && suffix < MAX_SUFFIX => {
                    suffix += 1;
                    candidate = with_suffix(&path, suffix);
                    log::debug!("{} exists, trying suffix {}", path.display(), suffix);
                }
                Err(source) => {
                    return Err(RecordError::CreateFailed {
                        path: candidate,
                        source,
                    })
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, utc: &DateTime<Utc>, sample: &Acceleration) -> Result<(), RecordError> {
        append_sample(&self.path, utc, sample)
    }

    /// Remove the file of a session that never got to record anything
    pub fn discard(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}

fn with_suffix(path: &Path, suffix: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}_{}", stem, suffix),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use tempfile::tempdir;

    fn started() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(14, 5, 9)
            .unwrap()
    }

    fn filename(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    #[test]
    fn test_build_path_format() {
        let path = build_path(Path::new("/data"), "ESP32C3_IMU", "Left Wrist", 0, &started());
        assert_eq!(path.parent(), Some(Path::new("/data")));
        assert_eq!(
            filename(&path),
            "acceleration_data_ESP32C3_IMU_Left_Wrist_data_07-Mar-2024_14-05-09.txt"
        );
    }

    #[test]
    fn test_build_path_is_deterministic() {
        let dir = Path::new(".");
        let a = build_path(dir, "CIRCUITPYc67c", "Andre", 1, &started());
        let b = build_path(dir, "CIRCUITPYc67c", "Andre", 1, &started());
        let c = build_path(dir, "CIRCUITPYc67c", "Beth", 1, &started());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_spaces_become_underscores() {
        let path = build_path(Path::new("."), "ESP32C3_IMU", "John Doe", 0, &started());
        let name = filename(&path);
        assert!(name.contains("John_Doe"));
        assert!(!name.contains(' '));
    }

    #[test]
    fn test_blank_label_defaults_per_slot() {
        let first = build_path(Path::new("."), "ESP32C3_IMU", "", 0, &started());
        let second = build_path(Path::new("."), "ESP32C3_IMU", "   ", 1, &started());
        assert!(filename(&first).contains("_Position1_"));
        assert!(filename(&second).contains("_Position2_"));
    }

    #[test]
    fn test_format_line() {
        let utc = Utc.with_ymd_and_hms(2024, 3, 7, 13, 5, 9).unwrap()
            + chrono::Duration::milliseconds(42);
        let sample = Acceleration { x: 1.0, y: -0.5, z: 9.81 };
        assert_eq!(format_line(&utc, &sample), "2024-03-07 13:05:09.042,1.0,-0.5,9.81");
    }

    #[test]
    fn test_samples_are_appended_in_order() {
        let dir = tempdir().unwrap();
        let file = DataFile::create(dir.path().join("run.txt")).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 3, 7, 13, 5, 9).unwrap();

        let mut expected = Vec::new();
        for i in 0..5 {
            let utc = base + chrono::Duration::milliseconds(i * 10);
            let sample = Acceleration { x: i as f64, y: 0.25, z: -(i as f64) };
            file.append(&utc, &sample).unwrap();
            expected.push(format_line(&utc, &sample));
        }

        let contents = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, expected);
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn test_append_does_not_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("existing.txt");
        std::fs::write(&path, "earlier\n").unwrap();

        let utc = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        append_sample(&path, &utc, &Acceleration { x: 1.0, y: 2.0, z: 3.0 }).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "earlier\n2024-01-01 00:00:00.000,1.0,2.0,3.0\n");
    }

    #[test]
    fn test_create_adds_suffix_when_name_taken() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("acceleration_data_X_Position1_data_now.txt");

        let first = DataFile::create(path.clone()).unwrap();
        let second = DataFile::create(path.clone()).unwrap();
        let third = DataFile::create(path.clone()).unwrap();

        assert_eq!(first.path(), path.as_path());
        assert_eq!(filename(second.path()), "acceleration_data_X_Position1_data_now_1.txt");
        assert_eq!(filename(third.path()), "acceleration_data_X_Position1_data_now_2.txt");
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("run.txt");
        assert!(matches!(
            DataFile::create(path),
            Err(RecordError::CreateFailed { .. })
        ));
    }
}
