//! Persisted session records
//!
//! [`SessionRecord`] is what gets written. Reading goes through
//! [`RawSessionRecord`], which also accepts older snapshot layouts:
//! a single `file_path` instead of `file_paths`, missing `downloads` or
//! `last_code_time`, and naive or epoch timestamps.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::Timestamp;

/// One session as stored in the snapshot, keyed by its current code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    /// Display name of the upload
    pub filename: String,
    /// Blob paths, in upload order
    pub file_paths: Vec<PathBuf>,
    /// Original upload time
    pub created_at: Timestamp,
    /// Time the current code was assigned
    pub last_code_time: Timestamp,
    /// Completed downloads
    pub downloads: u64,
}

/// Timestamp as found in a snapshot
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// RFC 3339, or ISO-8601 without offset (read as UTC)
    Text(String),
    /// Seconds since the Unix epoch
    Epoch(f64),
}

impl RawTimestamp {
    /// Convert into the canonical timestamp type
    pub fn resolve(&self) -> Result<Timestamp, String> {
        match self {
            RawTimestamp::Text(text) => parse_timestamp(text),
            RawTimestamp::Epoch(secs) => {
                if !secs.is_finite() {
                    return Err(format!("invalid epoch timestamp: {}", secs));
                }
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
                Utc.timestamp_opt(whole as i64, nanos)
                    .single()
                    .ok_or_else(|| format!("epoch timestamp out of range: {}", secs))
            }
        }
    }
}

fn parse_timestamp(text: &str) -> Result<Timestamp, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(format!("unrecognized timestamp: {:?}", text))
}

/// Session record as read from disk, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct RawSessionRecord {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_paths: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
    #[serde(default)]
    pub last_code_time: Option<RawTimestamp>,
    #[serde(default)]
    pub downloads: Option<u64>,
}

impl RawSessionRecord {
    /// Validate and normalize into a [`SessionRecord`]
    pub fn into_record(self) -> Result<SessionRecord, String> {
        let file_paths = match (self.file_paths, self.file_path) {
            (Some(paths), _) if !paths.is_empty() => paths,
            (_, Some(path)) => vec![path],
            (Some(_), None) => return Err("file_paths is empty".into()),
            (None, None) => return Err("missing file_paths".into()),
        };

        let created_at = self
            .created_at
            .ok_or_else(|| "missing created_at".to_string())?
            .resolve()?;
        let last_code_time = match self.last_code_time {
            Some(raw) => raw.resolve()?,
            None => created_at,
        };

        let filename = match self.filename {
            Some(name) if !name.is_empty() => name,
            _ => file_paths[0]
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string()),
        };

        Ok(SessionRecord {
            filename,
            file_paths,
            created_at,
            last_code_time,
            downloads: self.downloads.unwrap_or(0),
        })
    }
}
