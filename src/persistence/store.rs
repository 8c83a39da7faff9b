//! Snapshot file load/save

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::registry::Code;

use super::record::{RawSessionRecord, SessionRecord};

/// Full registry contents keyed by current code
pub type Snapshot = BTreeMap<Code, SessionRecord>;

/// Error type for snapshot operations
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Reading or writing the snapshot file failed
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding the snapshot failed
    #[error("snapshot encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    /// Snapshot content is structurally invalid
    #[error("{0}")]
    Corrupt(String),
}

/// Reads and writes the persisted snapshot
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Create a snapshot store for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot
    ///
    /// Never fails: a missing file yields an empty snapshot, and unreadable
    /// or corrupt content is logged and also yields an empty snapshot.
    pub async fn load(&self) -> Snapshot {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No snapshot found, starting empty");
                return Snapshot::new();
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read snapshot, starting empty"
                );
                return Snapshot::new();
            }
        };

        match decode(&content) {
            Ok(snapshot) => {
                tracing::info!(
                    path = %self.path.display(),
                    sessions = snapshot.len(),
                    "Snapshot loaded"
                );
                snapshot
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Snapshot is corrupt, starting empty"
                );
                Snapshot::new()
            }
        }
    }

    /// Write the snapshot
    ///
    /// The content goes to a temp file first and is then renamed over the
    /// snapshot, so a crash mid-write leaves the previous snapshot intact.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let data = encode(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path();
        fs::write(&temp_path, &data).await?;
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!(
            path = %self.path.display(),
            sessions = snapshot.len(),
            bytes = data.len(),
            "Snapshot saved"
        );

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sessions.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Serialize a snapshot to JSON
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, PersistenceError> {
    let keyed: BTreeMap<&str, &SessionRecord> = snapshot
        .iter()
        .map(|(code, record)| (code.as_str(), record))
        .collect();
    Ok(serde_json::to_vec_pretty(&keyed)?)
}

/// Parse and validate snapshot JSON
///
/// The document must be a mapping from code to record. One invalid key or
/// record makes the whole snapshot corrupt.
pub fn decode(content: &[u8]) -> Result<Snapshot, PersistenceError> {
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(Snapshot::new());
    }

    let raw: BTreeMap<String, RawSessionRecord> = serde_json::from_slice(content)
        .map_err(|e| PersistenceError::Corrupt(format!("invalid snapshot document: {}", e)))?;

    let mut snapshot = Snapshot::new();
    for (key, raw_record) in raw {
        let code = Code::parse(&key)
            .map_err(|e| PersistenceError::Corrupt(format!("invalid code {:?}: {}", key, e)))?;
        let record = raw_record
            .into_record()
            .map_err(|reason| PersistenceError::Corrupt(format!("record {}: {}", key, reason)))?;

        if snapshot.insert(code, record).is_some() {
            return Err(PersistenceError::Corrupt(format!(
                "duplicate code after normalization: {}",
                key
            )));
        }
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn record(name: &str, downloads: u64) -> SessionRecord {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        SessionRecord {
            filename: name.to_string(),
            file_paths: vec![PathBuf::from(format!("uploads/0001/{}", name))],
            created_at: created,
            last_code_time: created + chrono::Duration::seconds(61),
            downloads,
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().join("sessions.json"));

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().join("state/sessions.json"));

        let mut snapshot = Snapshot::new();
        snapshot.insert(Code::parse("AB12CD").unwrap(), record("a.txt", 0));
        snapshot.insert(Code::parse("ZZ99ZZ").unwrap(), record("b.pdf", 17));

        assert_ok!(store.save(&snapshot).await);
        assert!(!store.temp_path().exists());

        let loaded = store.load().await;
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sessions.json");
        let store = SnapshotStore::new(&path);

        fs::write(&path, b"{ this is not json").await.unwrap();
        assert!(store.load().await.is_empty());

        fs::write(&path, b"[1, 2, 3]").await.unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().join("sessions.json"));

        let mut snapshot = Snapshot::new();
        snapshot.insert(Code::parse("AAAAAA").unwrap(), record("a.txt", 1));
        store.save(&snapshot).await.unwrap();

        snapshot.clear();
        store.save(&snapshot).await.unwrap();

        assert!(store.load().await.is_empty());
    }

    #[test]
    fn test_decode_defaults_missing_downloads() {
        let snapshot = decode(
            br#"{"AB12CD": {
                "filename": "a.txt",
                "file_paths": ["uploads/x/a.txt"],
                "created_at": "2024-05-01T10:00:00Z",
                "last_code_time": "2024-05-01T10:00:00Z"
            }}"#,
        )
        .unwrap();

        let record = &snapshot[&Code::parse("AB12CD").unwrap()];
        assert_eq!(record.downloads, 0);
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        assert_err!(decode(br#"{"AB12CD": {"filename": "a.txt"}}"#));
        assert_err!(decode(br#"{"AB12CD": 5}"#));
        assert_err!(decode(
            br#"{"AB-12C": {"file_path": "a.txt", "created_at": "2024-05-01T10:00:00Z"}}"#
        ));
        assert_err!(decode(br#""just a string""#));
    }

    #[test]
    fn test_decode_empty_content() {
        assert!(decode(b"").unwrap().is_empty());
        assert!(decode(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_encode_is_keyed_by_code() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(Code::parse("AB12CD").unwrap(), record("a.txt", 2));

        let value: serde_json::Value = serde_json::from_slice(&encode(&snapshot).unwrap()).unwrap();
        let entry = &value["AB12CD"];
        assert_eq!(entry["filename"], "a.txt");
        assert_eq!(entry["downloads"], 2);
        assert_eq!(entry["file_paths"][0], "uploads/0001/a.txt");
        assert_eq!(entry["created_at"], "2024-05-01T10:00:00.123456789Z");
    }
}
