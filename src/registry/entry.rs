//! Session entry and view types
//!
//! This module defines the per-session state stored in the registry and
//! the read-only views handed out to downloaders.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;

use crate::blob::{self, StoredBlob};
use crate::persistence::SessionRecord;

use super::code::Code;
use super::error::RegistryError;
use super::Timestamp;

/// Process-local session identifier
///
/// Stays fixed across code rotations, unlike the code itself. Not persisted.
pub type SessionId = u64;

/// Check whether more than `window` has passed between `since` and `now`
///
/// A `now` earlier than `since` (clock stepped back) never counts as elapsed.
pub(crate) fn window_elapsed(now: Timestamp, since: Timestamp, window: Duration) -> bool {
    match (now - since).to_std() {
        Ok(elapsed) => elapsed > window,
        Err(_) => false,
    }
}

/// Add a std duration to a timestamp, saturating at the maximum
pub(crate) fn add_window(at: Timestamp, window: Duration) -> Timestamp {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| at.checked_add_signed(w))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}

/// Entry for a single session in the registry
#[derive(Debug)]
pub struct Session {
    /// Stable identifier
    pub id: SessionId,

    /// Code the session is currently reachable under
    pub code: Code,

    /// Display name of the upload
    pub filename: String,

    /// Blob paths, in upload order
    pub file_paths: Vec<PathBuf>,

    /// Original upload time, governs file retention
    pub created_at: Timestamp,

    /// Time the current code was assigned, governs code validity
    pub last_code_time: Timestamp,

    /// Completed downloads
    pub downloads: u64,

    /// Reads of this session's blobs currently in flight
    pub(super) readers: Arc<AtomicUsize>,
}

impl Session {
    /// Create a session for freshly stored blobs
    pub(super) fn new(id: SessionId, code: Code, blobs: &[StoredBlob], now: Timestamp) -> Self {
        Self {
            id,
            code,
            filename: blobs
                .first()
                .map(|b| b.name.clone())
                .unwrap_or_default(),
            file_paths: blobs.iter().map(|b| b.path.clone()).collect(),
            created_at: now,
            last_code_time: now,
            downloads: 0,
            readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Restore a session from a persisted record
    pub(super) fn from_record(id: SessionId, code: Code, record: SessionRecord) -> Self {
        Self {
            id,
            code,
            filename: record.filename,
            file_paths: record.file_paths,
            created_at: record.created_at,
            last_code_time: record.last_code_time,
            downloads: record.downloads,
            readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Snapshot this session as a persisted record
    pub(super) fn to_record(&self) -> SessionRecord {
        SessionRecord {
            filename: self.filename.clone(),
            file_paths: self.file_paths.clone(),
            created_at: self.created_at,
            last_code_time: self.last_code_time,
            downloads: self.downloads,
        }
    }

    /// Check if the file-retention window has passed
    pub fn is_expired(&self, now: Timestamp, retention: Duration) -> bool {
        window_elapsed(now, self.created_at, retention)
    }

    /// Check if the current code is due for rotation
    pub fn code_due(&self, now: Timestamp, validity: Duration) -> bool {
        window_elapsed(now, self.last_code_time, validity)
    }

    /// Number of reads currently in flight
    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    /// Take a read lease on this session's blobs
    pub(super) fn lease(&self) -> ReadLease {
        ReadLease::new(Arc::clone(&self.readers))
    }
}

/// Keeps a session's blobs on disk while a download is in flight
///
/// Blob deletion for an expired session waits until every lease is dropped.
#[derive(Debug)]
pub struct ReadLease {
    readers: Arc<AtomicUsize>,
}

impl ReadLease {
    fn new(readers: Arc<AtomicUsize>) -> Self {
        readers.fetch_add(1, Ordering::AcqRel);
        Self { readers }
    }
}

impl Clone for ReadLease {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.readers))
    }
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A file belonging to a resolved session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    /// File name shown to the downloader
    pub name: String,
    /// Blob location
    pub path: PathBuf,
}

impl SharedFile {
    fn from_path(path: &Path) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string()),
            path: path.to_path_buf(),
        }
    }
}

/// Read-only view of a session returned by a resolve
///
/// Holds a [`ReadLease`] for as long as it lives, so the files stay
/// readable even if the session expires mid-download.
#[derive(Debug)]
pub struct SessionView {
    /// Code the session was resolved under
    pub code: Code,
    /// Stable session identifier, used to confirm the download
    pub session_id: SessionId,
    /// Display name of the upload
    pub filename: String,
    /// Files of the session, in upload order
    pub files: Vec<SharedFile>,
    /// Original upload time
    pub created_at: Timestamp,
    /// Time the current code was assigned
    pub last_code_time: Timestamp,
    /// When the current code will be rotated
    pub code_expires_at: Timestamp,
    /// When the files will be deleted
    pub files_expire_at: Timestamp,
    /// Completed downloads at resolve time
    pub downloads: u64,
    lease: ReadLease,
}

impl SessionView {
    pub(super) fn new(
        session: &Session,
        code_validity: Duration,
        file_retention: Duration,
    ) -> Self {
        Self {
            code: session.code.clone(),
            session_id: session.id,
            filename: session.filename.clone(),
            files: session
                .file_paths
                .iter()
                .map(|p| SharedFile::from_path(p))
                .collect(),
            created_at: session.created_at,
            last_code_time: session.last_code_time,
            code_expires_at: add_window(session.last_code_time, code_validity),
            files_expire_at: add_window(session.created_at, file_retention),
            downloads: session.downloads,
            lease: session.lease(),
        }
    }

    /// Names of the shared files
    pub fn filenames(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.name.as_str()).collect()
    }

    /// Seconds left before the code rotates (0 once due)
    pub fn code_seconds_remaining(&self, now: Timestamp) -> i64 {
        (self.code_expires_at - now).num_seconds().max(0)
    }

    /// Open one of the session's files for streaming
    pub async fn open(&self, name: &str) -> Result<File, RegistryError> {
        let file = self
            .files
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| RegistryError::InvalidInput(format!("no file named {}", name)))?;

        blob::open(&file.path).await.map_err(|e| {
            RegistryError::StorageFailure(format!("failed to open {}: {}", file.path.display(), e))
        })
    }

    /// Lease held by this view
    pub fn lease(&self) -> &ReadLease {
        &self.lease
    }
}

/// Blobs of an expired session waiting for in-flight reads to finish
#[derive(Debug)]
pub(super) struct PendingDeletion {
    pub session_id: SessionId,
    pub file_paths: Vec<PathBuf>,
    pub readers: Arc<AtomicUsize>,
}

impl PendingDeletion {
    pub fn from_session(session: Session) -> Self {
        Self {
            session_id: session.id,
            file_paths: session.file_paths,
            readers: session.readers,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.readers.load(Ordering::Acquire) == 0
    }
}

/// A code replaced during rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    /// Session whose code changed
    pub session_id: SessionId,
    /// Code that stopped resolving
    pub old: Code,
    /// Code that now resolves to the session
    pub new: Code,
}

/// Outcome of a cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Sessions removed from the registry by this pass
    pub expired: usize,
    /// Blob files deleted from disk by this pass
    pub blobs_deleted: usize,
    /// Expired sessions whose blobs wait for in-flight reads
    pub deferred: usize,
}

/// Outcome of a scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Codes rotated
    pub rotations: Vec<Rotation>,
    /// Cleanup results
    pub cleanup: CleanupReport,
}

impl TickReport {
    /// Check if the tick changed the registry contents
    pub fn changed(&self) -> bool {
        !self.rotations.is_empty() || self.cleanup.expired > 0
    }
}

/// Statistics for the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live sessions
    pub sessions: usize,
    /// Expired sessions whose blobs are not deleted yet
    pub pending_deletions: usize,
    /// Downloads across live sessions
    pub total_downloads: u64,
    /// Reads currently in flight across live sessions
    pub active_readers: usize,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn t(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn session() -> Session {
        let blobs = vec![StoredBlob {
            name: "a.txt".into(),
            path: PathBuf::from("uploads/0001/a.txt"),
        }];
        Session::new(1, Code::parse("AB12CD").unwrap(), &blobs, t(0))
    }

    #[test]
    fn test_window_elapsed_is_strict() {
        let window = Duration::from_secs(60);

        assert!(!window_elapsed(t(60), t(0), window));
        assert!(window_elapsed(t(61), t(0), window));
        // Clock going backwards never expires anything
        assert!(!window_elapsed(t(-500), t(0), window));
    }

    #[test]
    fn test_new_session_fields() {
        let session = session();

        assert_eq!(session.filename, "a.txt");
        assert_eq!(session.created_at, session.last_code_time);
        assert_eq!(session.downloads, 0);
        assert_eq!(session.reader_count(), 0);
    }

    #[test]
    fn test_lease_counts_readers() {
        let session = session();

        let lease = session.lease();
        let second = lease.clone();
        assert_eq!(session.reader_count(), 2);

        drop(lease);
        assert_eq!(session.reader_count(), 1);
        drop(second);
        assert_eq!(session.reader_count(), 0);
    }

    #[test]
    fn test_view_holds_lease() {
        let session = session();
        let view = SessionView::new(
            &session,
            Duration::from_secs(60),
            Duration::from_secs(86_400),
        );

        assert_eq!(session.reader_count(), 1);
        assert_eq!(view.filenames(), vec!["a.txt"]);
        assert_eq!(view.code_expires_at, t(60));
        assert_eq!(view.files_expire_at, t(86_400));
        assert_eq!(view.code_seconds_remaining(t(45)), 15);
        assert_eq!(view.code_seconds_remaining(t(90)), 0);

        let pending = PendingDeletion::from_session(session);
        assert!(!pending.is_idle());
        drop(view);
        assert!(pending.is_idle());
    }

    #[test]
    fn test_record_round_trip() {
        let mut session = session();
        session.downloads = 4;

        let record = session.to_record();
        let restored = Session::from_record(9, session.code.clone(), record);

        assert_eq!(restored.id, 9);
        assert_eq!(restored.file_paths, session.file_paths);
        assert_eq!(restored.created_at, session.created_at);
        assert_eq!(restored.downloads, 4);
    }
}
