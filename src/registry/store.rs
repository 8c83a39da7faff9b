//! Session registry implementation
//!
//! The central registry mapping share codes to sessions. All mutations go
//! through a single write lock; the lock is never held across blob or
//! snapshot I/O.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::blob::BlobStore;
use crate::persistence::{Snapshot, SnapshotStore};
use crate::upload::UploadFile;

use super::code::{Code, CodeGenerator};
use super::config::RegistryConfig;
use super::entry::{
    CleanupReport, PendingDeletion, RegistryStats, Rotation, Session, SessionId, SessionView,
    TickReport,
};
use super::error::{RegistryError, Result};
use super::scheduler::{ExpiryScheduler, SchedulerHandle};
use super::Timestamp;

/// State guarded by the registry lock
#[derive(Debug, Default)]
struct Inner {
    /// Active code to session
    codes: HashMap<Code, SessionId>,
    /// Live sessions
    sessions: HashMap<SessionId, Session>,
    /// Expired sessions whose blobs are still being read
    pending: Vec<PendingDeletion>,
}

impl Inner {
    fn insert(&mut self, session: Session) {
        self.codes.insert(session.code.clone(), session.id);
        self.sessions.insert(session.id, session);
    }

    fn get(&self, code: &Code) -> Option<&Session> {
        self.codes.get(code).and_then(|id| self.sessions.get(id))
    }

    /// Swap a session's code for a fresh one
    ///
    /// The old code is removed and the new one inserted in the same critical
    /// section, so no reader ever sees both or neither. The old code is
    /// excluded from the candidates so it is guaranteed to stop resolving.
    fn rotate(
        &mut self,
        id: SessionId,
        generator: &CodeGenerator,
        now: Timestamp,
    ) -> Option<Rotation> {
        let old = self.sessions.get(&id)?.code.clone();
        self.codes.remove(&old);

        let codes = &self.codes;
        let new = generator.generate(|c| *c == old || codes.contains_key(c));
        self.codes.insert(new.clone(), id);

        let session = self.sessions.get_mut(&id)?;
        session.code = new.clone();
        session.last_code_time = now;

        Some(Rotation {
            session_id: id,
            old,
            new,
        })
    }

    fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        self.codes.remove(&session.code);
        Some(session)
    }

    fn snapshot(&self) -> Snapshot {
        self.sessions
            .values()
            .map(|s| (s.code.clone(), s.to_record()))
            .collect()
    }
}

/// Central registry for all shared sessions
///
/// Thread-safe via `RwLock`. Resolves take the read lock; create, rotate,
/// cleanup and download confirmation take the write lock.
pub struct SessionStore {
    /// Codes, sessions and pending deletions
    inner: RwLock<Inner>,

    /// Serializes snapshot writes
    save_lock: Mutex<()>,

    /// Code source
    generator: CodeGenerator,

    /// Owner of uploaded bytes
    blobs: BlobStore,

    /// Durable snapshot
    snapshots: SnapshotStore,

    next_session_id: AtomicU64,

    /// Configuration
    config: RegistryConfig,
}

impl SessionStore {
    /// Open a registry with the given configuration
    ///
    /// Creates the upload directory if needed and restores sessions from the
    /// snapshot. A missing or corrupt snapshot yields an empty registry.
    pub async fn open(config: RegistryConfig) -> Result<Self> {
        let blobs = BlobStore::new(&config.upload_dir).await.map_err(|e| {
            RegistryError::StorageFailure(format!(
                "failed to open upload directory {}: {}",
                config.upload_dir.display(),
                e
            ))
        })?;
        let snapshots = SnapshotStore::new(&config.snapshot_path);

        let store = Self {
            inner: RwLock::new(Inner::default()),
            save_lock: Mutex::new(()),
            generator: CodeGenerator::new(config.code_length),
            blobs,
            snapshots,
            next_session_id: AtomicU64::new(1),
            config,
        };

        let snapshot = store.snapshots.load().await;
        store.restore(snapshot).await;
        store.remove_orphaned_blobs().await;

        Ok(store)
    }

    async fn restore(&self, snapshot: Snapshot) {
        let mut inner = self.inner.write().await;

        for (code, record) in snapshot {
            let id = self.next_id();
            inner.insert(Session::from_record(id, code, record));
        }

        if !inner.sessions.is_empty() {
            tracing::info!(sessions = inner.sessions.len(), "Sessions restored");
        }
    }

    /// Delete blobs left behind by sessions that did not survive a restart
    ///
    /// Covers deletions still deferred at shutdown and sessions lost to a
    /// corrupt snapshot.
    async fn remove_orphaned_blobs(&self) {
        let referenced: Vec<PathBuf> = {
            let inner = self.inner.read().await;
            inner
                .sessions
                .values()
                .flat_map(|s| s.file_paths.iter().cloned())
                .collect()
        };

        let removed = self
            .blobs
            .remove_unreferenced(referenced.iter().map(PathBuf::as_path))
            .await;
        if removed > 0 {
            tracing::info!(dirs = removed, "Orphaned blobs removed");
        }
    }

    fn next_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Get the blob store
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Get the snapshot file path
    pub fn snapshot_path(&self) -> &Path {
        self.snapshots.path()
    }

    /// Share a set of files under a new code
    pub async fn create(&self, files: Vec<UploadFile>) -> Result<Code> {
        self.create_at(files, Utc::now()).await
    }

    /// Share a set of files under a new code, as of `now`
    ///
    /// Fails with `InvalidInput` on an empty set or a file rejected by the
    /// upload policy, and with `StorageFailure` if any blob cannot be
    /// written. A failed create leaves neither a session nor blobs behind.
    pub async fn create_at(&self, files: Vec<UploadFile>, now: Timestamp) -> Result<Code> {
        if files.is_empty() {
            return Err(RegistryError::InvalidInput("upload set is empty".into()));
        }
        if let Some(policy) = &self.config.upload_policy {
            for file in &files {
                policy.check(file)?;
            }
        }

        let blobs = self.blobs.write_all(&files).await.map_err(|e| {
            tracing::warn!(error = %e, files = files.len(), "Failed to store upload");
            RegistryError::StorageFailure(format!("failed to store upload: {}", e))
        })?;

        let id = self.next_id();
        let code = {
            let mut inner = self.inner.write().await;
            let codes = &inner.codes;
            let code = self.generator.generate(|c| codes.contains_key(c));
            inner.insert(Session::new(id, code.clone(), &blobs, now));
            code
        };

        tracing::info!(
            code = %code,
            session_id = id,
            files = blobs.len(),
            "Session created"
        );

        self.persist().await;
        Ok(code)
    }

    /// Look up the session shared under `code`
    pub async fn resolve(&self, code: &str) -> Result<SessionView> {
        self.resolve_at(code, Utc::now()).await
    }

    /// Look up the session shared under `code`, as of `now`
    ///
    /// Does not change the session. A session past its retention window
    /// that was not cleaned up yet resolves to `NotFound`. The returned view
    /// holds a read lease that keeps the blobs on disk until it is dropped.
    pub async fn resolve_at(&self, code: &str, now: Timestamp) -> Result<SessionView> {
        let not_found = || RegistryError::NotFound(code.trim().to_string());
        let code = Code::parse(code).map_err(|_| not_found())?;

        let inner = self.inner.read().await;
        let session = inner.get(&code).ok_or_else(not_found)?;

        if session.is_expired(now, self.config.file_retention) {
            tracing::debug!(code = %code, session_id = session.id, "Resolve of expired session");
            return Err(not_found());
        }

        Ok(SessionView::new(
            session,
            self.config.code_validity,
            self.config.file_retention,
        ))
    }

    /// Record that a resolved session's files were served
    ///
    /// Call after the transfer completed. Works across code rotations since
    /// the view carries the stable session id. Returns the new download
    /// count, or `NotFound` if the session was cleaned up meanwhile.
    pub async fn confirm_download(&self, view: &SessionView) -> Result<u64> {
        let downloads = {
            let mut inner = self.inner.write().await;
            match inner.sessions.get_mut(&view.session_id) {
                Some(session) => {
                    session.downloads += 1;
                    session.downloads
                }
                None => {
                    tracing::warn!(
                        code = %view.code,
                        session_id = view.session_id,
                        "Download confirmed for a session that no longer exists"
                    );
                    return Err(RegistryError::NotFound(view.code.to_string()));
                }
            }
        };

        tracing::info!(
            code = %view.code,
            session_id = view.session_id,
            downloads = downloads,
            "Download completed"
        );

        self.persist().await;
        Ok(downloads)
    }

    /// Rotate every code older than the code-validity window
    ///
    /// File references, `created_at` and the download count are kept.
    /// Sessions past their retention window are left for cleanup.
    pub async fn rotate(&self, now: Timestamp) -> Vec<Rotation> {
        let mut inner = self.inner.write().await;

        let due: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|s| s.code_due(now, self.config.code_validity))
            .filter(|s| !s.is_expired(now, self.config.file_retention))
            .map(|s| s.id)
            .collect();

        let mut rotations = Vec::with_capacity(due.len());
        for id in due {
            if let Some(rotation) = inner.rotate(id, &self.generator, now) {
                tracing::info!(
                    session_id = id,
                    old = %rotation.old,
                    new = %rotation.new,
                    "Code rotated"
                );
                rotations.push(rotation);
            }
        }

        rotations
    }

    /// Destroy every session older than the file-retention window
    ///
    /// Expired sessions leave the registry at once. Their blobs are deleted
    /// as soon as no read lease is outstanding, on this pass or a later one.
    /// Deletion failures are logged and do not stop the pass.
    pub async fn cleanup(&self, now: Timestamp) -> CleanupReport {
        let mut report = CleanupReport::default();

        let ready = {
            let mut inner = self.inner.write().await;

            let expired: Vec<SessionId> = inner
                .sessions
                .values()
                .filter(|s| s.is_expired(now, self.config.file_retention))
                .map(|s| s.id)
                .collect();

            for id in expired {
                if let Some(session) = inner.remove(id) {
                    tracing::info!(
                        code = %session.code,
                        session_id = id,
                        downloads = session.downloads,
                        "Session expired"
                    );
                    inner.pending.push(PendingDeletion::from_session(session));
                    report.expired += 1;
                }
            }

            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.pending)
                .into_iter()
                .partition(PendingDeletion::is_idle);
            inner.pending = waiting;
            report.deferred = inner.pending.len();
            ready
        };

        for pending in ready {
            report.blobs_deleted += self.delete_blobs(&pending).await;
        }

        if report.deferred > 0 {
            tracing::debug!(
                deferred = report.deferred,
                "Blob deletion deferred for in-flight reads"
            );
        }

        report
    }

    async fn delete_blobs(&self, pending: &PendingDeletion) -> usize {
        let mut deleted = 0;
        let mut dirs: Vec<PathBuf> = Vec::new();

        for path in &pending.file_paths {
            match self.blobs.delete(path).await {
                Ok(true) => {
                    deleted += 1;
                    tracing::info!(
                        session_id = pending.session_id,
                        path = %path.display(),
                        "Blob deleted"
                    );
                }
                Ok(false) => {
                    tracing::debug!(path = %path.display(), "Blob already gone");
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = pending.session_id,
                        path = %path.display(),
                        error = %e,
                        "Failed to delete blob"
                    );
                }
            }

            if let Some(dir) = path.parent() {
                if !dirs.iter().any(|d| d == dir) {
                    dirs.push(dir.to_path_buf());
                }
            }
        }

        for dir in dirs {
            self.blobs.remove_dir_if_empty(&dir).await;
        }

        deleted
    }

    /// Run one expiry pass: rotate, clean up, then save if anything changed
    pub async fn tick(&self, now: Timestamp) -> TickReport {
        let rotations = self.rotate(now).await;
        let cleanup = self.cleanup(now).await;
        let report = TickReport { rotations, cleanup };

        if report.changed() {
            tracing::debug!(
                rotated = report.rotations.len(),
                expired = report.cleanup.expired,
                blobs_deleted = report.cleanup.blobs_deleted,
                "Expiry tick changed registry"
            );
            self.persist().await;
        }

        report
    }

    /// Write the current registry contents to the snapshot
    ///
    /// Saves are serialized, and each one copies the registry after taking
    /// the save lock, so the file always ends up with the latest state.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.inner.read().await.snapshot();
        self.snapshots.save(&snapshot).await?;
        Ok(())
    }

    async fn persist(&self) {
        if let Err(e) = self.save().await {
            tracing::warn!(
                path = %self.snapshots.path().display(),
                error = %e,
                "Failed to save snapshot"
            );
        }
    }

    /// Check whether `code` currently resolves to a session
    pub async fn contains(&self, code: &str) -> bool {
        match Code::parse(code) {
            Ok(code) => self.inner.read().await.codes.contains_key(&code),
            Err(_) => false,
        }
    }

    /// Get all active codes
    pub async fn codes(&self) -> Vec<Code> {
        self.inner.read().await.codes.keys().cloned().collect()
    }

    /// Get number of live sessions
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Check if the registry has no live sessions
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }

    /// Get registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;

        RegistryStats {
            sessions: inner.sessions.len(),
            pending_deletions: inner.pending.len(),
            total_downloads: inner.sessions.values().map(|s| s.downloads).sum(),
            active_readers: inner.sessions.values().map(|s| s.reader_count()).sum(),
        }
    }

    /// Spawn the background expiry scheduler
    ///
    /// Returns a handle used to shut the task down.
    pub fn spawn_scheduler(self: &Arc<Self>) -> SchedulerHandle {
        ExpiryScheduler::spawn(Arc::clone(self))
    }
}
