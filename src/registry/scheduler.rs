//! Background expiry scheduler
//!
//! One periodic task per registry. Each tick rotates stale codes, destroys
//! expired sessions, and saves the snapshot when something changed. The task
//! runs independently of request traffic and only contends for the registry
//! lock for the duration of each in-memory pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::store::SessionStore;

/// Drives code rotation and file-retention cleanup
pub struct ExpiryScheduler;

impl ExpiryScheduler {
    /// Spawn the scheduler task for `store`
    ///
    /// Ticks every `tick_interval` from the store's configuration. The first
    /// tick fires immediately.
    pub fn spawn(store: Arc<SessionStore>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(store, shutdown_rx));

        SchedulerHandle {
            shutdown_tx,
            task: Some(task),
        }
    }
}

async fn run(store: Arc<SessionStore>, mut shutdown_rx: watch::Receiver<bool>) {
    let interval = store.config().tick_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_ms = interval.as_millis() as u64, "Expiry scheduler started");

    loop {
        tokio::select! {
            // Err means the handle was dropped
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // Runs to completion; shutdown is only observed between ticks
                let report = store.tick(Utc::now()).await;
                if report.changed() || report.cleanup.blobs_deleted > 0 {
                    tracing::debug!(
                        rotated = report.rotations.len(),
                        expired = report.cleanup.expired,
                        blobs_deleted = report.cleanup.blobs_deleted,
                        deferred = report.cleanup.deferred,
                        "Expiry tick"
                    );
                }
            }
        }
    }

    tracing::info!("Expiry scheduler stopped");
}

/// Handle to a running expiry scheduler
///
/// Dropping the handle also stops the scheduler, without waiting for it.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop issuing ticks and wait for the task to exit
    ///
    /// A tick already in progress completes before this returns.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Expiry scheduler task failed");
            }
        }
    }

    /// Check if the scheduler task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::registry::RegistryConfig;
    use crate::upload::UploadFile;

    async fn open_store(tmp: &TempDir, config: RegistryConfig) -> Arc<SessionStore> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let config = RegistryConfig {
            upload_dir: tmp.path().join("uploads"),
            snapshot_path: tmp.path().join("sessions.json"),
            ..config
        };
        Arc::new(SessionStore::open(config).await.unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_rotates_codes() {
        let tmp = TempDir::new().unwrap();
        let config = RegistryConfig::default()
            .code_validity(Duration::ZERO)
            .tick_interval(Duration::from_millis(10));
        let store = open_store(&tmp, config).await;

        let code = store
            .create(vec![UploadFile::new("a.txt", "hello")])
            .await
            .unwrap();

        let handle = store.spawn_scheduler();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert!(!store.contains(code.as_str()).await);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.codes().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_cleans_up_expired_sessions() {
        let tmp = TempDir::new().unwrap();
        let config = RegistryConfig::default()
            .file_retention(Duration::ZERO)
            .tick_interval(Duration::from_millis(10));
        let store = open_store(&tmp, config).await;

        let code = store
            .create(vec![UploadFile::new("a.txt", "hello")])
            .await
            .unwrap();
        let root = store.blobs().root().to_path_buf();

        let handle = store.spawn_scheduler();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert!(!store.contains(code.as_str()).await);
        assert!(store.is_empty().await);

        let mut entries = tokio::fs::read_dir(&root).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, RegistryConfig::default()).await;

        let handle = store.spawn_scheduler();
        assert!(!handle.is_finished());

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("scheduler did not stop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_task() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, RegistryConfig::default()).await;

        let handle = store.spawn_scheduler();
        drop(handle);

        // The task holds the last other reference to the store
        tokio::time::timeout(Duration::from_secs(5), async {
            while Arc::strong_count(&store) > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scheduler did not release the store");
    }
}
