//! Registry configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::upload::UploadPolicy;

use super::code::{DEFAULT_CODE_LENGTH, MAX_CODE_LENGTH, MIN_CODE_LENGTH};

/// Configuration for the session registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a code stays valid before it is rotated
    pub code_validity: Duration,

    /// How long uploaded files are kept before the session is destroyed
    pub file_retention: Duration,

    /// Interval between expiry scheduler ticks
    pub tick_interval: Duration,

    /// Number of characters per generated code
    pub code_length: usize,

    /// Directory holding uploaded blobs
    pub upload_dir: PathBuf,

    /// Path of the persisted session snapshot
    pub snapshot_path: PathBuf,

    /// Upload restrictions enforced on create (None = accept everything)
    pub upload_policy: Option<UploadPolicy>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            code_validity: Duration::from_secs(60),
            file_retention: Duration::from_secs(24 * 60 * 60),
            tick_interval: Duration::from_secs(1),
            code_length: DEFAULT_CODE_LENGTH,
            upload_dir: PathBuf::from("uploads"),
            snapshot_path: PathBuf::from("sessions.json"),
            upload_policy: Some(UploadPolicy::default()),
        }
    }
}

impl RegistryConfig {
    /// Create a config storing blobs and the snapshot under `dir`
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            upload_dir: dir.join("uploads"),
            snapshot_path: dir.join("sessions.json"),
            ..Default::default()
        }
    }

    /// Set the code-validity window
    pub fn code_validity(mut self, validity: Duration) -> Self {
        self.code_validity = validity;
        self
    }

    /// Set the file-retention window
    pub fn file_retention(mut self, retention: Duration) -> Self {
        self.file_retention = retention;
        self
    }

    /// Set the scheduler tick interval
    ///
    /// Zero is bumped to one millisecond, `tokio::time::interval` panics on zero.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the code length
    pub fn code_length(mut self, length: usize) -> Self {
        self.code_length = length.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH);
        self
    }

    /// Set the blob directory
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    /// Set the snapshot file path
    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    /// Set the upload policy
    pub fn upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.upload_policy = Some(policy);
        self
    }

    /// Accept any file name and size on create
    pub fn without_upload_policy(mut self) -> Self {
        self.upload_policy = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();

        assert_eq!(config.code_validity, Duration::from_secs(60));
        assert_eq!(config.file_retention, Duration::from_secs(86_400));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.code_length, 6);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.snapshot_path, PathBuf::from("sessions.json"));
        assert!(config.upload_policy.is_some());
    }

    #[test]
    fn test_in_dir() {
        let config = RegistryConfig::in_dir("/var/lib/share");

        assert_eq!(config.upload_dir, PathBuf::from("/var/lib/share/uploads"));
        assert_eq!(
            config.snapshot_path,
            PathBuf::from("/var/lib/share/sessions.json")
        );
    }

    #[test]
    fn test_builder_chaining() {
        let config = RegistryConfig::default()
            .code_validity(Duration::from_secs(30))
            .file_retention(Duration::from_secs(3600))
            .tick_interval(Duration::from_millis(250))
            .code_length(8)
            .without_upload_policy();

        assert_eq!(config.code_validity, Duration::from_secs(30));
        assert_eq!(config.file_retention, Duration::from_secs(3600));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.code_length, 8);
        assert!(config.upload_policy.is_none());
    }

    #[test]
    fn test_builder_clamps() {
        let config = RegistryConfig::default()
            .code_length(2)
            .tick_interval(Duration::ZERO);

        assert_eq!(config.code_length, MIN_CODE_LENGTH);
        assert_eq!(config.tick_interval, Duration::from_millis(1));
    }
}
