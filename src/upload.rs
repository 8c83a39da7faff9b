//! Upload input types and validation
//!
//! The UI layer hands uploaded files to the registry as [`UploadFile`]s.
//! [`UploadPolicy`] holds the extension whitelist and size limit applied
//! before anything touches disk.

use std::collections::BTreeSet;

use bytes::Bytes;

use crate::registry::RegistryError;

/// Default maximum size of a single uploaded file (200 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 200 * 1024 * 1024;

/// Extensions accepted by the default policy
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "txt", "pdf", "png", "jpg", "jpeg", "gif", "doc", "docx", "xls", "xlsx", "zip", "rar",
];

/// A file received from an uploader
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Client-supplied file name (sanitized before storage)
    pub name: String,
    /// File content
    pub bytes: Bytes,
}

impl UploadFile {
    /// Create an upload from a name and content
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Size of the content in bytes
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Check if the content is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lower-cased text after the last `.` of the name, if any
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() && ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Restrictions applied to every file of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Accepted extensions, lower-case, without the dot
    pub allowed_extensions: BTreeSet<String>,
    /// Maximum size of a single file in bytes
    pub max_file_size: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl UploadPolicy {
    /// Add an accepted extension
    pub fn allow_extension(mut self, ext: &str) -> Self {
        self.allowed_extensions
            .insert(ext.trim_start_matches('.').to_ascii_lowercase());
        self
    }

    /// Set the maximum file size
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Check whether a file name carries an accepted extension
    pub fn is_allowed(&self, file: &UploadFile) -> bool {
        file.extension()
            .map(|ext| self.allowed_extensions.contains(&ext))
            .unwrap_or(false)
    }

    /// Validate a single file
    pub fn check(&self, file: &UploadFile) -> Result<(), RegistryError> {
        if !self.is_allowed(file) {
            return Err(RegistryError::InvalidInput(format!(
                "file type not allowed: {}",
                file.name
            )));
        }
        if file.len() > self.max_file_size {
            return Err(RegistryError::InvalidInput(format!(
                "file too large: {} ({} bytes, limit {})",
                file.name,
                file.len(),
                self.max_file_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(UploadFile::new("a.TXT", "x").extension().as_deref(), Some("txt"));
        assert_eq!(
            UploadFile::new("archive.tar.gz", "x").extension().as_deref(),
            Some("gz")
        );
        assert_eq!(UploadFile::new("README", "x").extension(), None);
    }

    #[test]
    fn test_default_policy_accepts_whitelisted() {
        let policy = UploadPolicy::default();

        assert!(policy.check(&UploadFile::new("report.PDF", "%PDF")).is_ok());
        assert!(policy.check(&UploadFile::new("photo.jpeg", "...")).is_ok());
    }

    #[test]
    fn test_default_policy_rejects_unknown_extension() {
        let policy = UploadPolicy::default();

        let result = policy.check(&UploadFile::new("setup.exe", "MZ"));
        assert!(matches!(result, Err(RegistryError::InvalidInput(_))));

        let result = policy.check(&UploadFile::new("Makefile", "all:"));
        assert!(matches!(result, Err(RegistryError::InvalidInput(_))));
    }

    #[test]
    fn test_size_limit() {
        let policy = UploadPolicy::default().max_file_size(4);

        assert!(policy.check(&UploadFile::new("a.txt", "1234")).is_ok());
        assert!(matches!(
            policy.check(&UploadFile::new("a.txt", "12345")),
            Err(RegistryError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_allow_extension() {
        let policy = UploadPolicy::default().allow_extension(".MD");

        assert!(policy.is_allowed(&UploadFile::new("notes.md", "# hi")));
    }
}
