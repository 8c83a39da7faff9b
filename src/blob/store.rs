//! Filesystem blob store
//!
//! Every upload gets its own directory under the store root:
//!
//! ```text
//! uploads/
//! ├── 3f9c0a7be21d4410/      # one directory per upload (random blob id)
//! │   ├── report.pdf
//! │   └── photo.jpg
//! └── 81d2c4e0f7a3b956/
//!     └── notes.txt
//! ```
//!
//! The share code never appears in a path, so rotating a code leaves the
//! files untouched and two uploads of `a.txt` never overwrite each other.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::upload::UploadFile;

/// Attempts at finding an unused blob directory name
const MAX_DIR_ATTEMPTS: usize = 16;

/// Length of a blob directory name (hex-encoded u64)
const BLOB_ID_LEN: usize = 16;

/// A file written to the blob store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Sanitized file name shown to downloaders
    pub name: String,
    /// Location on disk
    pub path: PathBuf,
}

/// Owns uploaded file bytes on local disk
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open a blob store rooted at `root`, creating the directory if needed
    pub async fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        tracing::debug!(root = %root.display(), "Blob store opened");

        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write all files of one upload into a fresh directory
    ///
    /// Either every file is written or none is: on failure the partially
    /// written directory is removed before the error is returned.
    pub async fn write_all(&self, files: &[UploadFile]) -> io::Result<Vec<StoredBlob>> {
        let dir = self.create_blob_dir().await?;

        match Self::write_files(&dir, files).await {
            Ok(blobs) => {
                tracing::debug!(
                    dir = %dir.display(),
                    files = blobs.len(),
                    "Blobs written"
                );
                Ok(blobs)
            }
            Err(e) => {
                if let Err(cleanup_err) = fs::remove_dir_all(&dir).await {
                    tracing::warn!(
                        dir = %dir.display(),
                        error = %cleanup_err,
                        "Failed to remove partial upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn write_files(dir: &Path, files: &[UploadFile]) -> io::Result<Vec<StoredBlob>> {
        let mut used = HashSet::with_capacity(files.len());
        let mut blobs = Vec::with_capacity(files.len());

        for (index, file) in files.iter().enumerate() {
            let base = sanitize_file_name(&file.name);
            let mut name = base.clone();
            let mut n = index;
            // A renamed duplicate may itself clash with a name already used
            while !used.insert(name.clone()) {
                name = format!("{}_{}", n, base);
                n += 1;
            }

            let path = dir.join(&name);
            fs::write(&path, &file.bytes).await?;
            blobs.push(StoredBlob { name, path });
        }

        Ok(blobs)
    }

    async fn create_blob_dir(&self) -> io::Result<PathBuf> {
        for _ in 0..MAX_DIR_ATTEMPTS {
            let dir = self
                .root
                .join(format!("{:0width$x}", rand::random::<u64>(), width = BLOB_ID_LEN));
            match fs::create_dir(&dir).await {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            ErrorKind::AlreadyExists,
            "no free blob directory name",
        ))
    }

    /// Delete a blob file
    ///
    /// Returns `Ok(false)` if the file was already gone.
    pub async fn delete(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove a blob directory if nothing is left in it
    ///
    /// Directories outside the store root are never touched.
    pub async fn remove_dir_if_empty(&self, dir: &Path) {
        if dir == self.root || !dir.starts_with(&self.root) {
            return;
        }

        // remove_dir refuses non-empty directories, which is what we want
        match fs::remove_dir(dir).await {
            Ok(()) => tracing::debug!(dir = %dir.display(), "Blob directory removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(dir = %dir.display(), error = %e, "Blob directory kept"),
        }
    }

    /// Remove blob directories that no live file lives in
    ///
    /// `referenced` holds the paths of every file still shared. Only
    /// directories named like a blob id are considered, so files and
    /// foreign directories under the root are left alone. Returns the number
    /// of directories removed; failures are logged and skipped.
    pub async fn remove_unreferenced<'a, I>(&self, referenced: I) -> usize
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let live: HashSet<&OsStr> = referenced
            .into_iter()
            .filter_map(|p| p.parent().and_then(Path::file_name))
            .collect();

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "Failed to scan blob store");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(root = %self.root.display(), error = %e, "Failed to scan blob store");
                    break;
                }
            };

            let name = entry.file_name();
            if !is_blob_id(&name) || live.contains(name.as_os_str()) {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_dir() => {}
                _ => continue,
            }

            let dir = entry.path();
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    removed += 1;
                    tracing::info!(dir = %dir.display(), "Orphaned blob directory removed");
                }
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove orphaned blobs");
                }
            }
        }

        removed
    }
}

fn is_blob_id(name: &OsStr) -> bool {
    name.to_str().map_or(false, |s| {
        s.len() == BLOB_ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

/// Open a stored blob for streaming
pub async fn open(path: &Path) -> io::Result<fs::File> {
    fs::File::open(path).await
}

/// Make a client-supplied file name safe to use as a single path component
///
/// Only the last path component is kept. Characters outside
/// `[A-Za-z0-9._-]` become `_`, leading dots are stripped, and an empty
/// result becomes `file`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");

    let cleaned: String = base
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
