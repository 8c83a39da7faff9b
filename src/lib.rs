//! # codeshare-rs
//!
//! Ephemeral, code-addressed file sharing registry.
//!
//! An uploader hands a set of files to [`SessionStore::create`] and gets a
//! short random code back. A downloader redeems the code with
//! [`SessionStore::resolve`], streams the files, and confirms the transfer.
//! Codes rotate after a short validity window while the files stay put; the
//! files themselves are deleted once the retention window has passed.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use codeshare_rs::{RegistryConfig, SessionStore, UploadFile};
//!
//! # async fn run() -> codeshare_rs::Result<()> {
//! let store = Arc::new(SessionStore::open(RegistryConfig::in_dir("/var/lib/share")).await?);
//! let scheduler = store.spawn_scheduler();
//!
//! let code = store.create(vec![UploadFile::new("notes.txt", "hello")]).await?;
//!
//! let view = store.resolve(code.as_str()).await?;
//! let _file = view.open("notes.txt").await?;
//! store.confirm_download(&view).await?;
//!
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! The registry is single-process: the snapshot file must not be shared
//! between instances.

pub mod blob;
pub mod persistence;
pub mod registry;
pub mod upload;

pub use blob::BlobStore;
pub use persistence::{SessionRecord, SnapshotStore};
pub use registry::{
    Code, RegistryConfig, RegistryError, Result, SchedulerHandle, SessionStore, SessionView,
    Timestamp,
};
pub use upload::{UploadFile, UploadPolicy};
