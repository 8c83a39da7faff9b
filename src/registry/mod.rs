//! Code-addressed session registry
//!
//! The registry maps short share codes to sessions of uploaded files. Every
//! session is subject to two independent horizons: the code-validity window,
//! after which its code is rotated to a fresh one, and the file-retention
//! window, after which the session and its files are destroyed.
//!
//! # Architecture
//!
//! ```text
//!                            Arc<SessionStore>
//!                     ┌────────────────────────────┐
//!                     │ RwLock<Inner {             │
//!                     │   codes:    Code -> Id,    │
//!                     │   sessions: Id -> Session, │
//!                     │   pending:  [blobs],       │
//!                     │ }>                         │
//!                     └──────────────┬─────────────┘
//!                                    │
//!         ┌──────────────────────────┼──────────────────────────┐
//!         │                          │                          │
//!         ▼                          ▼                          ▼
//!    [Uploader]                [Downloader]              [ExpiryScheduler]
//!    create()                  resolve() -> view         tick(): rotate()
//!      │  BlobStore::write_all   view.open(name)                 cleanup()
//!      │                         confirm_download()              │
//!      └──────────► SnapshotStore::save() ◄─────────────────────┘
//! ```
//!
//! # Lock discipline
//!
//! Every mutation holds the write lock only for the in-memory change. Blob
//! writes happen before the lock is taken, blob deletions and snapshot
//! writes after it is released.
//!
//! # Session lifecycle
//!
//! ```text
//! Active(code1) --rotate--> Active(code2) --rotate--> ... --cleanup--> Deleted
//! ```
//!
//! Rotation removes the old code and inserts the new one under one write
//! lock acquisition, so a session is always reachable under exactly one code.
//! `Deleted` is terminal.

pub mod code;
pub mod config;
pub mod entry;
pub mod error;
pub mod scheduler;
pub mod store;

pub use code::{Code, CodeGenerator, CODE_ALPHABET, DEFAULT_CODE_LENGTH};
pub use config::RegistryConfig;
pub use entry::{
    CleanupReport, ReadLease, RegistryStats, Rotation, Session, SessionId, SessionView,
    SharedFile, TickReport,
};
pub use error::{RegistryError, Result};
pub use scheduler::{ExpiryScheduler, SchedulerHandle};
pub use store::SessionStore;

/// Canonical timestamp type, serialized as RFC 3339 UTC
pub type Timestamp = chrono::DateTime<chrono::Utc>;
