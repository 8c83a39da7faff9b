//! Durable registry snapshot
//!
//! The registry is persisted as one JSON document mapping each active code
//! to its session record:
//!
//! ```json
//! {
//!   "AB12CD": {
//!     "filename": "report.pdf",
//!     "file_paths": ["uploads/3f9c0a7be21d4410/report.pdf"],
//!     "created_at": "2024-05-01T10:00:00.123456789Z",
//!     "last_code_time": "2024-05-01T10:01:01Z",
//!     "downloads": 2
//!   }
//! }
//! ```
//!
//! Timestamps are RFC 3339 UTC with up to nanosecond precision and
//! round-trip exactly. Loading is tolerant: a missing or corrupt snapshot
//! means an empty registry, never a failed startup.

pub mod record;
pub mod store;

pub use record::{RawSessionRecord, RawTimestamp, SessionRecord};
pub use store::{decode, encode, PersistenceError, Snapshot, SnapshotStore};
