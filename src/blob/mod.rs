//! Blob storage for uploaded files
//!
//! The registry only keeps paths into the blob store. The store owns the
//! bytes and is asked to delete them when a session expires.

pub mod store;

pub use store::{open, sanitize_file_name, BlobStore, StoredBlob};
