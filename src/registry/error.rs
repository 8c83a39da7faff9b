//! Registry error types
//!
//! Error types for session registry operations. None of them is fatal to the
//! process: callers report them to the user, the scheduler logs and moves on.

use crate::persistence::PersistenceError;

/// Result type for registry operations
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// Empty upload set, rejected file, or malformed argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Code absent or already expired
    #[error("Code not found: {0}")]
    NotFound(String),
    /// Blob write/read/delete or snapshot write failed
    #[error("Storage failure: {0}")]
    StorageFailure(String),
    /// Persisted snapshot could not be decoded
    #[error("Persisted snapshot is corrupt: {0}")]
    PersistenceCorrupt(String),
}

impl RegistryError {
    /// Check whether this is a `NotFound` error
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::StorageFailure(err.to_string())
    }
}

impl From<PersistenceError> for RegistryError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Corrupt(reason) => RegistryError::PersistenceCorrupt(reason),
            other => RegistryError::StorageFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = RegistryError::NotFound("AB12CD".into());
        assert_eq!(err.to_string(), "Code not found: AB12CD");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_from_persistence_error() {
        let corrupt: RegistryError = PersistenceError::Corrupt("not a mapping".into()).into();
        assert!(matches!(corrupt, RegistryError::PersistenceCorrupt(_)));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let storage: RegistryError = PersistenceError::Io(io).into();
        assert!(matches!(storage, RegistryError::StorageFailure(_)));
    }
}
