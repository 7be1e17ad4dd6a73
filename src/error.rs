//! Index engine error types
//!
//! Defines all errors that can occur in the index subsystem, from
//! configuration parsing through chunk deserialization.

use thiserror::Error;

/// Errors that can occur in the index engine
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or illegal configuration parameter
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested aggregator or distance is not supported by this index type
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    /// Non-numeric series type supplied
    #[error("Unsupported data type: {0}")]
    DataType(String),

    /// Short read or structural inconsistency during chunk deserialization
    #[error("Corrupt index chunk: {0}")]
    CorruptChunk(String),

    /// I/O failure while unpacking an index chunk; the chunk is skipped
    /// and the query continues on the remaining chunks
    #[error("Chunk unpack failed: {0}")]
    ChunkUnpack(String),

    /// Serialization/deserialization of auxiliary state failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invariant violation; the index enters a terminal closed state
    #[error("Fatal index error: {0}")]
    Fatal(String),

    /// The index or preprocessor was closed or deleted; no further calls allowed
    #[error("Index is closed")]
    Closed,
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

impl IndexError {
    /// Transient errors are logged and the offending chunk skipped;
    /// everything else propagates to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::ChunkUnpack(_))
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::Config("feature_dim 8 exceeds window_range 4".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: feature_dim 8 exceeds window_range 4"
        );

        let err = IndexError::Closed;
        assert_eq!(err.to_string(), "Index is closed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: IndexError = io_err.into();
        assert!(matches!(err, IndexError::Io(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(IndexError::ChunkUnpack("bad file".into()).is_transient());
        assert!(!IndexError::CorruptChunk("bad magic".into()).is_transient());
        assert!(!IndexError::Fatal("mbr containment broken".into()).is_transient());
    }
}
