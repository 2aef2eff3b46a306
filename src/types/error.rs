use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::{BucketId, DocumentPart};

/// Recoverable failures surfaced by slot store operations.
///
/// Structural corruption of a store (duplicate timestamps, missing removal
/// targets, slots outside their bucket) is never reported through this type;
/// those conditions take the fatal path in [`crate::store`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    /// The backing volume is too full to admit a new write.
    #[error("no space: disk fill ratio {fill_ratio:.3} is at or above limit {limit:.3}")]
    NoSpace {
        /// Fill ratio reported by the disk monitor.
        fill_ratio: f64,
        /// Configured `disk_full_factor`.
        limit: f64,
    },
    /// A block store call failed; `source` carries the original cause.
    #[error("block store {op} failed for {bucket} ({part})")]
    BlockStore {
        /// Block store operation that failed.
        op: &'static str,
        /// Bucket the store represents.
        bucket: BucketId,
        /// Document part being accessed.
        part: DocumentPart,
        /// Underlying error.
        #[source]
        source: Box<StoreError>,
    },
    /// Document part could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Header references a document type the repository does not know.
    #[error("unknown document type: {0}")]
    UnknownDocumentType(String),
    /// Stored content failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Requested block or slot does not exist.
    #[error("not found")]
    NotFound,
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Returns `true` for disk admission refusals.
    pub fn is_no_space(&self) -> bool {
        matches!(self, StoreError::NoSpace { .. })
    }

    pub(crate) fn block_store(
        op: &'static str,
        bucket: BucketId,
        part: DocumentPart,
        source: StoreError,
    ) -> Self {
        StoreError::BlockStore {
            op,
            bucket,
            part,
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias for slot store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised while loading or validating [`crate::env::StoreOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read store config {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Configuration file is not valid TOML for the options schema.
    #[error("failed to parse store config: {source}")]
    Parse {
        /// Underlying parse error.
        source: toml::de::Error,
    },
    /// A value is outside its legal range.
    #[error("invalid store config: {0}")]
    Invalid(String),
}
