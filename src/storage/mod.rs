//! Object store used by the upload pipeline.
//!
//! Handlers never touch the filesystem directly: they hand a byte stream to
//! [`ObjectStore::put`] and get back an [`ObjectKey`] and an [`ObjectLocation`].
//! The worker reads objects back through [`ObjectStore::open`] and writes its
//! artifacts at deterministic keys through [`ObjectStore::put_at`].

mod keys;
mod local;

pub use keys::{KeyError, ObjectKey};
pub use local::LocalObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Streaming reader handed to and returned by the store.
pub type ByteReader<'a> = Pin<Box<dyn AsyncRead + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("object not found: {0}")]
    NotFound(ObjectKey),

    #[error("no free key for {key} after {attempts} attempts")]
    KeyExhausted { key: ObjectKey, attempts: usize },

    /// Reading the caller-supplied stream failed (client went away, body too
    /// large, malformed multipart). Nothing is left behind when this is returned.
    #[error("failed to read upload stream: {0}")]
    Source(#[source] std::io::Error),

    #[error("storage I/O failed while {operation} {path}: {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(operation: &'static str, path: impl fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_string(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Locator returned to clients for a stored object. Opaque to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ObjectLocation(String);

impl ObjectLocation {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores a new object named after `filename`, streaming bytes from
    /// `reader`. The returned key is unique; the data is synced before return.
    async fn put(
        &self,
        filename: &str,
        reader: ByteReader<'_>,
    ) -> StorageResult<(ObjectKey, ObjectLocation, u64)>;

    /// Writes `data` at exactly `key`, replacing any previous artifact.
    async fn put_at(&self, key: &ObjectKey, data: Bytes) -> StorageResult<ObjectLocation>;

    /// Opens an object for reading.
    async fn open(&self, key: &ObjectKey) -> StorageResult<ByteReader<'static>>;

    /// Best-effort removal. Deleting a missing object is not an error.
    async fn delete(&self, key: &ObjectKey) -> StorageResult<()>;

    fn location(&self, key: &ObjectKey) -> ObjectLocation;
}
