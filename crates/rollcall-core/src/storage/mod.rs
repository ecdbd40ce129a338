//! Durable document storage behind the enrollment store and the ledger.
//!
//! Two named collections of JSON documents. The local tier is SQLite; the
//! remote tier mirrors every write to an HTTP document service and keeps the
//! local copy authoritative. Which tier is used is decided once at startup by
//! [`select`].

mod remote;
mod sqlite;

pub use remote::{HttpStorage, MirroredStorage};
pub use sqlite::SqliteStorage;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote: {0}")]
    Remote(#[from] reqwest::Error),
    #[error("remote rejected {method} {url}: HTTP {status}")]
    RemoteStatus {
        method: &'static str,
        url: String,
        status: u16,
    },
    #[error("invalid remote url: {0}")]
    InvalidUrl(String),
}

/// The two persisted collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    EnrolledPeople,
    AttendanceRecords,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::EnrolledPeople => "enrolled_people",
            Collection::AttendanceRecords => "attendance_records",
        }
    }
}

/// One keyed JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub body: serde_json::Value,
}

/// A stored body that could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Unreadable {
    pub key: String,
    pub reason: String,
}

/// Result of loading a collection. One bad body does not hide the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Loaded {
    pub documents: Vec<Document>,
    pub unreadable: Vec<Unreadable>,
}

/// Ordered keyed document collections.
///
/// `put` on a new key appends; `put` on an existing key replaces the body
/// and keeps the document's position.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend name for logs and status output.
    fn backend(&self) -> &'static str;

    async fn load(&self, collection: Collection) -> Result<Loaded, StorageError>;

    async fn put(&self, collection: Collection, doc: &Document) -> Result<(), StorageError>;

    /// Returns `true` when a document was removed.
    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StorageError>;

    async fn clear(&self, collection: Collection) -> Result<(), StorageError>;

    /// Clear `collection` in this process's own copy only. Mirrors keep
    /// theirs.
    async fn reset_local(&self, collection: Collection) -> Result<(), StorageError> {
        self.clear(collection).await
    }
}

/// Pick the storage tier for this process.
///
/// With no `remote_url` the local tier is used directly. Otherwise the remote
/// service is probed once; a reachable remote is mirrored, an unreachable one
/// is logged and the local tier is used alone.
pub async fn select(
    local: SqliteStorage,
    remote_url: Option<&str>,
    probe_timeout: Duration,
) -> Arc<dyn Storage> {
    let Some(url) = remote_url else {
        tracing::info!("using local storage");
        return Arc::new(local);
    };

    match HttpStorage::connect(url, probe_timeout).await {
        Ok(remote) => {
            tracing::info!(url, "remote storage reachable; mirroring writes");
            Arc::new(MirroredStorage::new(Arc::new(local), Arc::new(remote)))
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "remote storage unreachable; using local storage only");
            Arc::new(local)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Storage double with switchable failures.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub struct FlakyStorage {
        pub inner: SqliteStorage,
        pub fail_writes: AtomicBool,
        pub fail_loads: AtomicBool,
        pub clears: AtomicUsize,
    }

    impl FlakyStorage {
        pub async fn new() -> Self {
            Self {
                inner: SqliteStorage::open_in_memory().await.unwrap(),
                fail_writes: AtomicBool::new(false),
                fail_loads: AtomicBool::new(false),
                clears: AtomicUsize::new(0),
            }
        }

        fn check(flag: &AtomicBool) -> Result<(), StorageError> {
            if flag.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        fn backend(&self) -> &'static str {
            "flaky"
        }

        async fn load(&self, collection: Collection) -> Result<Loaded, StorageError> {
            Self::check(&self.fail_loads)?;
            self.inner.load(collection).await
        }

        async fn put(&self, collection: Collection, doc: &Document) -> Result<(), StorageError> {
            Self::check(&self.fail_writes)?;
            self.inner.put(collection, doc).await
        }

        async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StorageError> {
            Self::check(&self.fail_writes)?;
            self.inner.delete(collection, key).await
        }

        async fn clear(&self, collection: Collection) -> Result<(), StorageError> {
            Self::check(&self.fail_writes)?;
            self.clears.fetch_add(1, Ordering::SeqCst);
            self.inner.clear(collection).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::EnrolledPeople.name(), "enrolled_people");
        assert_eq!(Collection::AttendanceRecords.name(), "attendance_records");
    }

    #[tokio::test]
    async fn test_select_without_remote_is_local() {
        let local = SqliteStorage::open_in_memory().await.unwrap();
        let storage = select(local, None, Duration::from_millis(100)).await;
        assert_eq!(storage.backend(), "sqlite");
    }

    #[tokio::test]
    async fn test_select_falls_back_when_remote_unreachable() {
        let local = SqliteStorage::open_in_memory().await.unwrap();
        // Port 9 (discard) on loopback is not expected to serve HTTP.
        let storage = select(local, Some("http://127.0.0.1:9"), Duration::from_millis(200)).await;
        assert_eq!(storage.backend(), "sqlite");
    }
}
