use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use super::{Collection, Document, Loaded, Storage, StorageError};

/// HTTP document service.
///
/// Layout under the base URL:
/// - `GET /health` readiness probe
/// - `GET /collections/{name}` → JSON array of `{key, body}`
/// - `PUT /collections/{name}/{key}` with the body as JSON
/// - `DELETE /collections/{name}/{key}` (404 when absent)
/// - `DELETE /collections/{name}`
pub struct HttpStorage {
    client: Client,
    base: Url,
}

impl HttpStorage {
    /// Build a client for `base_url` and probe its health endpoint.
    pub async fn connect(base_url: &str, timeout: Duration) -> Result<Self, StorageError> {
        let base = Url::parse(base_url).map_err(|e| StorageError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(StorageError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        let storage = Self { client, base };

        let url = storage.url(&["health"])?;
        let resp = storage.client.get(url.clone()).send().await?;
        check_status("GET", &url, resp.status())?;

        Ok(storage)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn check_status(method: &'static str, url: &Url, status: StatusCode) -> Result<(), StorageError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StorageError::RemoteStatus {
            method,
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl Storage for HttpStorage {
    fn backend(&self) -> &'static str {
        "http"
    }

    async fn load(&self, collection: Collection) -> Result<Loaded, StorageError> {
        let url = self.url(&["collections", collection.name()])?;
        let resp = self.client.get(url.clone()).send().await?;
        check_status("GET", &url, resp.status())?;
        Ok(Loaded {
            documents: resp.json().await?,
            unreadable: Vec::new(),
        })
    }

    async fn put(&self, collection: Collection, doc: &Document) -> Result<(), StorageError> {
        let url = self.url(&["collections", collection.name(), &doc.key])?;
        let resp = self.client.put(url.clone()).json(&doc.body).send().await?;
        check_status("PUT", &url, resp.status())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StorageError> {
        let url = self.url(&["collections", collection.name(), key])?;
        let resp = self.client.delete(url.clone()).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status("DELETE", &url, resp.status())?;
        Ok(true)
    }

    async fn clear(&self, collection: Collection) -> Result<(), StorageError> {
        let url = self.url(&["collections", collection.name()])?;
        let resp = self.client.delete(url.clone()).send().await?;
        check_status("DELETE", &url, resp.status())
    }
}

/// Local tier plus a best-effort remote mirror.
///
/// The local tier is authoritative: reads come from it and its write errors
/// are returned. Remote write errors are logged and the document stays local.
pub struct MirroredStorage {
    local: Arc<dyn Storage>,
    remote: Arc<dyn Storage>,
}

impl MirroredStorage {
    pub fn new(local: Arc<dyn Storage>, remote: Arc<dyn Storage>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl Storage for MirroredStorage {
    fn backend(&self) -> &'static str {
        "mirrored"
    }

    async fn load(&self, collection: Collection) -> Result<Loaded, StorageError> {
        self.local.load(collection).await
    }

    async fn put(&self, collection: Collection, doc: &Document) -> Result<(), StorageError> {
        self.local.put(collection, doc).await?;
        if let Err(e) = self.remote.put(collection, doc).await {
            tracing::warn!(
                collection = collection.name(),
                key = %doc.key,
                error = %e,
                "remote mirror write failed; kept locally"
            );
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StorageError> {
        let removed = self.local.delete(collection, key).await?;
        if let Err(e) = self.remote.delete(collection, key).await {
            tracing::warn!(collection = collection.name(), key, error = %e, "remote mirror delete failed");
        }
        Ok(removed)
    }

    async fn clear(&self, collection: Collection) -> Result<(), StorageError> {
        self.local.clear(collection).await?;
        if let Err(e) = self.remote.clear(collection).await {
            tracing::warn!(collection = collection.name(), error = %e, "remote mirror clear failed");
        }
        Ok(())
    }

    async fn reset_local(&self, collection: Collection) -> Result<(), StorageError> {
        self.local.reset_local(collection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use serde_json::json;
    use std::sync::Mutex;

    /// Remote double that records writes or fails every call.
    #[derive(Default)]
    struct FakeRemote {
        offline: bool,
        puts: Mutex<Vec<String>>,
        clears: Mutex<usize>,
    }

    #[async_trait]
    impl Storage for FakeRemote {
        fn backend(&self) -> &'static str {
            "fake"
        }

        async fn load(&self, _: Collection) -> Result<Loaded, StorageError> {
            Ok(Loaded::default())
        }

        async fn put(&self, _: Collection, doc: &Document) -> Result<(), StorageError> {
            if self.offline {
                return Err(StorageError::RemoteStatus {
                    method: "PUT",
                    url: "http://remote/".into(),
                    status: 503,
                });
            }
            self.puts.lock().unwrap().push(doc.key.clone());
            Ok(())
        }

        async fn delete(&self, _: Collection, _: &str) -> Result<bool, StorageError> {
            Ok(true)
        }

        async fn clear(&self, _: Collection) -> Result<(), StorageError> {
            *self.clears.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn record_doc(key: &str) -> Document {
        Document {
            key: key.into(),
            body: json!({"activity": "CS101"}),
        }
    }

    #[tokio::test]
    async fn test_mirrored_writes_both_tiers() {
        let local = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let remote = Arc::new(FakeRemote::default());
        let storage = MirroredStorage::new(local.clone(), remote.clone());

        storage.put(Collection::AttendanceRecords, &record_doc("r1")).await.unwrap();

        assert_eq!(local.load(Collection::AttendanceRecords).await.unwrap().documents.len(), 1);
        assert_eq!(*remote.puts.lock().unwrap(), vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_mirrored_keeps_record_locally_when_remote_fails() {
        let local = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let remote = Arc::new(FakeRemote {
            offline: true,
            ..Default::default()
        });
        let storage = MirroredStorage::new(local.clone(), remote);

        storage.put(Collection::AttendanceRecords, &record_doc("r1")).await.unwrap();

        let loaded = storage.load(Collection::AttendanceRecords).await.unwrap();
        assert_eq!(loaded.documents, vec![record_doc("r1")]);
    }

    #[tokio::test]
    async fn test_reset_local_leaves_remote_copy() {
        let local = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let remote = Arc::new(FakeRemote::default());
        let storage = MirroredStorage::new(local.clone(), remote.clone());
        storage.put(Collection::EnrolledPeople, &record_doc("S1")).await.unwrap();

        storage.reset_local(Collection::EnrolledPeople).await.unwrap();
        assert!(local.load(Collection::EnrolledPeople).await.unwrap().documents.is_empty());
        assert_eq!(*remote.clears.lock().unwrap(), 0);

        storage.clear(Collection::EnrolledPeople).await.unwrap();
        assert_eq!(*remote.clears.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_http_connect_rejects_bad_url() {
        let err = HttpStorage::connect("not a url", Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::InvalidUrl(_)));
    }
}
