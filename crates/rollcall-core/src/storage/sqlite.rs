use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use super::{Collection, Document, Loaded, Storage, StorageError, Unreadable};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    key        TEXT NOT NULL,
    position   INTEGER NOT NULL,
    body       TEXT NOT NULL,
    PRIMARY KEY (collection, key)
);
CREATE INDEX IF NOT EXISTS documents_order ON documents (collection, position);
";

/// Local document store backed by a single SQLite file.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let conn = Connection::open(path).await?;
        tracing::debug!(path = %path.display(), "opened sqlite storage");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Write a raw body string, bypassing JSON encoding. Test hook for
    /// simulating on-disk corruption.
    #[cfg(test)]
    pub(crate) async fn put_raw(
        &self,
        collection: Collection,
        key: &str,
        body: &str,
    ) -> Result<(), StorageError> {
        let (name, key, body) = (collection.name(), key.to_string(), body.to_string());
        self.conn
            .call(move |conn| {
                upsert(conn, name, &key, &body)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn upsert(conn: &rusqlite::Connection, collection: &str, key: &str, body: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO documents (collection, key, position, body)
         VALUES (?1, ?2, (SELECT COALESCE(MAX(position), 0) + 1 FROM documents WHERE collection = ?1), ?3)
         ON CONFLICT (collection, key) DO UPDATE SET body = excluded.body",
        params![collection, key, body],
    )?;
    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, collection: Collection) -> Result<Loaded, StorageError> {
        let name = collection.name();
        let rows: Vec<(String, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, body FROM documents WHERE collection = ?1 ORDER BY position",
                )?;
                let rows = stmt
                    .query_map(params![name], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut loaded = Loaded::default();
        for (key, body) in rows {
            match serde_json::from_str(&body) {
                Ok(body) => loaded.documents.push(Document { key, body }),
                Err(e) => {
                    tracing::warn!(collection = name, key = %key, error = %e, "unparseable document");
                    loaded.unreadable.push(Unreadable {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(loaded)
    }

    async fn put(&self, collection: Collection, doc: &Document) -> Result<(), StorageError> {
        let name = collection.name();
        let key = doc.key.clone();
        let body = doc.body.to_string();
        self.conn
            .call(move |conn| {
                upsert(conn, name, &key, &body)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StorageError> {
        let name = collection.name();
        let key = key.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT position FROM documents WHERE collection = ?1 AND key = ?2",
                        params![name, key],
                        |row| row.get(0),
                    )
                    .optional()?;
                if existing.is_none() {
                    return Ok(false);
                }
                conn.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND key = ?2",
                    params![name, key],
                )?;
                Ok(true)
            })
            .await?;
        Ok(removed)
    }

    async fn clear(&self, collection: Collection) -> Result<(), StorageError> {
        let name = collection.name();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM documents WHERE collection = ?1", params![name])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(key: &str, body: serde_json::Value) -> Document {
        Document {
            key: key.into(),
            body,
        }
    }

    #[tokio::test]
    async fn test_put_appends_and_replace_keeps_position() {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        let c = Collection::EnrolledPeople;

        storage.put(c, &doc("a", json!({"v": 1}))).await.unwrap();
        storage.put(c, &doc("b", json!({"v": 2}))).await.unwrap();
        storage.put(c, &doc("a", json!({"v": 3}))).await.unwrap();

        let loaded = storage.load(c).await.unwrap();
        assert_eq!(loaded.documents, vec![doc("a", json!({"v": 3})), doc("b", json!({"v": 2}))]);
    }

    #[tokio::test]
    async fn test_collections_are_independent() {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        storage
            .put(Collection::EnrolledPeople, &doc("a", json!(1)))
            .await
            .unwrap();

        assert!(storage.load(Collection::AttendanceRecords).await.unwrap().documents.is_empty());
        storage.clear(Collection::AttendanceRecords).await.unwrap();
        assert_eq!(storage.load(Collection::EnrolledPeople).await.unwrap().documents.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_reports_whether_removed() {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        let c = Collection::EnrolledPeople;
        storage.put(c, &doc("a", json!(1))).await.unwrap();

        assert!(storage.delete(c, "a").await.unwrap());
        assert!(!storage.delete(c, "a").await.unwrap());
        assert!(storage.load(c).await.unwrap().documents.is_empty());
    }

    #[tokio::test]
    async fn test_load_reports_unparseable_body_and_keeps_the_rest() {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        let c = Collection::AttendanceRecords;
        storage.put(c, &doc("good", json!({"v": 1}))).await.unwrap();
        storage.put_raw(c, "broken", "{not json").await.unwrap();
        storage.put(c, &doc("later", json!({"v": 2}))).await.unwrap();

        let loaded = storage.load(c).await.unwrap();
        assert_eq!(loaded.documents, vec![doc("good", json!({"v": 1})), doc("later", json!({"v": 2}))]);
        assert_eq!(loaded.unreadable.len(), 1);
        assert_eq!(loaded.unreadable[0].key, "broken");
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/rollcall.db");

        {
            let storage = SqliteStorage::open(&path).await.unwrap();
            storage
                .put(Collection::AttendanceRecords, &doc("r1", json!({"x": true})))
                .await
                .unwrap();
        }

        let storage = SqliteStorage::open(&path).await.unwrap();
        let loaded = storage.load(Collection::AttendanceRecords).await.unwrap();
        assert_eq!(loaded.documents, vec![doc("r1", json!({"x": true}))]);
    }
}
