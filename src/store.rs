use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{ShareFile, SharePayload, ShareRecord};

/// How long a stored share stays retrievable. Old enough to survive a slow
/// page launch, short enough that abandoned image payloads don't pile up.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Durable handoff storage for intercepted shares. The interceptor writes a
/// record here and a future page claims it; the store is the only state
/// shared between those two contexts, so it has to survive process
/// restarts in between.
#[derive(Clone)]
pub struct ShareStore {
    pool: SqlitePool,
    retention: Duration,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ShareStore {
    pub fn new(pool: SqlitePool, retention: Duration) -> Self {
        Self { pool, retention }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts (or overwrites) a record under `id`, stamping the current
    /// time. Expired records are purged opportunistically on every save so
    /// shares that are never retrieved cannot leak storage indefinitely.
    pub async fn save(&self, id: &str, payload: SharePayload) -> Result<ShareRecord, sqlx::Error> {
        if let Err(e) = self.purge_older_than(self.retention).await {
            // A failed sweep must not block the handoff itself.
            warn!("Failed to purge expired shares: {}", e);
        }

        let timestamp = now_ms();

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM share_files WHERE share_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO share_records (id, title, shared_text, shared_url, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                shared_text = excluded.shared_text,
                shared_url = excluded.shared_url,
                created_at = excluded.created_at
            "#,
        )
        .bind(id)
        .bind(&payload.title)
        .bind(&payload.text)
        .bind(&payload.shared_url)
        .bind(timestamp)
        .execute(&mut *tx)
        .await?;

        for (position, file) in payload.files.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO share_files (share_id, position, file_name, mime_type, byte_size, data)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id)
            .bind(position as i64)
            .bind(&file.name)
            .bind(&file.mime)
            .bind(file.size)
            .bind(&file.data)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("Stored share {} ({} file(s))", id, payload.files.len());

        Ok(ShareRecord {
            id: id.to_string(),
            title: payload.title,
            text: payload.text,
            shared_url: payload.shared_url,
            files: payload.files,
            timestamp,
        })
    }

    /// Returns the record for `id`, or `None`. A miss is a normal outcome,
    /// not an error. Records past the retention window are treated as
    /// absent even if a sweep has not physically removed them yet.
    pub async fn get(&self, id: &str) -> Result<Option<ShareRecord>, sqlx::Error> {
        let cutoff = now_ms() - self.retention.as_millis() as i64;

        let row = sqlx::query(
            r#"
            SELECT id, title, shared_text, shared_url, created_at
            FROM share_records
            WHERE id = $1 AND created_at >= $2
            "#,
        )
        .bind(id)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let files = self.load_files(id).await?;

        Ok(Some(ShareRecord {
            id: row.get("id"),
            title: row.get("title"),
            text: row.get("shared_text"),
            shared_url: row.get("shared_url"),
            files,
            timestamp: row.get("created_at"),
        }))
    }

    /// Removes the record for `id`. Idempotent: deleting a missing id is
    /// not an error.
    pub async fn delete(&self, id: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM share_files WHERE share_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM share_records WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    /// Read-then-delete as one transaction. Concurrent takers for the same
    /// id serialize here, so exactly one of them observes the record.
    pub async fn take(&self, id: &str) -> Result<Option<ShareRecord>, sqlx::Error> {
        let cutoff = now_ms() - self.retention.as_millis() as i64;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, title, shared_text, shared_url, created_at
            FROM share_records
            WHERE id = $1 AND created_at >= $2
            "#,
        )
        .bind(id)
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let file_rows = sqlx::query(
            r#"
            SELECT file_name, mime_type, byte_size, data
            FROM share_files
            WHERE share_id = $1
            ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM share_files WHERE share_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM share_records WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let files = file_rows
            .into_iter()
            .map(|r| ShareFile {
                name: r.get("file_name"),
                mime: r.get("mime_type"),
                size: r.get("byte_size"),
                data: r.get("data"),
            })
            .collect();

        Ok(Some(ShareRecord {
            id: row.get("id"),
            title: row.get("title"),
            text: row.get("shared_text"),
            shared_url: row.get("shared_url"),
            files,
            timestamp: row.get("created_at"),
        }))
    }

    /// Deletes every record older than `max_age`. Not required to be exact
    /// or scheduled; `save` invokes it on each write.
    pub async fn purge_older_than(&self, max_age: Duration) -> Result<u64, sqlx::Error> {
        let cutoff = now_ms() - max_age.as_millis() as i64;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM share_files WHERE share_id IN
                (SELECT id FROM share_records WHERE created_at < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        let purged = sqlx::query("DELETE FROM share_records WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if purged > 0 {
            debug!("Purged {} expired share record(s)", purged);
        }
        Ok(purged)
    }

    async fn load_files(&self, id: &str) -> Result<Vec<ShareFile>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT file_name, mime_type, byte_size, data
            FROM share_files
            WHERE share_id = $1
            ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ShareFile {
                name: r.get("file_name"),
                mime: r.get("mime_type"),
                size: r.get("byte_size"),
                data: r.get("data"),
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    pub(crate) async fn memory_store() -> ShareStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");
        ShareStore::new(pool, DEFAULT_RETENTION)
    }

    pub(crate) fn payload_with_files() -> SharePayload {
        SharePayload {
            title: Some("Receipt".to_string()),
            text: Some("Coffee 4.50".to_string()),
            shared_url: None,
            files: vec![
                ShareFile {
                    name: "receipt-1.png".to_string(),
                    mime: "image/png".to_string(),
                    size: 4,
                    data: vec![0x89, 0x50, 0x4e, 0x47],
                },
                ShareFile {
                    name: "receipt-2.jpg".to_string(),
                    mime: "image/jpeg".to_string(),
                    size: 5,
                    data: vec![0xff, 0xd8, 0x00, 0x7f, 0xff],
                },
            ],
        }
    }

    async fn backdate(store: &ShareStore, id: &str, age: Duration) {
        let stamp = now_ms() - age.as_millis() as i64;
        sqlx::query("UPDATE share_records SET created_at = $1 WHERE id = $2")
            .bind(stamp)
            .bind(id)
            .execute(store.pool())
            .await
            .expect("backdate");
    }

    #[tokio::test]
    async fn round_trip_preserves_files_byte_for_byte() {
        let store = memory_store().await;
        let payload = payload_with_files();

        store.save("s1", payload.clone()).await.unwrap();
        let record = store.get("s1").await.unwrap().expect("record present");

        assert_eq!(record.title.as_deref(), Some("Receipt"));
        assert_eq!(record.text.as_deref(), Some("Coffee 4.50"));
        assert_eq!(record.files, payload.files);
    }

    #[tokio::test]
    async fn empty_record_is_valid() {
        let store = memory_store().await;
        store.save("s1", SharePayload::default()).await.unwrap();

        let record = store.get("s1").await.unwrap().expect("record present");
        assert!(record.title.is_none());
        assert!(record.text.is_none());
        assert!(record.shared_url.is_none());
        assert!(record.files.is_empty());
    }

    #[tokio::test]
    async fn missing_id_is_a_normal_miss() {
        let store = memory_store().await;
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn take_delivers_at_most_once() {
        let store = memory_store().await;
        store.save("s1", payload_with_files()).await.unwrap();

        let first = store.take("s1").await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().files.len(), 2);

        assert!(store.take("s1").await.unwrap().is_none());
        assert!(store.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = memory_store().await;
        store.delete("never-existed").await.unwrap();

        store.save("s1", SharePayload::default()).await.unwrap();
        store.delete("s1").await.unwrap();
        store.delete("s1").await.unwrap();
        assert!(store.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_record_is_unreachable_before_any_sweep() {
        let store = memory_store().await;
        store.save("old", payload_with_files()).await.unwrap();
        backdate(&store, "old", Duration::from_secs(2 * 60 * 60)).await;

        // No purge has run, yet the record must not come back.
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.take("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_sweeps_expired_records() {
        let store = memory_store().await;
        store.save("old", payload_with_files()).await.unwrap();
        backdate(&store, "old", Duration::from_secs(2 * 60 * 60)).await;

        // An unrelated new share triggers the opportunistic purge.
        store.save("new", SharePayload::default()).await.unwrap();

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM share_records")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 1);

        let orphan_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM share_files")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(orphan_files, 0);
    }

    #[tokio::test]
    async fn save_overwrites_existing_id() {
        let store = memory_store().await;
        store.save("s1", payload_with_files()).await.unwrap();

        store
            .save(
                "s1",
                SharePayload {
                    text: Some("Lunch 12.00".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let record = store.get("s1").await.unwrap().unwrap();
        assert_eq!(record.text.as_deref(), Some("Lunch 12.00"));
        assert!(record.files.is_empty());
    }
}
