//! Tagged-file records
//!
//! One row per conversion output, tracked independently of its originating
//! job so tagging can proceed even after job history has been swept. The
//! bibliographic columns and `is_tagged` are written in a single UPDATE;
//! a partially tagged row is never observable.

use crate::error::Result;
use crate::services::catalog::BookMetadata;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

/// One conversion output and its tagging state
#[derive(Debug, Clone, Serialize)]
pub struct TaggedFile {
    pub id: Uuid,
    /// Current location; moves as tagging relocates the artifact
    pub file_path: String,
    pub is_tagged: bool,
    pub asin: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub narrator: Option<String>,
    pub series: Option<String>,
    pub series_part: Option<String>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub cover_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Store for tagged-file records
#[derive(Clone)]
pub struct TaggedFileStore {
    pool: SqlitePool,
}

impl TaggedFileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a freshly converted, untagged artifact
    pub async fn create(&self, file_path: &str) -> Result<TaggedFile> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO tagged_files (id, file_path, is_tagged, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(file_path)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(TaggedFile {
            id,
            file_path: file_path.to_string(),
            is_tagged: false,
            asin: None,
            title: None,
            author: None,
            narrator: None,
            series: None,
            series_part: None,
            description: None,
            cover_url: None,
            cover_path: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<TaggedFile>> {
        let row = sqlx::query("SELECT * FROM tagged_files WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| tagged_file_from_row(&r)).transpose()
    }

    pub async fn get_by_path(&self, file_path: &str) -> Result<Option<TaggedFile>> {
        let row = sqlx::query("SELECT * FROM tagged_files WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| tagged_file_from_row(&r)).transpose()
    }

    /// List untagged records, oldest first
    pub async fn list_untagged(&self, limit: i64, offset: i64) -> Result<Vec<TaggedFile>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tagged_files
            WHERE is_tagged = 0
            ORDER BY created_at ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(tagged_file_from_row).collect()
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tagged_files WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Write the relocated path, the full bibliographic field set and
    /// `is_tagged=1` as one record write.
    pub async fn mark_tagged(
        &self,
        id: Uuid,
        new_path: &str,
        metadata: &BookMetadata,
        cover_path: Option<&str>,
    ) -> Result<Option<TaggedFile>> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE tagged_files
            SET file_path = ?, is_tagged = 1, asin = ?, title = ?, author = ?,
                narrator = ?, series = ?, series_part = ?, description = ?,
                cover_url = ?, cover_path = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(new_path)
        .bind(&metadata.asin)
        .bind(&metadata.title)
        .bind(&metadata.author)
        .bind(&metadata.narrator)
        .bind(&metadata.series)
        .bind(&metadata.series_part)
        .bind(&metadata.description)
        .bind(&metadata.cover_url)
        .bind(cover_path)
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get(id).await
    }
}

fn tagged_file_from_row(row: &SqliteRow) -> Result<TaggedFile> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| crate::error::Error::Internal(format!("Bad file id {}: {}", id_str, e)))?;

    Ok(TaggedFile {
        id,
        file_path: row.get("file_path"),
        is_tagged: row.get::<i64, _>("is_tagged") != 0,
        asin: row.get("asin"),
        title: row.get("title"),
        author: row.get("author"),
        narrator: row.get("narrator"),
        series: row.get("series"),
        series_part: row.get("series_part"),
        description: row.get("description"),
        cover_url: row.get("cover_url"),
        cover_path: row.get("cover_path"),
        created_at: parse_timestamp(row.get("created_at")),
        updated_at: parse_timestamp(row.get("updated_at")),
    })
}

fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    fn sample_metadata() -> BookMetadata {
        BookMetadata {
            asin: "B0TEST1234".to_string(),
            title: "The Long Road".to_string(),
            author: "Jane Q. Writer".to_string(),
            authors: vec!["Jane Q. Writer".to_string()],
            narrator: "Sam Reader".to_string(),
            narrators: vec!["Sam Reader".to_string()],
            series: "Roads".to_string(),
            series_part: "2".to_string(),
            description: "A story.\n\nWith two paragraphs.".to_string(),
            cover_url: "https://img.example/cover.jpg".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_starts_untagged() {
        let store = TaggedFileStore::new(init_memory_pool().await.unwrap());
        let file = store.create("/data/ready/book.m4b").await.unwrap();

        let fetched = store.get(file.id).await.unwrap().unwrap();
        assert!(!fetched.is_tagged);
        assert!(fetched.asin.is_none());
        assert!(fetched.title.is_none());

        let untagged = store.list_untagged(50, 0).await.unwrap();
        assert_eq!(untagged.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_tagged_sets_all_fields_atomically() {
        let store = TaggedFileStore::new(init_memory_pool().await.unwrap());
        let file = store.create("/data/ready/book.m4b").await.unwrap();
        let metadata = sample_metadata();

        let tagged = store
            .mark_tagged(
                file.id,
                "/data/library/Jane Q. Writer/Roads/book.m4b",
                &metadata,
                Some("/data/covers/B0TEST1234.jpg"),
            )
            .await
            .unwrap()
            .unwrap();

        assert!(tagged.is_tagged);
        assert_eq!(tagged.asin.as_deref(), Some("B0TEST1234"));
        assert_eq!(tagged.title.as_deref(), Some("The Long Road"));
        assert_eq!(tagged.author.as_deref(), Some("Jane Q. Writer"));
        assert_eq!(tagged.narrator.as_deref(), Some("Sam Reader"));
        assert_eq!(tagged.series.as_deref(), Some("Roads"));
        assert_eq!(tagged.series_part.as_deref(), Some("2"));
        // Text fields read back byte-identical
        assert_eq!(
            tagged.description.as_deref(),
            Some("A story.\n\nWith two paragraphs.")
        );
        assert_eq!(
            tagged.file_path,
            "/data/library/Jane Q. Writer/Roads/book.m4b"
        );

        assert!(store.list_untagged(50, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_tagged_unknown_id_is_none() {
        let store = TaggedFileStore::new(init_memory_pool().await.unwrap());
        let result = store
            .mark_tagged(Uuid::new_v4(), "/x.m4b", &sample_metadata(), None)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
