use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::StoreError;

use super::{DocumentStore, PutOptions};

/// Documents kept in a single SQLite table
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Run migrations
        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY NOT NULL,
                body BLOB NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        tracing::info!("Document store migrations complete");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(r.get("body")),
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }

    async fn put(&self, path: &str, body: Vec<u8>, options: PutOptions) -> Result<String, StoreError> {
        if options.overwrite {
            sqlx::query(
                r#"INSERT INTO documents (path, body) VALUES (?, ?)
                ON CONFLICT(path) DO UPDATE SET
                    body = excluded.body,
                    updated_at = CURRENT_TIMESTAMP"#,
            )
            .bind(path)
            .bind(body)
            .execute(&self.pool)
            .await?;
        } else {
            let result = sqlx::query("INSERT OR IGNORE INTO documents (path, body) VALUES (?, ?)")
                .bind(path)
                .bind(body)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::AlreadyExists(path.to_string()));
            }
        }

        Ok(format!("sqlite://{}", path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT path FROM documents WHERE substr(path, 1, length(?)) = ? ORDER BY path",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.get("path")).collect())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM documents WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
