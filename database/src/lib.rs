//! SQLite persistence for crawled posts and the run log.

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;
use std::str::FromStr;
use tradewatch_core::{CoreError, DatabaseError, PostRepository, RunLogEntry, ScoredPost};

/// Upper bound on ids per `IN (...)` lookup, well under SQLite's variable limit.
const LOOKUP_CHUNK: usize = 500;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        tracing::debug!("Connected to database {}", url);
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn count_posts(&self, platform: &str) -> Result<i64, CoreError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE platform = ?")
            .bind(platform)
            .fetch_one(&self.pool)
            .await
            .map_err(sql_error)
    }

    /// How many times a run event has been recorded, `None` if never.
    pub async fn run_attempts(&self, run_id: &str, event_type: &str) -> Result<Option<i64>, CoreError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT attempt_count FROM logs WHERE uuid = ? AND event_type = ?",
        )
        .bind(run_id)
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_error)
    }
}

impl PostRepository for Database {
    async fn existing_external_ids(
        &self,
        platform: &str,
        external_ids: &[String],
    ) -> Result<HashSet<String>, CoreError> {
        let mut existing = HashSet::new();
        if external_ids.is_empty() {
            return Ok(existing);
        }

        for chunk in external_ids.chunks(LOOKUP_CHUNK) {
            let mut query: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("SELECT external_id FROM posts WHERE platform = ");
            query.push_bind(platform);
            query.push(" AND external_id IN (");
            let mut ids = query.separated(", ");
            for id in chunk {
                ids.push_bind(id);
            }
            ids.push_unseparated(")");

            let found: Vec<String> = query
                .build_query_scalar::<String>()
                .fetch_all(&self.pool)
                .await
                .map_err(sql_error)?;
            existing.extend(found);
        }

        Ok(existing)
    }

    async fn insert_posts(&self, posts: &[ScoredPost]) -> Result<u64, CoreError> {
        if posts.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(|e| DatabaseError::TransactionFailed {
            reason: e.to_string(),
        })?;

        let mut inserted = 0;
        for scored in posts {
            let post = &scored.post;
            let engagement = serde_json::to_string(&post.engagement())?;

            let result = sqlx::query(
                r#"
                INSERT INTO posts (
                    platform, external_id, url, title, content, author,
                    published_at, score, summary, engagement
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (platform, external_id) DO NOTHING
                "#,
            )
            .bind(&post.platform)
            .bind(&post.external_id)
            .bind(&post.url)
            .bind(&post.title)
            .bind(&post.content_text)
            .bind(&post.author)
            .bind(post.published_at_naive())
            .bind(scored.intent_score)
            .bind(&scored.summary)
            .bind(engagement)
            .execute(&mut *tx)
            .await
            .map_err(sql_error)?;

            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(|e| DatabaseError::TransactionFailed {
            reason: e.to_string(),
        })?;

        tracing::debug!("Inserted {} of {} posts", inserted, posts.len());
        Ok(inserted)
    }

    async fn record_run(&self, entry: &RunLogEntry) -> Result<(), CoreError> {
        let metadata = serde_json::to_string(&entry.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO logs (
                uuid, event_type, event_status, attempt_count,
                reason, metadata, created_by, created_at
            )
            VALUES (?, ?, ?, 1, ?, ?, ?, ?)
            ON CONFLICT (uuid, event_type) DO UPDATE SET
                attempt_count = logs.attempt_count + 1,
                event_status = excluded.event_status,
                reason = excluded.reason,
                metadata = excluded.metadata,
                created_by = excluded.created_by,
                created_at = excluded.created_at
            "#,
        )
        .bind(&entry.run_id)
        .bind(&entry.event_type)
        .bind(entry.status.as_str())
        .bind(&entry.reason)
        .bind(metadata)
        .bind(&entry.created_by)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await
        .map_err(sql_error)?;

        Ok(())
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6) surface as `DatabaseLocked`.
fn sql_error(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if matches!(db_err.code().as_deref(), Some("5") | Some("6")) {
            return DatabaseError::DatabaseLocked.into();
        }
    }
    DatabaseError::Sql(err).into()
}
