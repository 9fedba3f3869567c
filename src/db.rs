use crate::VideoRecord;
use anyhow::Error;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Handle onto the `videos` table.
///
/// Every call checks a connection out of the pool for the duration of a
/// single statement (or a single transaction for the write-back), so no
/// transaction spans a whole run.
#[derive(Clone)]
pub struct DbHandle {
    pool: Arc<SqlitePool>,
}

impl DbHandle {
    /// Opens an existing database file. The schema is expected to be in place.
    pub async fn new(path: &Path) -> Result<Self, Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false);

        Self::connect_with(options).await
    }

    pub async fn connect_with(options: SqliteConnectOptions) -> Result<Self, Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(DbHandle {
            pool: Arc::new(pool),
        })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Highest id that already carries a Vimeo link, if any.
    #[instrument(name = "db.find_resume_point", skip_all)]
    pub async fn find_resume_point(&self) -> Result<Option<i64>, Error> {
        let id = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(id) FROM videos WHERE vimeo_link IS NOT NULL",
        )
        .fetch_one(&*self.pool)
        .await?;

        debug!(resume_point = ?id, "Found resume point");
        Ok(id)
    }

    pub async fn count_pending(&self) -> Result<i64, Error> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM videos \
            WHERE upload_url IS NOT NULL AND vimeo_link IS NULL",
        )
        .fetch_one(&*self.pool)
        .await?)
    }

    /// Up to `limit` pending records with `id > after`, ascending by id.
    pub async fn fetch_next_batch(
        &self,
        after: Option<i64>,
        limit: i64,
    ) -> Result<Vec<VideoRecord>, Error> {
        self.fetch_batch_between(after, None, limit).await
    }

    /// Like [`fetch_next_batch`](Self::fetch_next_batch), additionally
    /// bounded by `id <= up_to`.
    #[instrument(name = "db.fetch_batch", skip(self))]
    pub async fn fetch_batch_between(
        &self,
        after: Option<i64>,
        up_to: Option<i64>,
        limit: i64,
    ) -> Result<Vec<VideoRecord>, Error> {
        let batch = sqlx::query_as::<_, VideoRecord>(
            "SELECT id, upload_url, file_path, \
                COALESCE(title, '') AS title, \
                COALESCE(description, '') AS description, \
                vimeo_link \
            FROM videos \
            WHERE (? IS NULL OR id > ?) \
                AND (? IS NULL OR id <= ?) \
                AND upload_url IS NOT NULL \
                AND vimeo_link IS NULL \
            ORDER BY id ASC \
            LIMIT ?",
        )
        .bind(after)
        .bind(after)
        .bind(up_to)
        .bind(up_to)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        debug_assert!(batch.iter().all(VideoRecord::is_pending));
        debug!("Fetched {} pending videos", batch.len());
        Ok(batch)
    }

    /// Records the link for a finished upload.
    ///
    /// The link is write-once: a row that already has one is left untouched
    /// and `false` is returned.
    #[instrument(name = "db.mark_uploaded", skip(self, link), fields(video_id = %id))]
    pub async fn mark_uploaded(&self, id: i64, link: &str) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE videos \
                SET vimeo_link = ? \
            WHERE id = ? AND vimeo_link IS NULL",
        )
        .bind(link)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() == 1)
    }
}
