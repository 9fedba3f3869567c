use crate::db::DbHandle;
use crate::uploader::{UploadError, Uploader};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::Executor;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const SCHEMA: &str = include_str!("testdata/videos.sql");

/// A fresh `videos` database plus a directory for fake video files.
pub(crate) struct TestStore {
    pub db: DbHandle,
    dir: TempDir,
}

impl TestStore {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("videos.db"))
            .create_if_missing(true);
        let db = DbHandle::connect_with(options).await.unwrap();
        db.pool().execute(SCHEMA).await.unwrap();

        Self { db, dir }
    }

    pub fn video_file(&self, name: &str, len: usize) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, vec![0u8; len]).unwrap();
        path.to_string_lossy().into_owned()
    }

    pub fn missing_file(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    pub async fn insert(
        &self,
        id: i64,
        file_path: &str,
        upload_url: Option<&str>,
        vimeo_link: Option<&str>,
    ) {
        sqlx::query(
            "INSERT INTO videos (id, upload_url, file_path, title, description, vimeo_link) \
            VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(upload_url)
        .bind(file_path)
        .bind(format!("Video {id}"))
        .bind(format!("Description of video {id}"))
        .bind(vimeo_link)
        .execute(self.db.pool())
        .await
        .unwrap();
    }

    pub async fn seed_pending(&self, ids: impl IntoIterator<Item = i64>) {
        for id in ids {
            let path = self.video_file(&format!("{id}.mp4"), 1024);
            self.insert(id, &path, Some("https://example.com/upload"), None)
                .await;
        }
    }

    pub async fn seed_done(&self, ids: impl IntoIterator<Item = i64>) {
        for id in ids {
            let path = self.video_file(&format!("{id}.mp4"), 1024);
            let link = format!("https://vimeo.com/done/{id}");
            self.insert(id, &path, Some("https://example.com/upload"), Some(&link))
                .await;
        }
    }

    pub fn path_of(&self, id: i64) -> PathBuf {
        self.dir.path().join(format!("{id}.mp4"))
    }

    pub async fn link(&self, id: i64) -> Option<String> {
        sqlx::query_scalar::<_, Option<String>>("SELECT vimeo_link FROM videos WHERE id = ?")
            .bind(id)
            .fetch_one(self.db.pool())
            .await
            .unwrap()
    }
}

/// Uploader that succeeds unless told otherwise, recording every call.
#[derive(Default)]
pub(crate) struct ScriptedUploader {
    failing: HashSet<PathBuf>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedUploader {
    pub fn failing_for(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing.insert(path.into());
        self
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for ScriptedUploader {
    async fn upload(
        &self,
        file_path: &Path,
        _title: &str,
        _description: &str,
    ) -> Result<String, UploadError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(file_path.to_path_buf());
            calls.len()
        };

        if self.failing.contains(file_path) {
            return Err(UploadError::Rejected("scripted failure".into()));
        }

        Ok(format!("https://vimeo.com/{call}"))
    }
}
