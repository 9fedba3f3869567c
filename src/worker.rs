use crate::db::DbHandle;
use crate::uploader::{UploadError, Uploader};
use crate::VideoRecord;
use anyhow::Error;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::*;

/// What happened to a single pending record.
#[derive(Debug)]
pub enum RecordOutcome {
    Uploaded {
        link: String,
        bytes: u64,
        elapsed: Duration,
    },
    /// The local file was not there; nothing was uploaded or written.
    MissingFile,
    Failed(UploadError),
    /// The upload went through but the row had gained a link in the
    /// meantime; `link` points at a video nothing references.
    AlreadyLinked { link: String },
}

/// Uploads one pending record and writes its link back.
///
/// Missing files and upload failures are logged and reported as outcomes;
/// only store errors are returned as `Err`, and those end the run.
#[instrument(skip_all, fields(video_id = record.id))]
pub async fn process_record(
    uploader: &dyn Uploader,
    db: &DbHandle,
    record: &VideoRecord,
) -> Result<RecordOutcome, Error> {
    let file_path = Path::new(&record.file_path);

    let bytes = match tokio::fs::metadata(file_path).await {
        Ok(metadata) => metadata.len(),
        Err(err) => {
            error!(
                file_path = %record.file_path,
                error = %err,
                "File missing, skipping video"
            );
            return Ok(RecordOutcome::MissingFile);
        }
    };

    let started = Instant::now();
    let result = uploader
        .upload(file_path, &record.title, &record.description)
        .await;

    let outcome = match result {
        Ok(link) => {
            if db.mark_uploaded(record.id, &link).await? {
                RecordOutcome::Uploaded {
                    link,
                    bytes,
                    elapsed: started.elapsed(),
                }
            } else {
                error!(
                    file_path = %record.file_path,
                    link = %link,
                    "Video already had a link, uploaded copy is orphaned"
                );
                RecordOutcome::AlreadyLinked { link }
            }
        }
        Err(err) => {
            error!(
                file_path = %record.file_path,
                error = %err,
                "Failed to upload video"
            );
            RecordOutcome::Failed(err)
        }
    };

    let elapsed = started.elapsed();
    if let Some(mb_per_sec) = throughput_mb_per_sec(bytes, elapsed) {
        info!(
            file_path = %record.file_path,
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            mb_per_sec,
            "Processed video"
        );
    }

    Ok(outcome)
}

/// Megabytes (MiB) per second, or `None` when no time has elapsed.
pub fn throughput_mb_per_sec(bytes: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    Some(bytes as f64 / (1024.0 * 1024.0) / secs)
}
