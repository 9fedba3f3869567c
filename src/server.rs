use crate::db::DbHandle;
use crate::uploader::Uploader;
use crate::worker::{self, RecordOutcome};
use crate::RunSummary;
use anyhow::{ensure, Error};
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Number of pending records fetched per page.
    pub batch_size: i64,
    /// After the main pass, also process pending records at or below the
    /// resume point (left behind by an earlier interrupted run).
    pub sweep_below_resume: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            sweep_below_resume: false,
        }
    }
}

/// Processes every pending record after the resume point, one at a time,
/// until a fetch comes back empty or the token is cancelled.
pub async fn run(
    cancel_token: CancellationToken,
    db: &DbHandle,
    uploader: &dyn Uploader,
    options: &RunOptions,
) -> Result<RunSummary, Error> {
    ensure!(options.batch_size > 0, "batch size must be positive");

    let resume_point = db.find_resume_point().await?;
    let pending = db.count_pending().await?;
    info!(resume_point = ?resume_point, pending, "Starting upload run");

    let mut summary = RunSummary::default();
    drain(
        &cancel_token,
        db,
        uploader,
        options.batch_size,
        resume_point,
        None,
        &mut summary,
    )
    .await?;

    if options.sweep_below_resume && !summary.cancelled {
        if let Some(up_to) = resume_point {
            info!(up_to, "Sweeping pending videos below the resume point");
            drain(
                &cancel_token,
                db,
                uploader,
                options.batch_size,
                None,
                Some(up_to),
                &mut summary,
            )
            .await?;
        }
    }

    info!(
        batches = summary.batches,
        processed = summary.processed(),
        uploaded = summary.uploaded,
        failed = summary.failed,
        missing = summary.missing,
        already_linked = summary.already_linked,
        cancelled = summary.cancelled,
        "Upload run finished"
    );

    Ok(summary)
}

async fn drain(
    cancel_token: &CancellationToken,
    db: &DbHandle,
    uploader: &dyn Uploader,
    batch_size: i64,
    mut after: Option<i64>,
    up_to: Option<i64>,
    summary: &mut RunSummary,
) -> Result<(), Error> {
    loop {
        if cancel_token.is_cancelled() {
            debug!("Run cancelled before next batch");
            summary.cancelled = true;
            return Ok(());
        }

        let batch = db.fetch_batch_between(after, up_to, batch_size).await?;
        let Some(last_id) = batch.last().map(|record| record.id) else {
            return Ok(());
        };
        summary.batches += 1;
        debug!(
            first_id = batch[0].id,
            last_id,
            size = batch.len(),
            "Processing batch"
        );

        for record in &batch {
            if cancel_token.is_cancelled() {
                debug!(video_id = record.id, "Run cancelled between videos");
                summary.cancelled = true;
                return Ok(());
            }

            match worker::process_record(uploader, db, record).await? {
                RecordOutcome::Uploaded { .. } => summary.uploaded += 1,
                RecordOutcome::MissingFile => summary.missing += 1,
                RecordOutcome::Failed(_) => summary.failed += 1,
                RecordOutcome::AlreadyLinked { .. } => summary.already_linked += 1,
            }
        }

        after = Some(last_id);
    }
}
