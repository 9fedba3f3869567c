use std::fmt;

pub mod db;
pub mod server;
pub mod telemetry;
pub mod uploader;
pub mod vimeo;
pub mod worker;

#[cfg(test)]
mod testing;

/// One row of the `videos` table.
///
/// A record is pending while it has an `upload_url` and no `vimeo_link`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VideoRecord {
    pub id: i64,
    pub upload_url: Option<String>,
    pub file_path: String,
    pub title: String,
    pub description: String,
    pub vimeo_link: Option<String>,
}

impl VideoRecord {
    pub fn is_pending(&self) -> bool {
        self.upload_url.is_some() && self.vimeo_link.is_none()
    }
}

/// Counters for a single run, returned by [`server::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: u64,
    pub uploaded: u64,
    pub failed: u64,
    pub missing: u64,
    /// Uploads whose link could not be stored because the row already had one.
    pub already_linked: u64,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn processed(&self) -> u64 {
        self.uploaded + self.failed + self.missing + self.already_linked
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} batches, {} uploaded, {} failed, {} missing",
            self.batches, self.uploaded, self.failed, self.missing
        )?;
        if self.already_linked > 0 {
            write!(f, ", {} already linked", self.already_linked)?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_every_processed_video() {
        let summary = RunSummary {
            batches: 2,
            uploaded: 3,
            failed: 1,
            missing: 1,
            already_linked: 1,
            cancelled: true,
        };

        assert_eq!(summary.processed(), 6);
        assert_eq!(
            summary.to_string(),
            "2 batches, 3 uploaded, 1 failed, 1 missing, 1 already linked (cancelled)"
        );
    }

    #[test]
    fn pending_needs_upload_url_and_no_link() {
        let mut record = VideoRecord {
            id: 1,
            upload_url: Some("https://example.com/upload".into()),
            file_path: "/videos/1.mp4".into(),
            title: String::new(),
            description: String::new(),
            vimeo_link: None,
        };
        assert!(record.is_pending());

        record.vimeo_link = Some("https://vimeo.com/1".into());
        assert!(!record.is_pending());

        record.vimeo_link = None;
        record.upload_url = None;
        assert!(!record.is_pending());
    }
}
