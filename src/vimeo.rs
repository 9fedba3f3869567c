//! [`Uploader`] backed by the Vimeo REST API, using tus resumable uploads.

use crate::uploader::{RetryPolicy, UploadError, Uploader};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Body, Client, Response};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub const DEFAULT_API_BASE: &str = "https://api.vimeo.com";

const API_ACCEPT: &str = "application/vnd.vimeo.*+json;version=3.4";
const TUS_VERSION: &str = "1.0.0";

#[derive(Debug, Clone)]
pub struct VimeoConfig {
    pub api_base: String,
    pub access_token: String,
    /// Bound on each API call other than the file transfer.
    pub request_timeout: Duration,
    /// Bound on the file transfer itself.
    pub transfer_timeout: Duration,
    /// Applied to each step of an upload on its own.
    pub retry: RetryPolicy,
}

impl VimeoConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            access_token: access_token.into(),
            request_timeout: Duration::from_secs(5),
            transfer_timeout: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Serialize)]
struct CreateVideo<'a> {
    upload: UploadSpec,
    name: &'a str,
    description: &'a str,
    privacy: Privacy,
}

#[derive(Serialize)]
struct UploadSpec {
    approach: &'static str,
    size: u64,
}

#[derive(Serialize)]
struct UpdatePrivacy {
    privacy: Privacy,
}

#[derive(Serialize)]
struct Privacy {
    view: &'static str,
}

impl Privacy {
    fn public() -> Self {
        Privacy { view: "anybody" }
    }
}

#[derive(Deserialize)]
struct CreatedVideo {
    uri: Option<String>,
    upload: Option<UploadTicket>,
}

#[derive(Deserialize)]
struct UploadTicket {
    upload_link: Option<String>,
}

#[derive(Deserialize)]
struct VideoLink {
    link: Option<String>,
}

/// Uploads through the tus approach: create the video, stream the file,
/// make it public, read back its link.
///
/// Each step is retried on its own, so a failure after the video exists
/// never creates a second one. Creation itself is only repeated when Vimeo
/// cannot have acted on the request.
pub struct VimeoClient {
    client: Client,
    api_base: String,
    transfer_timeout: Duration,
    retry: RetryPolicy,
    cancel_token: CancellationToken,
}

impl VimeoClient {
    pub fn new(config: VimeoConfig) -> Result<Self, UploadError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("bearer {}", config.access_token))
            .map_err(|_| UploadError::Config("access token is not a valid header value".into()))?;
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(header::ACCEPT, HeaderValue::from_static(API_ACCEPT));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            transfer_timeout: config.transfer_timeout,
            retry: config.retry,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Stops retry backoffs once `cancel_token` is cancelled.
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    async fn create_video(
        &self,
        size: u64,
        title: &str,
        description: &str,
    ) -> Result<(String, String), UploadError> {
        let request = CreateVideo {
            upload: UploadSpec {
                approach: "tus",
                size,
            },
            name: title,
            description,
            privacy: Privacy::public(),
        };

        let response = self
            .client
            .post(format!("{}/me/videos", self.api_base))
            .json(&request)
            .send()
            .await?;
        let created: CreatedVideo = check(response).await?.json().await?;

        let uri = created.uri.ok_or(UploadError::MissingField("uri"))?;
        let upload_link = created
            .upload
            .and_then(|upload| upload.upload_link)
            .ok_or(UploadError::MissingField("upload.upload_link"))?;

        Ok((uri, upload_link))
    }

    /// Bytes the server already holds for this upload.
    async fn upload_offset(&self, upload_link: &str) -> Result<u64, UploadError> {
        let response = self
            .client
            .head(upload_link)
            .header("Tus-Resumable", TUS_VERSION)
            .send()
            .await?;
        let response = check(response).await?;

        read_offset(&response).ok_or(UploadError::MissingField("Upload-Offset"))
    }

    /// Sends the file from offset 0 on the first attempt, and from the
    /// server's reported offset on later ones.
    async fn transfer(
        &self,
        upload_link: &str,
        file_path: &Path,
        size: u64,
        attempt: u32,
    ) -> Result<(), UploadError> {
        let offset = if attempt == 1 {
            0
        } else {
            self.upload_offset(upload_link).await?
        };
        if offset >= size {
            return Ok(());
        }

        let mut file = tokio::fs::File::open(file_path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        debug!(offset, size, attempt, "Transferring file");

        let response = self
            .client
            .patch(upload_link)
            .timeout(self.transfer_timeout)
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Offset", offset)
            .header(header::CONTENT_TYPE, "application/offset+octet-stream")
            .header(header::CONTENT_LENGTH, size - offset)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        let response = check(response).await?;

        match read_offset(&response) {
            Some(sent) if sent < size => Err(UploadError::Incomplete {
                sent,
                expected: size,
            }),
            _ => Ok(()),
        }
    }

    async fn make_public(&self, uri: &str) -> Result<(), UploadError> {
        let response = self
            .client
            .patch(format!("{}{}", self.api_base, uri))
            .json(&UpdatePrivacy {
                privacy: Privacy::public(),
            })
            .send()
            .await?;
        check(response).await?;

        Ok(())
    }

    async fn public_link(&self, uri: &str) -> Result<String, UploadError> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, uri))
            .query(&[("fields", "link")])
            .send()
            .await?;
        let video: VideoLink = check(response).await?.json().await?;

        video.link.ok_or(UploadError::MissingField("link"))
    }

    /// Steps that run once the video exists on Vimeo.
    async fn finish(
        &self,
        uri: &str,
        upload_link: &str,
        file_path: &Path,
        size: u64,
    ) -> Result<String, UploadError> {
        let transient = UploadError::is_transient;

        self.retry
            .retry(&self.cancel_token, "transfer", transient, move |attempt| {
                self.transfer(upload_link, file_path, size, attempt)
            })
            .await?;
        self.retry
            .retry(&self.cancel_token, "make_public", transient, move |_| {
                self.make_public(uri)
            })
            .await?;
        self.retry
            .retry(&self.cancel_token, "public_link", transient, move |_| {
                self.public_link(uri)
            })
            .await
    }
}

#[async_trait]
impl Uploader for VimeoClient {
    #[instrument(
        name = "vimeo.upload",
        skip(self, file_path, description),
        fields(file_path = %file_path.display())
    )]
    async fn upload(
        &self,
        file_path: &Path,
        title: &str,
        description: &str,
    ) -> Result<String, UploadError> {
        let size = tokio::fs::metadata(file_path).await?.len();

        let (uri, upload_link) = self
            .retry
            .retry(
                &self.cancel_token,
                "create_video",
                UploadError::is_safe_to_resend,
                move |_| self.create_video(size, title, description),
            )
            .await?;
        debug!(uri = %uri, size, "Created video");

        let result = self.finish(&uri, &upload_link, file_path, size).await;
        if let Err(err) = &result {
            warn!(uri = %uri, error = %err, "Video was created on Vimeo but not finished");
        }
        result
    }
}

fn read_offset(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("Upload-Offset")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

async fn check(response: Response) -> Result<Response, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(UploadError::Status {
        status: status.as_u16(),
        body,
    })
}
