use crate::config::StorageConfig;
use crate::error::{FrameError, FrameResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// Upload and public-URL resolution against a single bucket
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `path`. Fails if `path` already exists.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> FrameResult<()>;

    /// Public locator for `path`. Not checked against the bucket.
    fn public_url(&self, path: &str) -> String;
}

/// Which of the two frame assets a path belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    fn prefix(self) -> &'static str {
        match self {
            MediaKind::Photo => "photos",
            MediaKind::Video => "videos",
        }
    }
}

/// Build the object path for one asset of a frame
///
/// Format: {photos|videos}/{user_id}_{timestamp_ms}_{sanitized_filename}
///
/// Both assets of one submission share `timestamp_ms`, so their paths differ
/// only in prefix and filename.
pub fn media_path(kind: MediaKind, user_id: Uuid, timestamp_ms: i64, file_name: &str) -> String {
    format!(
        "{prefix}/{user_id}_{timestamp}_{name}",
        prefix = kind.prefix(),
        user_id = user_id,
        timestamp = timestamp_ms,
        name = sanitize_filename(file_name)
    )
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.' | '-' => c,
            _ => '_',
        })
        .collect()
}

/// Content type for an uploaded asset, from its file extension
pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

/// S3-compatible storage gateway
pub struct S3StorageGateway {
    client: S3Client,
    bucket: String,
    public_url_base: String,
    cache_control: String,
}

impl S3StorageGateway {
    /// Create a new gateway for the configured bucket
    pub async fn new(config: &StorageConfig) -> FrameResult<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Storage gateway initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            public_url_base: config.resolved_public_url_base(),
            cache_control: format!("max-age={}", config.cache_control_secs),
        })
    }
}

/// HTTP status S3 returns when a conditional write finds an existing object
const PRECONDITION_FAILED: u16 = 412;
/// HTTP status for a conditional write racing another write to the same key
const CONDITIONAL_CONFLICT: u16 = 409;

/// Map a failed conditional put to a storage error
///
/// `status` is the HTTP status of the raw response, when one was received.
fn put_error(path: &str, status: Option<u16>, detail: String) -> FrameError {
    match status {
        Some(PRECONDITION_FAILED) | Some(CONDITIONAL_CONFLICT) => {
            FrameError::storage(path, "an object already exists at this path")
        }
        _ => FrameError::storage(path, detail),
    }
}

#[async_trait]
impl ObjectStore for S3StorageGateway {
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size_bytes = bytes.len()))]
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> FrameResult<()> {
        let size_bytes = bytes.len();
        debug!(path = %path, content_type = %content_type, "Uploading object");

        // If-None-Match: * makes the write fail rather than replace an object.
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .if_none_match("*")
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .cache_control(&self.cache_control)
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                put_error(path, status, DisplayErrorContext(&e).to_string())
            })?;

        metrics::counter!("memoryframe.uploads.bytes").increment(size_bytes as u64);
        info!(path = %path, size_bytes, "Object uploaded");

        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_url_base, path)
    }
}
