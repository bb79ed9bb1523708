//! S3-compatible storage backend.
//!
//! This module provides a storage backend implementation for S3-compatible
//! services including AWS S3, MinIO, Backblaze B2, DigitalOcean Spaces and
//! others.
//!
//! # Credentials
//!
//! Credentials given in the configuration are used as static credentials.
//! Without them the default AWS credential chain applies (environment,
//! profile, instance metadata), which only makes sense against AWS itself;
//! custom endpoints therefore require explicit keys.
//!
//! # Directories
//!
//! Object stores have no directories. A "directory" is any key prefix ending
//! in `/` that has objects below it, or an explicit zero-byte marker object
//! whose key ends in `/`.

use crate::backend::{ContentReader, FileInfoStream, join_url};
use crate::config::{S3Config, StorageConfig};
use crate::path::{to_key, validate_dir};
use crate::{
    FileInfo, StorageBackend, Upload,
    error::{ErrorKind, Result},
    mime, validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, http::HttpResponse, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    operation::{get_object::GetObjectError, head_object::HeadObjectError, head_object::HeadObjectOutput},
    operation::list_objects_v2::ListObjectsV2Output,
    primitives::{ByteStream, DateTime},
};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// Signing region when neither the configuration nor the environment names one.
const FALLBACK_REGION: &str = "us-east-1";
const META_ORIGINAL_FILENAME: &str = "original-filename";
const META_UPLOADED_AT: &str = "uploaded-at";

/// S3-compatible storage backend.
///
/// Stores files in an S3 bucket, optionally under a key prefix. All paths are
/// relative to the configured prefix (if any).
///
/// # Examples
///
/// ```no_run
/// use filekit_storage::backend::S3Backend;
/// use filekit_storage::config::S3Config;
///
/// # async fn example() -> filekit_storage::error::Result<()> {
/// let config = S3Config {
///     endpoint: Some("http://localhost:9000".to_string()),
///     access_key: Some("minioadmin".to_string()),
///     secret_key: Some("minioadmin".to_string()),
///     bucket: "uploads".to_string(),
///     path_style: true,
///     ..Default::default()
/// };
/// let backend = S3Backend::connect("minio", &config).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    /// Normalized key prefix, without leading or trailing slashes
    prefix: Option<String>,
    base_url: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend from configuration.
    ///
    /// Builds an SDK client (static credentials when configured, otherwise
    /// the default AWS chain) and probes the bucket with `HeadBucket` so that
    /// misconfiguration fails here rather than on the first request.
    ///
    /// # Errors
    ///
    /// Returns [`Configuration`](ErrorKind::Configuration) if the
    /// configuration is invalid or the bucket cannot be reached.
    pub async fn connect(name: impl Into<String>, config: &S3Config) -> Result<Self> {
        let problems = StorageConfig::S3(config.clone()).validate();
        if !problems.is_empty() {
            exn::bail!(ErrorKind::Configuration(problems.join("; ")));
        }

        let region = config.region.as_deref().map(str::trim).filter(|r| !r.is_empty()).map(|r| Region::new(r.to_string()));
        let region_provider =
            RegionProviderChain::first_try(region).or_default_provider().or_else(Region::from_static(FALLBACK_REGION));
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4));
        if let Some((key_id, key_secret)) = config.static_credentials() {
            loader = loader.credentials_provider(Credentials::new(key_id, key_secret, None, None, "filekit-config"));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.path_style);
        // Set custom endpoint for non-AWS services
        if let Some(endpoint_url) = config.endpoint_url() {
            builder = builder.endpoint_url(endpoint_url);
        }
        let backend = Self::from_client(name, Client::from_conf(builder.build()), config)?;
        backend.probe().await?;
        tracing::info!(
            backend = %backend.name,
            bucket = %backend.bucket,
            prefix = backend.prefix.as_deref().unwrap_or_default(),
            "connected to S3 bucket"
        );
        Ok(backend)
    }

    /// Build a backend around an existing SDK client, without probing the
    /// bucket. Credentials, endpoint and retries are whatever the client was
    /// built with; the configuration only supplies bucket, prefix and URL
    /// settings.
    pub fn from_client(name: impl Into<String>, client: Client, config: &S3Config) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            exn::bail!(ErrorKind::Configuration("S3 bucket name is required when using S3 storage".to_string()));
        }
        let prefix = match config.prefix.as_deref() {
            Some(prefix) => Some(validate_dir(prefix).or_raise(|| {
                ErrorKind::Configuration(format!("invalid S3 key prefix `{prefix}`"))
            })?),
            None => None,
        }
        .map(to_key)
        .filter(|p| !p.is_empty());
        Ok(Self {
            name: name.into(),
            client,
            bucket: config.bucket.trim().to_string(),
            prefix,
            base_url: config.base_url.clone().filter(|u| !u.trim().is_empty()),
            region: config.region.clone().filter(|r| !r.trim().is_empty()),
            endpoint: config.endpoint_url(),
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Check that the bucket exists and the credentials can reach it.
    pub async fn probe(&self) -> Result<()> {
        let _permit = self.acquire_permit().await?;
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => exn::bail!(ErrorKind::Configuration(format!(
                "cannot access bucket `{}`: {}",
                self.bucket,
                DisplayErrorContext(&e)
            ))),
        }
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<(PathBuf, String)> {
        let validated = validate_path(path)?;
        let key = self.prefixed(&to_key(&validated));
        Ok((validated, key))
    }

    fn prefixed(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Key prefix (with trailing slash) under which the children of a
    /// directory live. The root of an unprefixed bucket is the empty string.
    fn directory_prefix(&self, dir: &Path) -> String {
        let key = to_key(dir);
        match (&self.prefix, key.is_empty()) {
            (None, true) => String::new(),
            (Some(prefix), true) => format!("{prefix}/"),
            (_, false) => format!("{}/", self.prefixed(&key)),
        }
    }

    /// Strip the configured prefix from an S3 key to get relative path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        let relative = match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix.as_str()).and_then(|s| s.strip_prefix('/')).unwrap_or(key),
            None => key,
        };
        validate_path(relative)
    }

    fn url(&self, key: &str) -> String {
        if let Some(base) = &self.base_url {
            return join_url(base, key);
        }
        if let Some(endpoint) = &self.endpoint {
            return format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key);
        }
        match &self.region {
            Some(region) => format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, region, key),
            None => format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
        }
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn is_http_404<E>(err: &SdkError<E, HttpResponse>) -> bool {
        err.raw_response().is_some_and(|response| response.status().as_u16() == 404)
    }

    fn map_sdk_error<E>(err: &SdkError<E, HttpResponse>, path: &Path) -> ErrorKind
    where
        E: std::error::Error + 'static,
    {
        match err {
            SdkError::TimeoutError(_) => ErrorKind::Timeout,
            SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                ErrorKind::Network(DisplayErrorContext(err).to_string())
            },
            _ => match err.raw_response().map(|response| response.status().as_u16()) {
                Some(401 | 403) => ErrorKind::PermissionDenied(path.to_path_buf()),
                Some(404) => ErrorKind::NotFound(path.to_path_buf()),
                _ => ErrorKind::BackendError(DisplayErrorContext(err).to_string()),
            },
        }
    }

    /// Build a record for an object key from whatever metadata the API
    /// returned. Missing timestamps fall back to now.
    fn object_info(
        &self,
        key: &str,
        size: Option<i64>,
        last_modified: Option<&DateTime>,
        content_type: Option<&str>,
    ) -> Result<FileInfo> {
        let logical = self.relative_path(key)?;
        let modified = match last_modified {
            Some(dt) => Self::parse_datetime(dt)?,
            None => OffsetDateTime::now_utc(),
        };
        let size = size.and_then(|s| u64::try_from(s).ok()).unwrap_or_default();
        let content_type = content_type.filter(|ct| !ct.is_empty()).unwrap_or_else(|| mime::from_path(&logical));
        Ok(FileInfo::new(&logical, size, modified).with_url(self.url(key)).with_content_type(content_type))
    }

    fn directory_info(&self, common_prefix: &str) -> Result<FileInfo> {
        let logical = self.relative_path(common_prefix)?;
        Ok(FileInfo::directory(logical, OffsetDateTime::now_utc())
            .with_url(self.url(common_prefix))
            .with_content_type(mime::DIRECTORY))
    }

    /// `HeadObject`, with "not found" turned into `None`.
    async fn head(&self, key: &str, logical: &Path) -> Result<Option<HeadObjectOutput>> {
        let _permit = self.acquire_permit().await?;
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => Ok(Some(output)),
            Err(e) if e.as_service_error().is_some_and(HeadObjectError::is_not_found) || Self::is_http_404(&e) => {
                Ok(None)
            },
            Err(e) => Err(Self::map_sdk_error(&e, logical).into()),
        }
    }

    /// Whether any object lives below `{key}/`.
    async fn has_children(&self, key: &str, logical: &Path) -> Result<bool> {
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(format!("{key}/"))
            .max_keys(1)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(&e, logical))?;
        Ok(!output.contents().is_empty() || !output.common_prefixes().is_empty())
    }

    /// Failure for a key that holds no object: a prefix with children is a
    /// directory, anything else is missing.
    async fn missing_object(&self, key: &str, logical: PathBuf) -> Result<ErrorKind> {
        Ok(match self.has_children(key, &logical).await? {
            true => ErrorKind::InvalidPath(logical),
            false => ErrorKind::NotFound(logical),
        })
    }

    async fn list_page(&self, prefix: &str, token: Option<String>, logical: &Path) -> Result<ListObjectsV2Output> {
        let _permit = self.acquire_permit().await?;
        let mut request = self.client.list_objects_v2().bucket(&self.bucket).delimiter("/");
        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }
        Ok(request.set_continuation_token(token).send().await.map_err(|e| Self::map_sdk_error(&e, logical))?)
    }
}

/// Metadata values travel as HTTP headers, which must be visible ASCII.
fn header_safe(value: &str) -> String {
    value.chars().map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' }).collect()
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, upload: Upload, path: &Path) -> Result<FileInfo> {
        let (logical, key) = self.full_key(path)?;
        let filename = upload.filename().to_string();
        // Buffered in full: the content type is sniffed from the bytes and
        // PutObject needs the length up front. Callers cap the size.
        let data = upload.into_bytes().await?;
        let content_type = mime::detect(&data, &filename);

        // TODO: Use a conditional PutObject (`If-None-Match: *`) once every
        //       targeted S3-compatible service supports it; this check races.
        if self.head(&key, &logical).await?.is_some() || self.has_children(&key, &logical).await? {
            exn::bail!(ErrorKind::AlreadyExists(logical));
        }

        let now = OffsetDateTime::now_utc();
        let uploaded_at = now.format(&Rfc3339).or_raise(|| ErrorKind::BackendError("cannot format timestamp".to_string()))?;
        let size = data.len() as u64;
        {
            let _permit = self.acquire_permit().await?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_type(content_type)
                .content_length(data.len() as i64)
                .metadata(META_ORIGINAL_FILENAME, header_safe(&filename))
                .metadata(META_UPLOADED_AT, uploaded_at)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error(&e, &logical))?;
        }
        tracing::debug!(
            backend = %self.name,
            bucket = %self.bucket,
            key = %key,
            content_type,
            bytes = size,
            "stored upload"
        );
        Ok(FileInfo::new(&logical, size, now).with_url(self.url(&key)).with_content_type(content_type))
    }

    async fn get(&self, path: &Path) -> Result<(ContentReader, FileInfo)> {
        let (logical, key) = self.full_key(path)?;
        let response = {
            let _permit = self.acquire_permit().await?;
            self.client.get_object().bucket(&self.bucket).key(&key).send().await
        };
        let output = match response {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(GetObjectError::is_no_such_key) || Self::is_http_404(&e) => {
                exn::bail!(self.missing_object(&key, logical).await?);
            },
            Err(e) => exn::bail!(Self::map_sdk_error(&e, &logical)),
        };
        let info = self.object_info(&key, output.content_length(), output.last_modified(), output.content_type())?;
        Ok((Box::pin(output.body.into_async_read()), info))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let (logical, key) = self.full_key(path)?;
        if self.head(&key, &logical).await?.is_none() {
            exn::bail!(self.missing_object(&key, logical).await?);
        }
        {
            let _permit = self.acquire_permit().await?;
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error(&e, &logical))?;
        }
        tracing::debug!(backend = %self.name, bucket = %self.bucket, key = %key, "deleted object");
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let (logical, key) = self.full_key(path)?;
        // A prefix with objects below it counts, as a directory would locally.
        Ok(self.head(&key, &logical).await?.is_some() || self.has_children(&key, &logical).await?)
    }

    fn list_stream<'a>(&'a self, dir: &'a Path) -> FileInfoStream<'a> {
        let logical = match validate_dir(dir) {
            Ok(dir) => dir,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        let search = self.directory_prefix(&logical);

        Box::pin(stream! {
            let mut token: Option<String> = None;
            // Anything at all under the prefix, including a directory marker.
            let mut found = false;
            loop {
                let page = match self.list_page(&search, token.take(), &logical).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for common in page.common_prefixes() {
                    let Some(prefix) = common.prefix() else { continue };
                    found = true;
                    yield self.directory_info(prefix);
                }
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    found = true;
                    // Directory marker for the listed directory itself (or a
                    // nested one, which the delimiter already reported).
                    if key.ends_with('/') {
                        continue;
                    }
                    yield self.object_info(key, object.size(), object.last_modified(), None);
                }
                match page.next_continuation_token() {
                    Some(next) if page.is_truncated().unwrap_or_default() => token = Some(next.to_string()),
                    _ => break,
                }
            }
            if found || logical.as_os_str().is_empty() {
                return;
            }

            // Nothing below the prefix: the path may name a single object.
            let key = self.prefixed(&to_key(&logical));
            match self.head(&key, &logical).await {
                Ok(Some(head)) => {
                    yield self.object_info(&key, head.content_length(), head.last_modified(), head.content_type());
                },
                Ok(None) => {
                    yield Err(exn::Exn::from(ErrorKind::NotFound(logical.clone())));
                },
                Err(e) => {
                    yield Err(e);
                },
            }
        })
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let (logical, key) = self.full_key(path)?;
        match self.head(&key, &logical).await? {
            Some(head) => self.object_info(&key, head.content_length(), head.last_modified(), head.content_type()),
            None => exn::bail!(self.missing_object(&key, logical).await?),
        }
    }
}
