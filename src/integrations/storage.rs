//! Object upload client for a QingStor-compatible store.
//!
//! Downloads stream into a spool file so large objects never sit in memory,
//! then the spool file is streamed to the store with a signed `PUT`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, DATE};
use reqwest::{Client, Method, StatusCode};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::{ObjectUploader, UploadReceipt, build_http_client, summarize_body};
use crate::config::{Config, StorageConfig};
use crate::error::UploadError;
use crate::sync::clock::{SharedClock, SystemClock};

const DOWNLOAD_TIMEOUT_SECS: u64 = 600;
const STORE_TIMEOUT_SECS: u64 = 600;
const SNIFF_BYTES: usize = 8192;
const FALLBACK_FILENAME: &str = "download";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

type HmacSha256 = Hmac<Sha256>;

/// `base64(HMAC-SHA256(secret, "<verb>\n\n<content-type>\n<date>\n<resource>"))`
pub fn request_signature(
    secret: &str,
    verb: &str,
    content_type: &str,
    date: &str,
    resource: &str,
) -> String {
    let string_to_sign = format!("{verb}\n\n{content_type}\n{date}\n{resource}");
    // HMAC accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(string_to_sign.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn percent_decode(raw: &str) -> String {
    let escaped = raw.replace('&', "%26").replace('+', "%2B");
    url::form_urlencoded::parse(format!("v={escaped}").as_bytes())
        .next()
        .map_or_else(|| raw.to_string(), |(_, v)| v.into_owned())
}

/// File name from `Content-Disposition` (`filename*=` preferred), else the
/// last URL path segment when it has an extension.
pub fn filename_for(url: &str, content_disposition: Option<&str>) -> String {
    if let Some(disposition) = content_disposition {
        let params: Vec<(&str, &str)> = disposition
            .split(';')
            .filter_map(|part| part.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim().trim_matches('"').trim_matches('\'')))
            .collect();

        let extended = params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("filename*"))
            .map(|(_, v)| v.rsplit("''").next().unwrap_or(v));
        let plain = params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("filename"))
            .map(|(_, v)| *v);
        if let Some(name) = extended.or(plain).filter(|n| !n.is_empty()) {
            return percent_decode(name);
        }
    }

    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(percent_decode))
        })
        .filter(|name| name.contains('.'))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

/// Strip path separators, reserved and control characters, and leading
/// dots or spaces.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control())
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', ' ']).trim_end();
    if cleaned.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Removes the staged download when dropped.
struct SpoolFile {
    path: PathBuf,
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove spool file");
        }
    }
}

struct Download {
    spool: SpoolFile,
    filename: String,
    size: u64,
    content_type: String,
}

pub struct QingStorUploader {
    access_key_id: String,
    secret_access_key: String,
    bucket: String,
    zone: String,
    endpoint: Url,
    spool_dir: PathBuf,
    download: Client,
    store: Client,
    clock: SharedClock,
    bucket_ready: tokio::sync::OnceCell<()>,
}

impl QingStorUploader {
    pub fn new(
        storage: &StorageConfig,
        spool_dir: PathBuf,
        download: Client,
        store: Client,
        clock: SharedClock,
    ) -> anyhow::Result<Self> {
        let endpoint = Url::parse(&storage.endpoint())
            .map_err(|e| anyhow::anyhow!("invalid storage endpoint {}: {e}", storage.endpoint()))?;
        Ok(Self {
            access_key_id: storage.access_key_id.clone(),
            secret_access_key: storage.secret_access_key.clone(),
            bucket: storage.bucket.clone(),
            zone: storage.zone.clone(),
            endpoint,
            spool_dir,
            download,
            store,
            clock,
            bucket_ready: tokio::sync::OnceCell::new(),
        })
    }

    /// Downloads honour `storage.use_proxy`; the store is always direct.
    pub fn from_config(config: &Config, storage: &StorageConfig) -> anyhow::Result<Self> {
        let download = build_http_client(
            config.proxy_for(storage.use_proxy),
            Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
        )?;
        let store = build_http_client(None, Duration::from_secs(STORE_TIMEOUT_SECS))?;
        let spool_dir = config
            .spool_dir()
            .unwrap_or_else(|| PathBuf::from(&storage.spool_dir));
        Self::new(storage, spool_dir, download, store, Arc::new(SystemClock))
    }

    fn bucket_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.bucket);
        }
        url
    }

    fn object_url(&self, key: &str) -> Url {
        let mut url = self.bucket_url();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(key);
        }
        url
    }

    /// Signed request for `url`; the canonical resource is the URL path.
    fn signed(&self, method: Method, url: Url, content_type: &str) -> reqwest::RequestBuilder {
        let date = http_date(self.clock.now());
        let signature = request_signature(
            &self.secret_access_key,
            method.as_str(),
            content_type,
            &date,
            url.path(),
        );
        let mut request = self
            .store
            .request(method, url)
            .header(DATE, date)
            .header(AUTHORIZATION, format!("QS {}:{signature}", self.access_key_id));
        if !content_type.is_empty() {
            request = request.header(CONTENT_TYPE, content_type);
        }
        request
    }

    async fn download_to_spool(&self, url: &str) -> Result<Download, UploadError> {
        let response = self
            .download
            .get(url)
            .send()
            .await
            .map_err(|e| UploadError::Download(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Download(format!("HTTP {status}")));
        }

        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = sanitize_filename(&filename_for(url, disposition.as_deref()));

        tokio::fs::create_dir_all(&self.spool_dir)
            .await
            .map_err(|e| UploadError::Download(format!("create spool dir: {e}")))?;
        let spool = SpoolFile {
            path: self
                .spool_dir
                .join(format!("{}-{filename}", uuid::Uuid::new_v4())),
        };
        let mut file = tokio::fs::File::create(&spool.path)
            .await
            .map_err(|e| UploadError::Download(format!("create spool file: {e}")))?;

        let mut head = Vec::with_capacity(SNIFF_BYTES);
        let mut size: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UploadError::Download(e.to_string()))?;
            if head.len() < SNIFF_BYTES {
                let take = (SNIFF_BYTES - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| UploadError::Download(format!("write spool file: {e}")))?;
            size += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| UploadError::Download(format!("write spool file: {e}")))?;

        let content_type = infer::get(&head)
            .map_or_else(|| FALLBACK_CONTENT_TYPE.to_string(), |t| t.mime_type().to_string());
        tracing::info!(file = %filename, size, content_type = %content_type, "download staged");
        Ok(Download {
            spool,
            filename,
            size,
            content_type,
        })
    }

    async fn ensure_bucket(&self) -> Result<(), UploadError> {
        self.bucket_ready
            .get_or_try_init(|| async {
                let head = self
                    .signed(Method::HEAD, self.bucket_url(), "")
                    .send()
                    .await
                    .map_err(|e| UploadError::Storage(e.to_string()))?;
                match head.status() {
                    status if status.is_success() => Ok(()),
                    StatusCode::NOT_FOUND => self.create_bucket().await,
                    status => {
                        tracing::warn!(bucket = %self.bucket, %status, "bucket check inconclusive, trying upload anyway");
                        Ok(())
                    }
                }
            })
            .await
            .map(|_| ())
    }

    async fn create_bucket(&self) -> Result<(), UploadError> {
        tracing::info!(bucket = %self.bucket, zone = %self.zone, "creating bucket");
        let response = self
            .signed(Method::PUT, self.bucket_url(), "")
            .send()
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                tracing::debug!(bucket = %self.bucket, "bucket already exists");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(UploadError::Storage(format!(
                    "create bucket {}: HTTP {status}: {}",
                    self.bucket,
                    summarize_body(&body)
                )))
            }
        }
    }

    async fn put_object(&self, key: &str, download: &Download) -> Result<Url, UploadError> {
        let url = self.object_url(key);
        let file = tokio::fs::File::open(&download.spool.path)
            .await
            .map_err(|e| UploadError::Storage(format!("open spool file: {e}")))?;
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));

        let response = self
            .signed(Method::PUT, url.clone(), &download.content_type)
            .header(CONTENT_LENGTH, download.size)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Storage(format!(
                "put {}/{key}: HTTP {status}: {}",
                self.bucket,
                summarize_body(&body)
            )));
        }
        Ok(url)
    }

    fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }
}

#[async_trait]
impl ObjectUploader for QingStorUploader {
    async fn upload_from_url(&self, url: &str) -> Result<UploadReceipt, UploadError> {
        let download = self.download_to_spool(url).await?;
        self.ensure_bucket().await?;

        let object = self.put_object(&download.filename, &download).await?;
        let encoded_key = object.path().rsplit('/').next().unwrap_or_default();
        let receipt = UploadReceipt {
            filename: download.filename.clone(),
            size: download.size,
            bucket: self.bucket.clone(),
            url: format!("https://{}.{}.qingstor.com/{encoded_key}", self.bucket, self.zone),
        };
        tracing::info!(
            bucket = %receipt.bucket,
            file = %receipt.filename,
            size = receipt.size,
            spool = %self.spool_dir().display(),
            "object uploaded"
        );
        Ok(receipt)
    }
}

impl std::fmt::Debug for QingStorUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QingStorUploader")
            .field("bucket", &self.bucket)
            .field("zone", &self.zone)
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}
