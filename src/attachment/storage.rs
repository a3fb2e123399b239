//! Attachment upload to blob storage.

use std::time::Duration;

use chrono::NaiveDate;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;
use ureq::Agent;

use crate::config::StorageConfig;
use crate::error::{HarvestError, Result};

/// Object storage that hosts attachment bytes.
pub trait BlobStore {
    /// Store `bytes` under `key` as a permanent object.
    fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Public URL of the object at `key`. Derived, never fetched.
    fn public_url(&self, key: &str) -> String;
}

/// Storage key for an attachment: `<prefix>/<YYYYMMDD>/<NFC filename>`.
pub fn storage_key(prefix: &str, date: NaiveDate, filename: &str) -> String {
    let name: String = filename.nfc().collect();
    format!(
        "{}/{}/{}",
        prefix.trim_end_matches('/'),
        date.format("%Y%m%d"),
        name
    )
}

/// Upload one attachment and return its public URL.
///
/// Failures are logged and yield `None`; they never abort the parent message.
pub fn upload_attachment(
    store: &dyn BlobStore,
    prefix: &str,
    date: NaiveDate,
    filename: &str,
    bytes: &[u8],
    content_type: &str,
) -> Option<String> {
    let key = storage_key(prefix, date, filename);
    match store.upload(&key, bytes, content_type) {
        Ok(()) => {
            let url = store.public_url(&key);
            info!(key = %key, size = bytes.len(), "Uploaded attachment");
            Some(url)
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Attachment upload failed");
            None
        }
    }
}

// ── Google Cloud Storage ────────────────────────────────────────

/// Google Cloud Storage through the JSON media upload API.
pub struct GcsStore {
    agent: Agent,
    host: String,
    upload_endpoint: String,
    bucket: String,
    access_token: String,
}

impl GcsStore {
    pub fn new(config: &StorageConfig) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(120)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            host: config.host.clone(),
            upload_endpoint: config.upload_endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            access_token: config.access_token.clone(),
        }
    }
}

impl BlobStore for GcsStore {
    fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let url = format!(
            "{}/b/{}/o?uploadType=media&name={}",
            self.upload_endpoint,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(key)
        );
        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", self.access_token))
            .header("Content-Type", content_type)
            .send(bytes)
            .map_err(|e| HarvestError::Storage(format!("upload of {key} failed: {e}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(HarvestError::Storage(format!(
                "upload of {key} rejected: HTTP {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://{}/{}/{}", self.host, self.bucket, key)
    }
}
