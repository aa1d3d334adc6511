//! Object storage
//!
//! `ObjectStore` is the seam the stage pipeline uses to fetch upstream stage
//! outputs and publish the shared var file. `GcsObjectStore` speaks the
//! Cloud Storage JSON API; `fakes::MemoryObjectStore` backs the tests.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::auth::{http_client, AdcTokenProvider};
use crate::error::CloudError;
use crate::Result;

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1/b";
const UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1/b";

/// A bucket + object reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub object: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}

/// Blob store keyed by bucket and object name.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download an object. Returns `CloudError::NotFound` if absent.
    async fn get(&self, object: &ObjectRef) -> Result<Vec<u8>>;

    /// Upload an object, overwriting unconditionally.
    async fn put(&self, object: &ObjectRef, data: Vec<u8>, content_type: &str) -> Result<()>;
}

/// Cloud Storage JSON API client.
pub struct GcsObjectStore {
    http: reqwest::Client,
    tokens: Arc<AdcTokenProvider>,
}

impl GcsObjectStore {
    pub fn new(tokens: Arc<AdcTokenProvider>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            tokens,
        })
    }
}

/// Media download URL for an object (object names are fully escaped).
pub fn download_url(object: &ObjectRef) -> Result<Url> {
    let mut url = Url::parse(STORAGE_API).map_err(|e| CloudError::Transport(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| CloudError::Transport("storage URL cannot be a base".to_string()))?
        .push(&object.bucket)
        .push("o")
        .push(&object.object);
    url.query_pairs_mut().append_pair("alt", "media");
    Ok(url)
}

/// Simple upload URL for an object.
pub fn upload_url(object: &ObjectRef) -> Result<Url> {
    let mut url = Url::parse(UPLOAD_API).map_err(|e| CloudError::Transport(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| CloudError::Transport("upload URL cannot be a base".to_string()))?
        .push(&object.bucket)
        .push("o");
    url.query_pairs_mut()
        .append_pair("uploadType", "media")
        .append_pair("name", &object.object);
    Ok(url)
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn get(&self, object: &ObjectRef) -> Result<Vec<u8>> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(download_url(object)?)
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let bytes = response.bytes().await?;
                debug!(object = %object, size = bytes.len(), "Downloaded object");
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(CloudError::NotFound {
                bucket: object.bucket.clone(),
                object: object.object.clone(),
            }),
            status => Err(CloudError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn put(&self, object: &ObjectRef, data: Vec<u8>, content_type: &str) -> Result<()> {
        let token = self.tokens.access_token().await?;
        let size = data.len();
        let response = self
            .http
            .post(upload_url(object)?)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(object = %object, size, "Uploaded object");
            Ok(())
        } else {
            Err(CloudError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_display() {
        let obj = ObjectRef::new("demo-prod-iac-core-outputs", "tfvars/pastures.tfvars.json");
        assert_eq!(
            obj.to_string(),
            "gs://demo-prod-iac-core-outputs/tfvars/pastures.tfvars.json"
        );
    }

    #[test]
    fn test_download_url_escapes_object_name() {
        let obj = ObjectRef::new("bucket", "providers/0-bootstrap-providers.tf");
        let url = download_url(&obj).unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/bucket/o/providers%2F0-bootstrap-providers.tf?alt=media"
        );
    }

    #[test]
    fn test_upload_url_names_object() {
        let obj = ObjectRef::new("bucket", "tfvars/pastures.tfvars.json");
        let url = upload_url(&obj).unwrap();
        assert!(url
            .as_str()
            .starts_with("https://storage.googleapis.com/upload/storage/v1/b/bucket/o?"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("uploadType".to_string(), "media".to_string())));
        assert!(pairs.contains(&("name".to_string(), "tfvars/pastures.tfvars.json".to_string())));
    }
}
