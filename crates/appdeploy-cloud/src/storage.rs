//! Blob store access.

use std::path::{Path, PathBuf};

use appdeploy_core::BlobRef;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::retry::Transient;
use crate::transport::{AuthorizedClient, TransportError, api_url};

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1";

/// A bucket as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Bucket {
    pub name: String,
}

/// Narrow interface over the blob store used by the uploader and the
/// runtime-builder resolver.
#[allow(async_fn_in_trait)]
pub trait BlobStore: Send + Sync {
    /// `None` when the bucket does not exist.
    async fn get_bucket(&self, bucket: &str) -> Result<Option<Bucket>, StorageError>;

    /// Create `bucket` in `project`. An existing bucket is not an error.
    async fn create_bucket(&self, project: &str, bucket: &str) -> Result<(), StorageError>;

    /// Names of `project`'s buckets starting with `prefix`.
    async fn list_buckets(&self, project: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Upload a local file to `dest`, returning the stored object.
    async fn upload_file(&self, path: &Path, dest: &BlobRef) -> Result<BlobRef, StorageError>;

    /// Server-side copy of `source` to `dest`.
    async fn rewrite(&self, source: &BlobRef, dest: &BlobRef) -> Result<BlobRef, StorageError>;

    /// Contents of `object`, `None` when it does not exist.
    async fn read_object(&self, object: &BlobRef) -> Result<Option<Vec<u8>>, StorageError>;
}

// ── Cloud Storage JSON API ──

pub struct GcsStore {
    client: AuthorizedClient,
}

impl GcsStore {
    pub fn new(client: AuthorizedClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    bucket: String,
    name: String,
    #[serde(default)]
    generation: Option<String>,
}

impl ObjectResource {
    fn into_blob(self) -> BlobRef {
        BlobRef {
            generation: self
                .generation
                // arch-lint: allow(no-silent-result-drop) reason="a non-numeric generation leaves the object unpinned"
                .and_then(|g| g.parse().ok()),
            bucket: self.bucket,
            object: self.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BucketList {
    #[serde(default)]
    items: Vec<Bucket>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewriteResponse {
    done: bool,
    #[serde(default)]
    rewrite_token: Option<String>,
    #[serde(default)]
    resource: Option<ObjectResource>,
}

#[derive(Serialize)]
struct NewBucket<'a> {
    name: &'a str,
}

impl BlobStore for GcsStore {
    async fn get_bucket(&self, bucket: &str) -> Result<Option<Bucket>, StorageError> {
        let url = api_url(STORAGE_API, &["b", bucket], &[("fields", "name")])?;
        match self.client.get_json::<Bucket>(url).await {
            Ok(found) => Ok(found),
            // Buckets of other projects exist but are not readable.
            Err(e) if e.status() == Some(StatusCode::FORBIDDEN.as_u16()) => Ok(Some(Bucket {
                name: bucket.to_owned(),
            })),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_bucket(&self, project: &str, bucket: &str) -> Result<(), StorageError> {
        let url = api_url(STORAGE_API, &["b"], &[("project", project)])?;
        let status = self
            .client
            .post_status(url, &NewBucket { name: bucket })
            .await?;
        tracing::debug!(bucket, project, %status, "created staging bucket");
        Ok(())
    }

    async fn list_buckets(&self, project: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("project", project), ("prefix", prefix)];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let url = api_url(STORAGE_API, &["b"], &query)?;
            let page = bucket_page(project, self.client.get_json(url).await?)?;
            names.extend(page.items.into_iter().map(|b| b.name));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(names),
            }
        }
    }

    async fn upload_file(&self, path: &Path, dest: &BlobRef) -> Result<BlobRef, StorageError> {
        let payload = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;
        let size = payload.len();
        let url = api_url(
            UPLOAD_API,
            &["b", &dest.bucket, "o"],
            &[("uploadType", "media"), ("name", &dest.object)],
        )?;
        let object: ObjectResource = self
            .client
            .post_bytes(url, "application/octet-stream", payload)
            .await?;
        tracing::debug!(object = %dest, size, "uploaded file");
        Ok(object.into_blob())
    }

    async fn rewrite(&self, source: &BlobRef, dest: &BlobRef) -> Result<BlobRef, StorageError> {
        let generation = source.generation.map(|g| g.to_string());
        let mut token: Option<String> = None;
        loop {
            let mut query = Vec::new();
            if let Some(generation) = generation.as_deref() {
                query.push(("sourceGeneration", generation));
            }
            if let Some(token) = token.as_deref() {
                query.push(("rewriteToken", token));
            }
            let url = api_url(
                STORAGE_API,
                &[
                    "b",
                    &source.bucket,
                    "o",
                    &source.object,
                    "rewriteTo",
                    "b",
                    &dest.bucket,
                    "o",
                    &dest.object,
                ],
                &query,
            )?;
            let response: RewriteResponse =
                self.client.post_json(url, &serde_json::json!({})).await?;
            if response.done {
                tracing::debug!(from = %source, to = %dest, "copied object");
                return response
                    .resource
                    .map(ObjectResource::into_blob)
                    .ok_or_else(|| StorageError::IncompleteRewrite {
                        object: dest.to_string(),
                    });
            }
            token = response.rewrite_token;
            if token.is_none() {
                return Err(StorageError::IncompleteRewrite {
                    object: dest.to_string(),
                });
            }
        }
    }

    async fn read_object(&self, object: &BlobRef) -> Result<Option<Vec<u8>>, StorageError> {
        let generation = object.generation.map(|g| g.to_string());
        let mut query = vec![("alt", "media")];
        if let Some(generation) = generation.as_deref() {
            query.push(("generation", generation));
        }
        let url = api_url(STORAGE_API, &["b", &object.bucket, "o", &object.object], &query)?;
        Ok(self.client.get_bytes(url, None).await?)
    }
}

/// A missing listing means the project itself is unknown to the service.
fn bucket_page(project: &str, page: Option<BucketList>) -> Result<BucketList, StorageError> {
    page.ok_or_else(|| StorageError::ProjectNotFound {
        project: project.to_owned(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to read {path}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("copy to {object} did not complete")]
    IncompleteRewrite { object: String },

    #[error("project [{project}] was not found while listing its buckets")]
    ProjectNotFound { project: String },
}

impl StorageError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::Transport(e) => e.kind(),
            Self::ReadFile { .. } => appdeploy_core::ErrorKind::Source,
            Self::IncompleteRewrite { .. } => appdeploy_core::ErrorKind::Transport,
            Self::ProjectNotFound { .. } => appdeploy_core::ErrorKind::Environment,
        }
    }
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_transient())
    }
}
