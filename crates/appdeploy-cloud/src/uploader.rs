//! Staging of deploy sources in the blob store.

use std::collections::BTreeMap;

use appdeploy_build::archive::{ArchiveError, create_archive};
use appdeploy_core::request::{GitSource, Source, StorageSource};
use appdeploy_core::{BlobRef, SourceHandle, StagingDir, StagingStamp};

use crate::retry::{RetryPolicy, retry};
use crate::storage::{BlobStore, StorageError};

/// Where staged sources go.
#[derive(Debug, Clone, Copy)]
pub struct StagingTarget<'a> {
    pub project: &'a str,
    pub staging: &'a StagingDir,
    pub stamp: &'a StagingStamp,
}

/// A source the remote builder can fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedSource {
    Blob(BlobRef),
    /// Code-repository snapshot, fetched by the builder directly.
    Repo { url: String, revision: Option<String> },
}

impl StagedSource {
    pub fn to_request_source(&self) -> Source {
        match self {
            Self::Blob(blob) => Source::StorageSource(StorageSource {
                bucket: blob.bucket.clone(),
                object: blob.object.clone(),
                generation: blob.generation,
            }),
            Self::Repo { url, revision } => Source::GitSource(GitSource {
                url: url.clone(),
                revision: revision.clone(),
            }),
        }
    }

    /// Bucket holding the staged blob.
    pub fn bucket(&self) -> Option<&str> {
        match self {
            Self::Blob(blob) => Some(&blob.bucket),
            Self::Repo { .. } => None,
        }
    }
}

pub struct SourceUploader<'a, S: BlobStore> {
    store: &'a S,
    retry: RetryPolicy,
}

impl<'a, S: BlobStore> SourceUploader<'a, S> {
    pub fn new(store: &'a S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Stage `source` under `target`.
    ///
    /// A local directory is archived from `files` (relative to its root)
    /// plus `generated`, and the archive is removed once uploaded. A blob
    /// already in the store is used in place unless an explicit staging
    /// directory was requested, in which case it is copied there.
    pub async fn upload(
        &self,
        source: &SourceHandle,
        files: &[String],
        generated: &BTreeMap<String, Vec<u8>>,
        target: StagingTarget<'_>,
    ) -> Result<StagedSource, UploadError> {
        let dest = BlobRef::new(
            target.staging.bucket.clone(),
            target
                .staging
                .source_object(target.stamp, source.staged_suffix()),
        );

        match source {
            SourceHandle::RemoteRepo { url, revision } => Ok(StagedSource::Repo {
                url: url.clone(),
                revision: revision.clone(),
            }),
            SourceHandle::RemoteBlob(blob) if target.staging.is_default => {
                tracing::debug!(object = %blob, "using remote source in place");
                Ok(StagedSource::Blob(blob.clone()))
            }
            SourceHandle::RemoteBlob(blob) => {
                self.ensure_bucket(target.project, target.staging).await?;
                let staged = retry(&self.retry, "copy source", || {
                    self.store.rewrite(blob, &dest)
                })
                .await?;
                Ok(StagedSource::Blob(staged))
            }
            SourceHandle::LocalArchive { path } => {
                self.ensure_bucket(target.project, target.staging).await?;
                let staged = retry(&self.retry, "upload source", || {
                    self.store.upload_file(path, &dest)
                })
                .await?;
                tracing::debug!(object = %staged, "uploaded source archive");
                Ok(StagedSource::Blob(staged))
            }
            SourceHandle::Local { path } => {
                let archive = create_archive(path, files, generated)?;
                self.ensure_bucket(target.project, target.staging).await?;
                let staged = retry(&self.retry, "upload source", || {
                    self.store.upload_file(archive.path(), &dest)
                })
                .await?;
                tracing::debug!(
                    object = %staged,
                    size = archive.size,
                    entries = archive.entries,
                    "uploaded source"
                );
                Ok(StagedSource::Blob(staged))
            }
        }
    }

    /// Make sure the staging bucket exists and belongs to `project`.
    ///
    /// Ownership is only checked for the default bucket; an explicit
    /// staging directory is trusted.
    async fn ensure_bucket(&self, project: &str, staging: &StagingDir) -> Result<(), UploadError> {
        let bucket = staging.bucket.as_str();
        let found = retry(&self.retry, "look up bucket", || self.store.get_bucket(bucket)).await?;

        match found {
            None => {
                tracing::debug!(bucket, project, "creating staging bucket");
                retry(&self.retry, "create bucket", || {
                    self.store.create_bucket(project, bucket)
                })
                .await?;
            }
            Some(_) if staging.is_default => {
                let owned = retry(&self.retry, "list buckets", || {
                    self.store.list_buckets(project, bucket)
                })
                .await?;
                if !owned.iter().any(|name| name == bucket) {
                    return Err(UploadError::BucketConflict {
                        bucket: bucket.to_owned(),
                    });
                }
                tracing::debug!(bucket, project, "using existing staging bucket");
            }
            Some(_) => tracing::debug!(bucket, "using requested staging bucket"),
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(
        "A bucket with name {bucket} already exists and is owned by another project. Specify a bucket using --gcs-staging-dir."
    )]
    BucketConflict { bucket: String },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl UploadError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::BucketConflict { .. } => appdeploy_core::ErrorKind::Environment,
            Self::Archive(e) => e.kind(),
            Self::Storage(e) => e.kind(),
        }
    }
}
