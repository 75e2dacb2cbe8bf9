//! Remote build service.

use appdeploy_core::{BuildRequest, Operation};

use crate::retry::Transient;
use crate::transport::{AuthorizedClient, TransportError, api_url};

const CLOUDBUILD_API: &str = "https://cloudbuild.googleapis.com/v1";
const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";

/// Narrow interface over the remote builder used by the submitter.
#[allow(async_fn_in_trait)]
pub trait BuildService: Send + Sync {
    /// Submit `request` to the builder of `project` in `region`.
    async fn create_build(
        &self,
        project: &str,
        region: &str,
        request: &BuildRequest,
    ) -> Result<Operation, BuildServiceError>;

    /// Current state of the operation named `name`.
    async fn get_operation(&self, name: &str) -> Result<Operation, BuildServiceError>;

    /// Log bytes of a build starting at `offset`; `None` while the log
    /// object holds nothing new.
    async fn read_log(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
    ) -> Result<Option<Vec<u8>>, BuildServiceError>;
}

/// Cloud Build v1 over REST, with logs read from Cloud Storage.
pub struct CloudBuildService {
    client: AuthorizedClient,
}

impl CloudBuildService {
    pub fn new(client: AuthorizedClient) -> Self {
        Self { client }
    }
}

impl BuildService for CloudBuildService {
    async fn create_build(
        &self,
        project: &str,
        region: &str,
        request: &BuildRequest,
    ) -> Result<Operation, BuildServiceError> {
        let url = api_url(
            CLOUDBUILD_API,
            &["projects", project, "locations", region, "builds"],
            &[],
        )?;
        let operation: Operation = self.client.post_json(url, request).await?;
        tracing::info!(project, region, operation = %operation.name, "submitted build");
        Ok(operation)
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, BuildServiceError> {
        let segments: Vec<&str> = name.split('/').filter(|s| !s.is_empty()).collect();
        let url = api_url(CLOUDBUILD_API, &segments, &[])?;
        self.client
            .get_json(url)
            .await?
            .ok_or_else(|| BuildServiceError::OperationNotFound {
                name: name.to_owned(),
            })
    }

    async fn read_log(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
    ) -> Result<Option<Vec<u8>>, BuildServiceError> {
        let url = api_url(STORAGE_API, &["b", bucket, "o", object], &[("alt", "media")])?;
        Ok(self.client.get_bytes(url, Some(offset)).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildServiceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("operation [{name}] was not found")]
    OperationNotFound { name: String },
}

impl BuildServiceError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::Transport(e) => e.kind(),
            Self::OperationNotFound { .. } => appdeploy_core::ErrorKind::Environment,
        }
    }
}

impl Transient for BuildServiceError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_transient())
    }
}
