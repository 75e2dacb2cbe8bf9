use crate::executor::{GcloudExecutor, RealExecutor, SdkError};

/// Credentials and defaults read through gcloud, parameterized over the
/// executor for testability.
pub struct GcloudClient<E: GcloudExecutor = RealExecutor> {
    executor: E,
}

impl GcloudClient<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor,
        }
    }
}

impl Default for GcloudClient<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: GcloudExecutor> GcloudClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    /// OAuth access token of the active account.
    pub async fn access_token(&self) -> Result<String, CredentialError> {
        let token = self
            .executor
            .exec(&args(["auth", "print-access-token", "--quiet"]))
            .await
            .map_err(|e| CredentialError::NotAuthenticated { source: e })?;
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        Ok(token.to_owned())
    }

    /// The `core/project` property, if set.
    pub async fn default_project(&self) -> Result<Option<String>, CredentialError> {
        let project = self
            .executor
            .exec(&args(["config", "get-value", "project", "--quiet"]))
            .await
            .map_err(|e| CredentialError::Config { source: e })?;
        let project = project.trim();
        tracing::debug!(project, "read default project from gcloud");
        Ok((!project.is_empty() && project != "(unset)").then(|| project.to_owned()))
    }
}

// ── Helper ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

// ── Error types ──

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("not authenticated; run: gcloud auth login")]
    NotAuthenticated { source: SdkError },

    #[error("gcloud returned an empty access token")]
    EmptyToken,

    #[error("failed to read gcloud configuration")]
    Config { source: SdkError },
}

impl CredentialError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        appdeploy_core::ErrorKind::Environment
    }
}
