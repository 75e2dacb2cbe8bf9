use std::process::Stdio;

/// The Cloud SDK binary; it owns the active account and the `core/project`
/// property.
const SDK_BINARY: &str = "gcloud";

/// Runs Cloud SDK commands and captures their stdout.
///
/// [`RealExecutor`] spawns the binary; tests substitute a mockall mock.
#[allow(async_fn_in_trait)]
pub trait GcloudExecutor: Send + Sync {
    async fn exec(&self, args: &[String]) -> Result<String, SdkError>;
}

pub struct RealExecutor;

impl GcloudExecutor for RealExecutor {
    async fn exec(&self, args: &[String]) -> Result<String, SdkError> {
        tracing::debug!(?args, "running {SDK_BINARY}");
        let output = tokio::process::Command::new(SDK_BINARY)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| SdkError::Missing { source })?;

        if !output.status.success() {
            return Err(SdkError::Exited {
                command: args.join(" "),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        String::from_utf8(output.stdout).map_err(|source| SdkError::Encoding { source })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("the Cloud SDK ({SDK_BINARY}) is not installed or not on PATH")]
    Missing { source: std::io::Error },

    #[error("`{SDK_BINARY} {command}` exited with {code:?}: {stderr}")]
    Exited {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{SDK_BINARY} printed output that is not UTF-8")]
    Encoding { source: std::string::FromUtf8Error },
}
