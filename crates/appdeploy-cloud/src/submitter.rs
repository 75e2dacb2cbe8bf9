//! Build submission and log streaming.

use std::io::Write;
use std::time::Duration;

use appdeploy_build::deploy_steps::{
    OUTPUT_BUCKET_SUBSTITUTION, SAVE_CONFIGS_STEP_ID, expanded_configs_uri,
};
use appdeploy_core::{BuildOperation, BuildRecord, BuildRequest, BuildStatus, SubmitConfig};
use tokio::sync::watch;

use crate::cloudbuild::{BuildService, BuildServiceError};
use crate::retry::{RetryPolicy, retry};

/// Shortest pause between polls, whatever the configured interval.
const MIN_POLL_DELAY: Duration = Duration::from_millis(1);

const TIMEOUT_HINT: &str = "Your build and deploy timed out. Use the [--timeout=DURATION] flag to change the timeout threshold.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Return as soon as the build is accepted.
    Async,
    /// Stream the build log until the build finishes.
    Stream,
}

/// Back-off between polls of a running build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterval {
    pub initial: Duration,
    pub max: Duration,
}

impl PollInterval {
    pub fn from_config(config: &SubmitConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.poll_initial_ms),
            max: Duration::from_millis(config.poll_max_ms),
        }
    }
}

impl PollInterval {
    /// Pause before the second poll.
    pub fn first(&self) -> Duration {
        self.initial.max(MIN_POLL_DELAY)
    }

    /// Pause after `previous`: doubled, capped at `max`, never zero.
    pub fn next(&self, previous: Duration) -> Duration {
        previous.saturating_mul(2).min(self.max).max(MIN_POLL_DELAY)
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self::from_config(&SubmitConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The build succeeded.
    Finished(BuildRecord),
    /// Polling stopped on request; the build keeps running remotely.
    Cancelled,
}

pub struct BuildSubmitter<'a, B: BuildService> {
    service: &'a B,
    retry: RetryPolicy,
    poll: PollInterval,
}

impl<'a, B: BuildService> BuildSubmitter<'a, B> {
    pub fn new(service: &'a B, retry: RetryPolicy, poll: PollInterval) -> Self {
        Self {
            service,
            retry,
            poll,
        }
    }

    /// Submit `request` once. Creation is not retried, so a transport
    /// failure never leaves two builds behind.
    pub async fn submit(
        &self,
        project: &str,
        region: &str,
        request: &BuildRequest,
    ) -> Result<BuildOperation, SubmitError> {
        let operation = self.service.create_build(project, region, request).await?;
        let handle = BuildOperation::from_operation(&operation).ok_or_else(|| {
            SubmitError::MissingMetadata {
                name: operation.name.clone(),
            }
        })?;
        tracing::info!(build = %handle.id, project, "build created");
        Ok(handle)
    }

    /// Poll `operation` until it finishes, appending new log bytes to
    /// `sink` in server order.
    ///
    /// Setting `cancel` to `true` stops polling without touching the build.
    pub async fn wait<W: Write>(
        &self,
        operation: &BuildOperation,
        request: &BuildRequest,
        sink: &mut W,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<WaitOutcome, SubmitError> {
        let log = operation.log_object();
        let mut printed: u64 = 0;
        let mut delay = self.poll.first();

        loop {
            if *cancel.borrow() {
                tracing::debug!(build = %operation.id, "stopped polling on request");
                return Ok(WaitOutcome::Cancelled);
            }

            let current = retry(&self.retry, "poll build", || {
                self.service.get_operation(&operation.status_path)
            })
            .await?;

            if let Some((bucket, object)) = &log {
                let chunk = retry(&self.retry, "read build log", || {
                    self.service.read_log(bucket, object, printed)
                })
                .await?;
                if let Some(bytes) = chunk {
                    sink.write_all(&bytes)
                        .and_then(|()| sink.flush())
                        .map_err(|e| SubmitError::Output { source: e })?;
                    printed += bytes.len() as u64;
                }
            }

            if current.done {
                let record = current.metadata.map(|m| m.build).unwrap_or_default();
                return finish(operation, record, request);
            }

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                Ok(()) = cancel.changed() => {}
            }
            delay = self.poll.next(delay);
        }
    }
}

fn finish(
    operation: &BuildOperation,
    record: BuildRecord,
    request: &BuildRequest,
) -> Result<WaitOutcome, SubmitError> {
    if record.status == BuildStatus::Success {
        tracing::debug!(build = %operation.id, "build succeeded");
        return Ok(WaitOutcome::Finished(record));
    }

    let mut hints = String::new();
    let configs_saved = record.step_status(SAVE_CONFIGS_STEP_ID) == Some(BuildStatus::Success);
    if let Some(path) = request
        .substitutions
        .get(OUTPUT_BUCKET_SUBSTITUTION)
        .filter(|_| configs_saved)
    {
        hints.push_str(&format!(
            "\nYou can find the configuration files for this attempt at {}.",
            expanded_configs_uri(path, &operation.id)
        ));
    }
    if record.status == BuildStatus::Timeout {
        hints.push('\n');
        hints.push_str(TIMEOUT_HINT);
    }

    Err(SubmitError::BuildFailed {
        id: operation.id.clone(),
        status: record.status,
        hints,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to build or deploy: build {id} completed with status \"{status}\"{hints}")]
    BuildFailed {
        id: String,
        status: BuildStatus,
        hints: String,
    },

    #[error("operation [{name}] carries no build metadata")]
    MissingMetadata { name: String },

    #[error(transparent)]
    Service(#[from] BuildServiceError),

    #[error("failed to write build log")]
    Output { source: std::io::Error },
}

impl SubmitError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::BuildFailed { .. } => appdeploy_core::ErrorKind::BuildFailed,
            Self::MissingMetadata { .. } => appdeploy_core::ErrorKind::Transport,
            Self::Service(e) => e.kind(),
            Self::Output { .. } => appdeploy_core::ErrorKind::Environment,
        }
    }
}
