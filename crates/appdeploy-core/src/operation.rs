//! Remote build operations and their status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a build as reported by the builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    #[default]
    StatusUnknown,
    Pending,
    Queued,
    Working,
    Success,
    Failure,
    InternalError,
    Timeout,
    Cancelled,
    Expired,
    #[serde(other)]
    Unrecognized,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Failure
                | Self::InternalError
                | Self::Timeout
                | Self::Cancelled
                | Self::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusUnknown => "STATUS_UNKNOWN",
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Working => "WORKING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
            Self::Unrecognized => "UNRECOGNIZED",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-step status in a build record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: BuildStatus,
}

/// The `build` record nested in an operation, or returned by a build GET.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub status: BuildStatus,
    /// `gs://bucket[/path]`
    #[serde(default)]
    pub logs_bucket: Option<String>,
    #[serde(default)]
    pub log_url: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub status_detail: Option<String>,
}

impl BuildRecord {
    pub fn step_status(&self, id: &str) -> Option<BuildStatus> {
        self.steps
            .iter()
            .find(|s| s.id.as_deref() == Some(id))
            .map(|s| s.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetadata {
    #[serde(default)]
    pub build: BuildRecord,
}

/// Long-running operation returned on submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub metadata: Option<OperationMetadata>,
}

/// Handle to an in-flight build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOperation {
    pub id: String,
    pub project_id: String,
    /// Resource path of the operation (`operations/...`).
    pub status_path: String,
    pub logs_bucket: Option<String>,
    pub logs_url: Option<String>,
}

impl BuildOperation {
    pub fn from_operation(operation: &Operation) -> Option<Self> {
        let build = &operation.metadata.as_ref()?.build;
        if build.id.is_empty() {
            return None;
        }
        Some(Self {
            id: build.id.clone(),
            project_id: build.project_id.clone(),
            status_path: operation.name.clone(),
            logs_bucket: build.logs_bucket.clone(),
            logs_url: build.log_url.clone(),
        })
    }

    /// Bucket and object of the streamed log file: `log-{id}.txt` under
    /// the logs bucket path.
    pub fn log_object(&self) -> Option<(String, String)> {
        let bucket_uri = self.logs_bucket.as_deref()?;
        let rest = bucket_uri
            .strip_prefix(crate::source::BLOB_SCHEME)
            .unwrap_or(bucket_uri);
        let (bucket, dir) = match rest.split_once('/') {
            Some((bucket, dir)) => (bucket, dir.trim_end_matches('/')),
            None => (rest, ""),
        };
        let object = if dir.is_empty() {
            format!("log-{}.txt", self.id)
        } else {
            format!("{dir}/log-{}.txt", self.id)
        };
        Some((bucket.to_owned(), object))
    }
}
