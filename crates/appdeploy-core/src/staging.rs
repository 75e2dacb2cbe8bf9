//! Staging location for uploaded sources and the names of staged objects.

use std::fmt;

use crate::source::BLOB_SCHEME;
use crate::{Error, Result};

/// Prefix used under the default staging bucket.
const DEFAULT_STAGING_PREFIX: &str = "deploy";

/// Bucket (and optional object prefix) that receives staged sources and
/// generated configs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingDir {
    pub bucket: String,
    pub prefix: Option<String>,
    /// Derived from the project rather than given by the user.
    pub is_default: bool,
}

impl StagingDir {
    /// Parse `gs://bucket` or `gs://bucket/prefix`.
    pub fn parse(value: &str) -> Result<Self> {
        let rest = value
            .strip_prefix(BLOB_SCHEME)
            .ok_or_else(|| Error::InvalidStagingDir {
                value: value.to_owned(),
                reason: "expected a gs:// URI",
            })?;
        let rest = rest.trim_end_matches('/');
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, Some(prefix.to_owned())),
            None => (rest, None),
        };
        if bucket.is_empty() {
            return Err(Error::InvalidStagingDir {
                value: value.to_owned(),
                reason: "bucket name must not be empty",
            });
        }
        Ok(Self {
            bucket: bucket.to_owned(),
            prefix,
            is_default: false,
        })
    }

    /// `gs://{safe_project}_cloudbuild/deploy`
    pub fn default_for(project: &str) -> Self {
        Self {
            bucket: format!("{}_cloudbuild", safe_project_name(project)),
            prefix: Some(DEFAULT_STAGING_PREFIX.to_owned()),
            is_default: true,
        }
    }

    /// Object name for a staged source: `{prefix}/source/{ts}-{uuid}{suffix}`.
    pub fn source_object(&self, stamp: &StagingStamp, suffix: &str) -> String {
        let name = format!("source/{}-{}{suffix}", stamp.timestamp, stamp.uuid);
        self.join(&name)
    }

    /// `gs://bucket[/prefix]/config`, where generated configs are copied.
    pub fn config_uri(&self) -> String {
        format!("{BLOB_SCHEME}{}/{}", self.bucket, self.join("config"))
    }

    fn join(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.to_owned(),
        }
    }
}

impl fmt::Display for StagingDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BLOB_SCHEME}{}", self.bucket)?;
        if let Some(prefix) = &self.prefix {
            write!(f, "/{prefix}")?;
        }
        Ok(())
    }
}

/// Bucket-safe form of a project id.
///
/// Bucket names may not contain `:` or `google`, and dots carry DNS
/// meaning.
pub fn safe_project_name(project: &str) -> String {
    project
        .replace(':', "_")
        .replace('.', "_")
        .replace("google", "elgoog")
}

/// Timestamp and unique id that make a staged object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingStamp {
    pub timestamp: i64,
    pub uuid: String,
}

impl StagingStamp {
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            uuid: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn fixed(timestamp: i64, uuid: impl Into<String>) -> Self {
        Self {
            timestamp,
            uuid: uuid.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_prefix() {
        let dir = StagingDir::parse("gs://bucket/some/dir/").unwrap();
        assert_eq!(dir.bucket, "bucket");
        assert_eq!(dir.prefix.as_deref(), Some("some/dir"));
        assert!(!dir.is_default);
        assert_eq!(dir.to_string(), "gs://bucket/some/dir");
    }

    #[test]
    fn requires_scheme() {
        assert!(StagingDir::parse("bucket/dir").is_err());
        assert!(StagingDir::parse("gs://").is_err());
    }

    #[test]
    fn default_bucket_is_project_safe() {
        let dir = StagingDir::default_for("google.com:my-project");
        assert_eq!(dir.bucket, "elgoog_com_my-project_cloudbuild");
        assert_eq!(dir.to_string(), "gs://elgoog_com_my-project_cloudbuild/deploy");
        assert!(dir.is_default);
    }

    #[test]
    fn source_object_layout() {
        let stamp = StagingStamp::fixed(1_500_000_000, "0123abcd");
        let dir = StagingDir::parse("gs://bucket").unwrap();
        assert_eq!(dir.source_object(&stamp, ".tgz"), "source/1500000000-0123abcd.tgz");
        let dir = StagingDir::default_for("my-project");
        assert_eq!(
            dir.source_object(&stamp, ".zip"),
            "deploy/source/1500000000-0123abcd.zip"
        );
        assert_eq!(dir.config_uri(), "gs://my-project_cloudbuild/deploy/config");
    }

    #[test]
    fn fresh_stamps_differ() {
        assert_ne!(StagingStamp::now().uuid, StagingStamp::now().uuid);
    }
}
