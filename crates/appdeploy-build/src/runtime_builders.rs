//! Registered runtime builders.
//!
//! A builders root (`gs://` or `file://`) holds a `runtimes.yaml` manifest
//! mapping runtime names to build definition files, possibly via aliases.
//! Roots predating the manifest hold `{runtime}.version` files naming the
//! default `{runtime}-{version}.yaml` definition instead.

use std::collections::{BTreeMap, BTreeSet};

use appdeploy_core::{BuildRequest, SubstitutionPolicy};
use serde::Deserialize;

use crate::planner::YAML_PATH_SUBSTITUTION;
use crate::script::{ScriptError, parse_script};

pub const MANIFEST_FILE: &str = "runtimes.yaml";
pub const SCHEMA_VERSION: u32 = 1;

const YAML_PATH_ENV: &str = "GAE_APPLICATION_YAML_PATH";

/// Resolved builder for a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderReference {
    pub runtime: String,
    pub build_file_uri: Option<String>,
    pub deprecation_message: Option<String>,
}

impl BuilderReference {
    pub fn new(runtime: impl Into<String>, build_file_uri: Option<String>) -> Self {
        Self {
            runtime: runtime.into(),
            build_file_uri,
            deprecation_message: None,
        }
    }

    pub fn warn_if_deprecated(&self) {
        if let Some(message) = &self.deprecation_message {
            tracing::warn!("{message}");
        }
    }

    /// Location of the build definition, validated.
    pub fn build_file(&self) -> Result<&str, BuilderError> {
        let uri = self
            .build_file_uri
            .as_deref()
            .ok_or_else(|| BuilderError::NoBuildFile {
                runtime: self.runtime.clone(),
            })?;
        validate_uri(uri)?;
        Ok(uri)
    }

    /// Parse the fetched build definition with `params` as substitutions.
    ///
    /// Every step receives the descriptor path in its environment unless
    /// it already sets it, and unmatched substitutions are tolerated.
    pub fn load_build(
        &self,
        contents: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<BuildRequest, BuilderError> {
        let origin = self.build_file_uri.as_deref().unwrap_or(&self.runtime);
        let mut request = parse_script(contents, origin, params)?;
        for step in &mut request.steps {
            if !step.has_env(YAML_PATH_ENV) {
                step.env
                    .push(format!("{YAML_PATH_ENV}=${{{YAML_PATH_SUBSTITUTION}}}"));
            }
        }
        request.set_substitution_policy(SubstitutionPolicy::AllowLoose);
        request.builder_ref = Some(self.runtime.clone());
        Ok(request)
    }
}

/// Accept only `gs://` and `file://` builder locations.
pub fn validate_uri(uri: &str) -> Result<(), BuilderError> {
    if uri.starts_with("gs://") || uri.starts_with("file://") {
        Ok(())
    } else {
        Err(BuilderError::InvalidUri {
            uri: uri.to_owned(),
        })
    }
}

/// `root` joined with `name`, tolerating a trailing slash on the root.
pub fn join(root: &str, name: &str) -> String {
    format!("{}/{name}", root.trim_end_matches('/'))
}

// ── Manifest ──

#[derive(Debug, Deserialize)]
struct RawManifest {
    schema_version: Option<u32>,
    #[serde(default)]
    runtimes: Option<BTreeMap<String, RuntimeEntry>>,
}

#[derive(Debug, Deserialize)]
struct RuntimeEntry {
    #[serde(default)]
    target: Option<Target>,
    #[serde(default)]
    deprecation: Option<Deprecation>,
}

#[derive(Debug, Deserialize)]
struct Target {
    runtime: Option<String>,
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Deprecation {
    message: Option<String>,
}

#[derive(Debug)]
pub struct Manifest {
    uri: String,
    runtimes: BTreeMap<String, RuntimeEntry>,
}

impl Manifest {
    pub fn parse(uri: &str, contents: &str) -> Result<Self, BuilderError> {
        let raw: RawManifest =
            serde_yaml::from_str(contents).map_err(|e| BuilderError::ManifestParse {
                uri: uri.to_owned(),
                source: Some(e),
            })?;
        let version = raw.schema_version.ok_or_else(|| BuilderError::ManifestParse {
            uri: uri.to_owned(),
            source: None,
        })?;
        if version > SCHEMA_VERSION {
            return Err(BuilderError::SchemaVersion {
                supported: SCHEMA_VERSION,
                required: version,
            });
        }
        Ok(Self {
            uri: uri.to_owned(),
            runtimes: raw.runtimes.unwrap_or_default(),
        })
    }

    pub fn runtimes(&self) -> impl Iterator<Item = &str> {
        self.runtimes.keys().map(String::as_str)
    }

    /// Follow aliases from `runtime` to a build file.
    ///
    /// Returns `None` when the runtime is not listed. The deprecation message
    /// nearest the resolved entry is carried on the reference.
    pub fn builder_reference(
        &self,
        runtime: &str,
    ) -> Result<Option<BuilderReference>, BuilderError> {
        let root = self
            .uri
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or_default();
        let mut seen = BTreeSet::new();
        let mut current = runtime;
        let mut deprecation = None;

        loop {
            if !seen.insert(current) {
                return Err(BuilderError::CircularDependency {
                    runtime: runtime.to_owned(),
                });
            }
            let Some(entry) = self.runtimes.get(current) else {
                return Ok(None);
            };
            if let Some(message) = entry.deprecation.as_ref().and_then(|d| d.message.clone()) {
                deprecation = Some(message);
            }

            let target = entry.target.as_ref();
            if let Some(next) = target.and_then(|t| t.runtime.as_deref()) {
                current = next;
                continue;
            }
            return Ok(Some(BuilderReference {
                runtime: current.to_owned(),
                build_file_uri: target.and_then(|t| t.file.as_deref()).map(|f| join(root, f)),
                deprecation_message: deprecation,
            }));
        }
    }
}

/// Build file named by a legacy `{runtime}.version` file.
pub fn legacy_reference(root: &str, runtime: &str, version_contents: &str) -> BuilderReference {
    let version = version_contents.trim();
    BuilderReference::new(runtime, Some(join(root, &format!("{runtime}-{version}.yaml"))))
}

pub fn legacy_version_file(root: &str, runtime: &str) -> String {
    join(root, &format!("{runtime}.version"))
}

#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("[{uri}] is not a valid runtime builder URI")]
    InvalidUri { uri: String },
    #[error("There is no build file associated with runtime [{runtime}]")]
    NoBuildFile { runtime: String },
    #[error("Unable to parse the runtimes manifest: [{uri}]")]
    ManifestParse {
        uri: String,
        source: Option<serde_yaml::Error>,
    },
    #[error(
        "Your client supports schema version [{supported}] but requires [{required}]. Please update your client."
    )]
    SchemaVersion { supported: u32, required: u32 },
    #[error("A circular dependency was found while resolving the builder for runtime [{runtime}]")]
    CircularDependency { runtime: String },
    #[error("Unable to resolve a builder for runtime: [{runtime}]")]
    Unresolved { runtime: String },
    #[error("failed to read runtime builder file [{uri}]: {reason}")]
    Read { uri: String, reason: String },
    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl BuilderError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::Read { .. } => appdeploy_core::ErrorKind::Transport,
            Self::Script(e) => e.kind(),
            _ => appdeploy_core::ErrorKind::Environment,
        }
    }
}
