//! Fetching registered runtime builders from their root.

use appdeploy_build::runtime_builders::{
    BuilderError, BuilderReference, MANIFEST_FILE, Manifest, join, legacy_reference,
    legacy_version_file, validate_uri,
};
use appdeploy_core::BlobRef;

use crate::retry::{RetryPolicy, retry};
use crate::storage::BlobStore;

const FILE_SCHEME: &str = "file://";

/// Resolves runtime names against a builders root in the blob store or
/// on the local filesystem.
pub struct BuilderResolver<'a, S: BlobStore> {
    store: &'a S,
    root: &'a str,
    retry: RetryPolicy,
}

impl<'a, S: BlobStore> BuilderResolver<'a, S> {
    pub fn new(store: &'a S, root: &'a str, retry: RetryPolicy) -> Self {
        Self { store, root, retry }
    }

    /// Builder for `runtime`.
    ///
    /// A runtime that is itself a builder URI is used directly. Otherwise
    /// the manifest is consulted first, then the legacy version file.
    pub async fn resolve(&self, runtime: &str) -> Result<BuilderReference, BuilderError> {
        if validate_uri(runtime).is_ok() {
            return Ok(BuilderReference::new(runtime, Some(runtime.to_owned())));
        }
        validate_uri(self.root)?;

        let manifest_uri = join(self.root, MANIFEST_FILE);
        match self.read(&manifest_uri).await? {
            Some(contents) => {
                let manifest = Manifest::parse(&manifest_uri, &contents)?;
                if let Some(reference) = manifest.builder_reference(runtime)? {
                    tracing::debug!(
                        runtime,
                        resolved = %reference.runtime,
                        manifest = %manifest_uri,
                        "resolved runtime builder"
                    );
                    return Ok(reference);
                }
            }
            None => tracing::debug!(manifest = %manifest_uri, "no runtime builder manifest"),
        }

        let version_uri = legacy_version_file(self.root, runtime);
        match self.read(&version_uri).await? {
            Some(version) => {
                let reference = legacy_reference(self.root, runtime, &version);
                tracing::debug!(runtime, version = %version.trim(), "resolved legacy runtime builder");
                Ok(reference)
            }
            None => Err(BuilderError::Unresolved {
                runtime: runtime.to_owned(),
            }),
        }
    }

    /// Contents of the build definition named by `reference`.
    pub async fn fetch_build_file(&self, reference: &BuilderReference) -> Result<String, BuilderError> {
        let uri = reference.build_file()?;
        self.read(uri).await?.ok_or_else(|| BuilderError::Read {
            uri: uri.to_owned(),
            reason: "no such file".to_owned(),
        })
    }

    /// `None` when `uri` does not exist.
    async fn read(&self, uri: &str) -> Result<Option<String>, BuilderError> {
        let read_error = |reason: String| BuilderError::Read {
            uri: uri.to_owned(),
            reason,
        };

        let bytes = if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
            match tokio::fs::read(path).await {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(read_error(e.to_string())),
            }
        } else {
            let blob = BlobRef::parse(uri).map_err(|e| read_error(e.to_string()))?;
            retry(&self.retry, "read runtime builder", || {
                self.store.read_object(&blob)
            })
            .await
            .map_err(|e| read_error(e.to_string()))?
        };

        bytes
            .map(|b| String::from_utf8(b).map_err(|e| read_error(e.to_string())))
            .transpose()
    }
}
