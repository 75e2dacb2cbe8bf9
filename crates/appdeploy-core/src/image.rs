//! Image naming.
//!
//! Built images are named
//! `{registry}/{project}/appengine/{service}.{version}:latest`; pre-built
//! images are used verbatim once their registry is validated.

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::source::SourceHandle;
use crate::{Error, Result};

/// Path segment between the project and the service/version segment.
const APPENGINE_SEGMENT: &str = "appengine";

static REGISTRY_IMAGE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    // arch-lint: allow(no-silent-result-drop) reason="constant pattern; a missing regex matches nothing"
    Regex::new(r"^([a-z0-9.-]+\.)?gcr\.io/.+").ok()
});

static DNS_LABEL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    // arch-lint: allow(no-silent-result-drop) reason="constant pattern; a missing regex matches nothing"
    Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").ok()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry_domain: String,
    /// Project identifier in display form (`domain:id` or `id`).
    pub project: String,
    pub service_name: String,
    pub version_tag: String,
    /// `sha256:...` digest of a pre-built image.
    pub digest: Option<String>,
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let project = project_path(&self.project);
        match &self.digest {
            Some(digest) => write!(
                f,
                "{}/{project}/{APPENGINE_SEGMENT}/{}@{digest}",
                self.registry_domain, self.service_name
            ),
            None => write!(
                f,
                "{}/{project}/{APPENGINE_SEGMENT}/{}.{}:latest",
                self.registry_domain, self.service_name, self.version_tag
            ),
        }
    }
}

/// Deterministic image names.
pub struct ImageNamer;

impl ImageNamer {
    /// `{registry}/{project}/appengine/{service}.{version}:latest`
    pub fn name(registry: &str, project: &str, service: &str, version: &str) -> String {
        ImageRef {
            registry_domain: registry.to_owned(),
            project: project.to_owned(),
            service_name: service.to_owned(),
            version_tag: version.to_owned(),
            digest: None,
        }
        .to_string()
    }

    /// Inverse of [`ImageNamer::name`].
    pub fn parse(image: &str) -> Result<ImageRef> {
        let malformed = |reason| Error::MalformedImageName {
            name: image.to_owned(),
            reason,
        };

        let (path, digest) = match image.split_once('@') {
            Some((path, digest)) => (path, Some(digest.to_owned())),
            None => {
                let path = image
                    .strip_suffix(":latest")
                    .ok_or_else(|| malformed("expected a :latest tag or a digest"))?;
                (path, None)
            }
        };

        let segments: Vec<&str> = path.split('/').collect();
        let marker = segments
            .iter()
            .rposition(|s| *s == APPENGINE_SEGMENT)
            .ok_or_else(|| malformed("missing appengine path segment"))?;
        if marker + 2 != segments.len() {
            return Err(malformed("expected a single segment after appengine"));
        }

        let project = match &segments[1..marker] {
            [id] => (*id).to_owned(),
            [domain, id] => format!("{domain}:{id}"),
            _ => return Err(malformed("expected project or domain/project")),
        };

        let last = segments[marker + 1];
        let (service_name, version_tag) = match digest {
            Some(_) => (last.to_owned(), String::new()),
            None => {
                let (service, version) = last
                    .split_once('.')
                    .ok_or_else(|| malformed("expected service.version"))?;
                (service.to_owned(), version.to_owned())
            }
        };

        Ok(ImageRef {
            registry_domain: segments[0].to_owned(),
            project,
            service_name,
            version_tag,
            digest,
        })
    }

    /// Accept a user-supplied pre-built image unchanged.
    pub fn prebuilt(image: &str) -> Result<String> {
        if is_registry_image(image) {
            Ok(image.to_owned())
        } else {
            Err(Error::InvalidImage {
                image: image.to_owned(),
            })
        }
    }

    /// Accept a user-supplied tag for a new build unchanged.
    pub fn tag(tag: &str) -> Result<String> {
        if is_registry_image(tag) {
            Ok(tag.to_owned())
        } else {
            Err(Error::InvalidTag {
                tag: tag.to_owned(),
            })
        }
    }
}

/// Image path segment(s) for a project: `domain:id` becomes `domain/id`.
pub fn project_path(project: &str) -> String {
    match split_project(project) {
        (id, Some(domain)) => format!("{domain}/{id}"),
        (id, None) => id.to_owned(),
    }
}

/// Split a project identifier into its display id and optional domain.
pub fn split_project(project: &str) -> (&str, Option<&str>) {
    match project.split_once(':') {
        Some((domain, id)) => (id, Some(domain)),
        None => (project, None),
    }
}

pub fn is_registry_image(image: &str) -> bool {
    REGISTRY_IMAGE
        .as_ref()
        .is_some_and(|re| re.is_match(image))
}

pub fn is_dns_label(name: &str) -> bool {
    DNS_LABEL.as_ref().is_some_and(|re| re.is_match(name))
}

/// Tag portion of an image reference, unless the reference pins a digest.
pub fn version_from_reference(image: &str) -> Option<&str> {
    if image.contains('@') {
        return None;
    }
    let last = image.rsplit('/').next()?;
    last.split_once(':').map(|(_, tag)| tag).filter(|t| !t.is_empty())
}

/// State of the code repository a local source lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoState {
    NotARepository,
    /// Clean working tree at this short commit hash.
    Head(String),
    /// Working tree has uncommitted changes.
    Dirty,
    /// Repository without a resolvable HEAD commit.
    Unresolved,
}

/// Looks up the repository state of a directory.
pub trait RevisionProbe {
    fn repo_state(&self, dir: &Path) -> RepoState;
}

/// Version used by `--tag-default`.
pub fn derive_version(
    app_version: Option<&str>,
    source: &SourceHandle,
    probe: &dyn RevisionProbe,
) -> Result<String> {
    if let Some(version) = app_version {
        return Ok(version.to_owned());
    }

    let no_tag = || Error::NoDefaultVersion {
        reason: "No default container image tag available. Provide an app version with \
                 --app-version, or provide a valid --tag."
            .to_owned(),
    };

    let Some(dir) = source.local_dir() else {
        return Err(no_tag());
    };

    match probe.repo_state(dir) {
        RepoState::Head(sha) => Ok(sha),
        RepoState::NotARepository => Err(no_tag()),
        RepoState::Unresolved => Err(Error::NoDefaultVersion {
            reason: "No default tag available, no commit sha at HEAD of source repository \
                     available for tag. Provide an app version with --app-version, or provide \
                     a valid --tag."
                .to_owned(),
        }),
        RepoState::Dirty => Err(Error::NoDefaultVersion {
            reason: "No default tag available, the source repository has uncommitted changes. \
                     Provide an app version with --app-version, or provide a valid --tag."
                .to_owned(),
        }),
    }
}

/// Service name used by `--tag-default`.
pub fn derive_service_name(app_name: Option<&str>, source: &SourceHandle) -> Result<String> {
    if let Some(name) = app_name {
        return Ok(name.to_owned());
    }
    source
        .local_dir()
        // arch-lint: allow(no-silent-result-drop) reason="an unresolvable directory has no default name"
        .and_then(|dir| dir.canonicalize().ok())
        .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().to_lowercase()))
        .filter(|n| is_dns_label(n))
        .ok_or(Error::NoDefaultName)
}
