//! Source classification.
//!
//! A deploy's `SOURCE` argument may name a local directory, a local
//! archive, an object in the blob store, or a code-repository snapshot.
//! [`SourceResolver::resolve`] normalizes each to a [`SourceHandle`].

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Scheme of blob-store object URIs.
pub const BLOB_SCHEME: &str = "gs://";

/// Extensions accepted for pre-made source archives.
pub const ARCHIVE_EXTENSIONS: &[&str] = &[".zip", ".tgz", ".gz"];

/// URL prefixes recognized as code-repository snapshots.
pub const REPO_PREFIXES: &[&str] = &[
    "https://source.developers.google.com/",
    "https://github.com/",
    "https://gitlab.com/",
    "https://bitbucket.org/",
];

/// An object in the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub bucket: String,
    pub object: String,
    pub generation: Option<i64>,
}

impl BlobRef {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            generation: None,
        }
    }

    /// Parse `gs://bucket/object[#generation]`.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidSource {
            path: uri.to_owned(),
            reason: reason.to_owned(),
        };
        let rest = uri
            .strip_prefix(BLOB_SCHEME)
            .ok_or_else(|| invalid("expected a gs:// URI"))?;
        let (rest, generation) = match rest.rsplit_once('#') {
            Some((path, gen_str)) => {
                let generation = gen_str
                    .parse::<i64>()
                    .map_err(|_| invalid("object generation must be an integer"))?;
                (path, Some(generation))
            }
            None => (rest, None),
        };
        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| invalid("object name must not be empty"))?;
        if bucket.is_empty() {
            return Err(invalid("bucket name must not be empty"));
        }
        if object.is_empty() {
            return Err(invalid("object name must not be empty"));
        }
        Ok(Self {
            bucket: bucket.to_owned(),
            object: object.to_owned(),
            generation,
        })
    }

    /// Extension of the object name including the dot, if any.
    pub fn extension(&self) -> Option<&str> {
        extension_of(&self.object)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BLOB_SCHEME}{}/{}", self.bucket, self.object)?;
        if let Some(generation) = self.generation {
            write!(f, "#{generation}")?;
        }
        Ok(())
    }
}

/// Where the source for one deploy comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceHandle {
    Local { path: PathBuf },
    LocalArchive { path: PathBuf },
    RemoteBlob(BlobRef),
    RemoteRepo { url: String, revision: Option<String> },
}

impl SourceHandle {
    pub fn local_dir(&self) -> Option<&Path> {
        match self {
            Self::Local { path } => Some(path),
            _ => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteBlob(_) | Self::RemoteRepo { .. })
    }

    /// Suffix used for the staged copy of this source.
    pub fn staged_suffix(&self) -> &str {
        let ext = match self {
            Self::LocalArchive { path } => path.to_str().and_then(extension_of),
            Self::RemoteBlob(blob) => blob.extension(),
            Self::Local { .. } | Self::RemoteRepo { .. } => None,
        };
        ext.unwrap_or(".tgz")
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } | Self::LocalArchive { path } => write!(f, "{}", path.display()),
            Self::RemoteBlob(blob) => write!(f, "{blob}"),
            Self::RemoteRepo { url, revision } => match revision {
                Some(rev) => write!(f, "{url}#{rev}"),
                None => f.write_str(url),
            },
        }
    }
}

/// Classifies a `SOURCE` argument.
pub struct SourceResolver;

impl SourceResolver {
    /// Resolve `arg` into a [`SourceHandle`].
    ///
    /// An empty argument or `.` means the directory holding the service
    /// descriptor.
    pub fn resolve(arg: &str, descriptor_dir: &Path) -> Result<SourceHandle> {
        if arg.starts_with(BLOB_SCHEME) {
            return BlobRef::parse(arg).map(SourceHandle::RemoteBlob);
        }

        if REPO_PREFIXES.iter().any(|p| arg.starts_with(p)) {
            let (url, revision) = match arg.split_once('#') {
                Some((url, rev)) if !rev.is_empty() => (url, Some(rev.to_owned())),
                Some((url, _)) => (url, None),
                None => (arg, None),
            };
            return Ok(SourceHandle::RemoteRepo {
                url: url.to_owned(),
                revision,
            });
        }

        if arg.is_empty() || arg == "." {
            return Ok(SourceHandle::Local {
                path: descriptor_dir.to_path_buf(),
            });
        }

        let path = PathBuf::from(arg);
        let meta = std::fs::metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::SourceNotFound {
                path: arg.to_owned(),
            },
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                path: arg.to_owned(),
                source: e,
            },
            _ => Error::InvalidSource {
                path: arg.to_owned(),
                reason: e.to_string(),
            },
        })?;

        if meta.is_file() {
            if is_archive(arg) {
                return Ok(SourceHandle::LocalArchive { path });
            }
            return Err(Error::InvalidSource {
                path: arg.to_owned(),
                reason: format!(
                    "Local file [{arg}] is none of {}",
                    ARCHIVE_EXTENSIONS.join(", ")
                ),
            });
        }

        if meta.is_dir() {
            return Ok(SourceHandle::Local { path });
        }

        Err(Error::InvalidSource {
            path: arg.to_owned(),
            reason: "not a regular file or directory".to_owned(),
        })
    }
}

fn is_archive(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext))
}

/// Extension of the last path segment, including the dot.
fn extension_of(name: &str) -> Option<&str> {
    let file = name.rsplit('/').next().unwrap_or(name);
    file.rfind('.').filter(|&i| i > 0).map(|i| &file[i..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_uri_with_generation() {
        let blob = BlobRef::parse("gs://bucket/dir/src.tgz#123").unwrap();
        assert_eq!(blob.bucket, "bucket");
        assert_eq!(blob.object, "dir/src.tgz");
        assert_eq!(blob.generation, Some(123));
        assert_eq!(blob.extension(), Some(".tgz"));
        assert_eq!(blob.to_string(), "gs://bucket/dir/src.tgz#123");
    }

    #[test]
    fn blob_uri_requires_object() {
        assert!(BlobRef::parse("gs://bucket").is_err());
        assert!(BlobRef::parse("gs://bucket/").is_err());
        assert!(BlobRef::parse("gs:///obj").is_err());
    }

    #[test]
    fn staged_suffix_follows_source_extension() {
        let blob = SourceHandle::RemoteBlob(BlobRef::new("b", "src.zip"));
        assert_eq!(blob.staged_suffix(), ".zip");
        let archive = SourceHandle::LocalArchive {
            path: PathBuf::from("dir/app.gz"),
        };
        assert_eq!(archive.staged_suffix(), ".gz");
        let local = SourceHandle::Local {
            path: PathBuf::from("dir"),
        };
        assert_eq!(local.staged_suffix(), ".tgz");
    }

    #[test]
    fn extension_ignores_dotfiles_and_dirs() {
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("a.b/file"), None);
        assert_eq!(extension_of("a/file.tar.gz"), Some(".gz"));
    }
}
