//! Reproducible source archives.
//!
//! Entries are written in sorted order with zeroed timestamps and
//! ownership, so the same tree always produces the same bytes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use tempfile::NamedTempFile;

#[cfg(target_os = "macos")]
const ENAMETOOLONG: i32 = 63;
#[cfg(not(target_os = "macos"))]
const ENAMETOOLONG: i32 = 36;

const WINDOWS_MAX_PATH: usize = 260;

/// A gzipped tarball in the process temp area, removed on drop.
#[derive(Debug)]
pub struct SourceArchive {
    file: NamedTempFile,
    pub size: u64,
    pub entries: usize,
}

impl SourceArchive {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Archive `files` (relative to `root`) plus `generated` contents.
///
/// A generated file replaces a source file at the same path.
pub fn create_archive(
    root: &Path,
    files: &[String],
    generated: &BTreeMap<String, Vec<u8>>,
) -> Result<SourceArchive, ArchiveError> {
    let file = tempfile::Builder::new()
        .prefix("appdeploy-source-")
        .suffix(".tgz")
        .tempfile()
        .map_err(|e| ArchiveError::TempFile { source: e })?;
    let writer = file
        .reopen()
        .map_err(|e| ArchiveError::TempFile { source: e })?;

    let gz = GzBuilder::new()
        .mtime(0)
        .write(BufWriter::new(writer), Compression::default());
    let mut tar = tar::Builder::new(gz);
    tar.mode(tar::HeaderMode::Deterministic);

    let mut entries: BTreeMap<&str, Entry<'_>> = files
        .iter()
        .filter(|f| !generated.contains_key(f.as_str()))
        .map(|f| (f.as_str(), Entry::Source(root.join(f))))
        .collect();
    for (name, contents) in generated {
        entries.insert(name.as_str(), Entry::Generated(contents));
    }

    for (name, entry) in &entries {
        match entry {
            Entry::Source(path) => append_file(&mut tar, name, path)?,
            Entry::Generated(contents) => {
                let mut header = header(contents.len() as u64, 0o644);
                tar.append_data(&mut header, name, contents.as_slice())
                    .map_err(|e| ArchiveError::Write { source: e })?;
            }
        }
    }

    let gz = tar
        .into_inner()
        .map_err(|e| ArchiveError::Write { source: e })?;
    let mut inner = gz.finish().map_err(|e| ArchiveError::Write { source: e })?;
    inner
        .flush()
        .map_err(|e| ArchiveError::Write { source: e })?;
    drop(inner);

    let size = std::fs::metadata(file.path())
        .map_err(|e| ArchiveError::Write { source: e })?
        .len();
    tracing::debug!(
        entries = entries.len(),
        size,
        path = %file.path().display(),
        "created source archive"
    );
    Ok(SourceArchive {
        file,
        size,
        entries: entries.len(),
    })
}

enum Entry<'a> {
    Source(PathBuf),
    Generated(&'a Vec<u8>),
}

fn append_file<W: Write>(
    tar: &mut tar::Builder<W>,
    name: &str,
    path: &Path,
) -> Result<(), ArchiveError> {
    let metadata = std::fs::metadata(path).map_err(|e| read_error(path, e))?;
    let mut source = File::open(path).map_err(|e| read_error(path, e))?;
    let mut header = header(metadata.len(), mode_of(&metadata));
    tar.append_data(&mut header, name, &mut source)
        .map_err(|e| ArchiveError::Write { source: e })
}

fn header(size: u64, mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_entry_type(tar::EntryType::Regular);
    header
}

#[cfg(unix)]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn mode_of(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

/// Read failures caused by host path-length limits become
/// [`ArchiveError::PathTooLongOnHost`].
fn read_error(path: &Path, err: std::io::Error) -> ArchiveError {
    let length = path.as_os_str().len();
    let too_long = if cfg!(windows) {
        length >= WINDOWS_MAX_PATH
    } else {
        err.raw_os_error() == Some(ENAMETOOLONG)
    };
    if too_long {
        ArchiveError::PathTooLongOnHost {
            path: path.to_path_buf(),
            length,
        }
    } else {
        ArchiveError::Read {
            path: path.to_path_buf(),
            source: err,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to create temporary archive")]
    TempFile { source: std::io::Error },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(
        "path [{}] is {length} characters long, which exceeds the limit of this host; move the source to a shorter path",
        .path.display()
    )]
    PathTooLongOnHost { path: PathBuf, length: usize },
    #[error("failed to write source archive")]
    Write { source: std::io::Error },
}

impl ArchiveError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::Read { .. } | Self::PathTooLongOnHost { .. } => appdeploy_core::ErrorKind::Source,
            Self::TempFile { .. } | Self::Write { .. } => appdeploy_core::ErrorKind::Environment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn entries(archive: &SourceArchive) -> Vec<(String, Vec<u8>)> {
        let file = File::open(archive.path()).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        tar.entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().into_owned();
                let mut contents = Vec::new();
                e.read_to_end(&mut contents).unwrap();
                (name, contents)
            })
            .collect()
    }

    #[test]
    fn generated_files_are_merged_in_order() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("main.py"), b"print()").unwrap();
        std::fs::write(tmp.path().join("Dockerfile"), b"FROM old").unwrap();
        let mut generated = BTreeMap::new();
        generated.insert("Dockerfile".to_owned(), b"FROM new".to_vec());
        generated.insert("_app_x.yaml".to_owned(), b"runtime: python".to_vec());

        let archive = create_archive(
            tmp.path(),
            &["Dockerfile".to_owned(), "main.py".to_owned()],
            &generated,
        )
        .unwrap();

        let found = entries(&archive);
        let names: Vec<_> = found.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["Dockerfile", "_app_x.yaml", "main.py"]);
        assert_eq!(found[0].1, b"FROM new");
        assert_eq!(archive.entries, 3);
    }

    #[test]
    fn same_tree_gives_same_bytes() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("pkg")).unwrap();
        std::fs::write(tmp.path().join("pkg/mod.py"), b"x = 1").unwrap();
        let files = ["pkg/mod.py".to_owned()];

        let a = create_archive(tmp.path(), &files, &BTreeMap::new()).unwrap();
        let b = create_archive(tmp.path(), &files, &BTreeMap::new()).unwrap();

        assert_eq!(
            std::fs::read(a.path()).unwrap(),
            std::fs::read(b.path()).unwrap()
        );
    }

    #[test]
    fn archive_is_removed_on_drop() {
        let tmp = TempDir::new().unwrap();
        let archive = create_archive(tmp.path(), &[], &BTreeMap::new()).unwrap();
        let path = archive.path().to_path_buf();
        assert!(path.exists());
        drop(archive);
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_is_read_error() {
        let tmp = TempDir::new().unwrap();
        let err = create_archive(tmp.path(), &["gone.txt".to_owned()], &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Read { .. }));
    }
}
