use appdeploy_core::source::{BlobRef, SourceHandle, SourceResolver};
use appdeploy_core::{Error, ErrorKind};
use std::path::Path;
use tempfile::TempDir;

#[test]
fn blob_uri_is_remote_blob() {
    let handle = SourceResolver::resolve("gs://bucket/path/src.tgz", Path::new(".")).unwrap();
    assert_eq!(
        handle,
        SourceHandle::RemoteBlob(BlobRef::new("bucket", "path/src.tgz"))
    );
}

#[test]
fn blob_uri_without_object_is_invalid() {
    let err = SourceResolver::resolve("gs://bucket/", Path::new(".")).unwrap_err();
    assert!(matches!(err, Error::InvalidSource { .. }));
}

#[test]
fn repository_url_is_remote_repo() {
    let handle = SourceResolver::resolve(
        "https://github.com/example/app#0123abc",
        Path::new("."),
    )
    .unwrap();
    assert_eq!(
        handle,
        SourceHandle::RemoteRepo {
            url: "https://github.com/example/app".to_owned(),
            revision: Some("0123abc".to_owned()),
        }
    );
}

#[test]
fn archive_file_is_local_archive() {
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("src.tgz");
    std::fs::write(&archive, b"not really gzip").unwrap();

    let handle = SourceResolver::resolve(archive.to_str().unwrap(), tmp.path()).unwrap();
    assert_eq!(handle, SourceHandle::LocalArchive { path: archive });
}

#[test]
fn non_archive_file_is_invalid() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("main.py");
    std::fs::write(&file, b"print()").unwrap();

    let err = SourceResolver::resolve(file.to_str().unwrap(), tmp.path()).unwrap_err();
    assert!(err.to_string().contains("Local file"));
    assert!(err.to_string().contains("is none of .zip, .tgz, .gz"));
    assert_eq!(err.kind(), ErrorKind::Source);
}

#[test]
fn directory_is_local() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("module");
    std::fs::create_dir(&dir).unwrap();

    let handle = SourceResolver::resolve(dir.to_str().unwrap(), tmp.path()).unwrap();
    assert_eq!(handle, SourceHandle::Local { path: dir });
}

#[test]
fn empty_and_dot_use_descriptor_directory() {
    let tmp = TempDir::new().unwrap();
    for arg in ["", "."] {
        let handle = SourceResolver::resolve(arg, tmp.path()).unwrap();
        assert_eq!(
            handle,
            SourceHandle::Local {
                path: tmp.path().to_path_buf()
            }
        );
    }
}

#[test]
fn missing_path_is_source_not_found() {
    let tmp = TempDir::new().unwrap();
    let err = SourceResolver::resolve("whereissource.tgz", tmp.path()).unwrap_err();
    assert!(matches!(err, Error::SourceNotFound { .. }));
    assert_eq!(err.to_string(), "could not find source [whereissource.tgz]");
}
