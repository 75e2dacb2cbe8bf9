//! `source-context.json` links a deployed build to the commit it came from.

use std::path::Path;

use serde::Serialize;

use crate::git::{GitError, GitProbe};

pub const SOURCE_CONTEXT_FILE: &str = "source-context.json";

#[derive(Debug, Serialize)]
struct SourceContext {
    git: GitContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GitContext {
    url: String,
    revision_id: String,
}

/// Generated `(path, contents)` describing the commit checked out in `dir`.
pub fn generate(dir: &Path, probe: &GitProbe) -> Result<(String, Vec<u8>), SourceContextError> {
    if !probe.is_repository(dir) {
        return Err(SourceContextError::NotARepository);
    }
    let url = probe.remote_url(dir)?.ok_or(SourceContextError::NoRemote)?;
    let revision_id = probe.head_revision_full(dir)?;

    let context = SourceContext {
        git: GitContext { url, revision_id },
    };
    let contents = serde_json::to_vec(&context)
        .map_err(|e| SourceContextError::Encode { source: e })?;
    tracing::debug!(dir = %dir.display(), "generated source context");
    Ok((SOURCE_CONTEXT_FILE.to_owned(), contents))
}

/// Outcome warning for a source context that could not be produced.
pub fn warning(err: &SourceContextError) -> String {
    format!("Could not generate [{SOURCE_CONTEXT_FILE}]: {err}")
}

#[derive(Debug, thiserror::Error)]
pub enum SourceContextError {
    #[error("source is not in a git repository")]
    NotARepository,
    #[error("git repository has no remote")]
    NoRemote,
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("failed to encode source context")]
    Encode { source: serde_json::Error },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn outside_repository_warns() {
        let tmp = TempDir::new().unwrap();
        let err = generate(tmp.path(), &GitProbe).unwrap_err();
        assert_eq!(
            warning(&err),
            "Could not generate [source-context.json]: source is not in a git repository"
        );
    }

    #[test]
    fn wire_shape() {
        let context = SourceContext {
            git: GitContext {
                url: "https://github.com/example/app".to_owned(),
                revision_id: "0123abcd".to_owned(),
            },
        };
        assert_eq!(
            serde_json::to_string(&context).unwrap(),
            r#"{"git":{"url":"https://github.com/example/app","revisionId":"0123abcd"}}"#
        );
    }
}
