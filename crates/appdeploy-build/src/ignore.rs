//! `.gcloudignore` rules deciding which source files are uploaded.
//!
//! The syntax follows gitignore: one pattern per line, `#` comments,
//! `!` to re-include, a trailing `/` to match directories only, and `**`
//! to span any number of directories. `#!include:.gitignore` pulls in
//! patterns from a sibling file. Once a directory is ignored nothing
//! below it can be re-included.

use std::path::{Path, PathBuf};

use regex::Regex;

pub const IGNORE_FILE_NAME: &str = ".gcloudignore";

/// Rules used when the source has no ignore file.
pub const DEFAULT_IGNORE_FILE: &str = ".gcloudignore\n.git\n.gitignore\n";

const INCLUDE_DIRECTIVE: &str = "!include:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    Include,
    Ignore,
    NoMatch,
}

#[derive(Debug)]
enum Part {
    /// Empty part, from a leading `/`.
    Root,
    /// `**`
    AnyDirs,
    Glob(Regex),
}

#[derive(Debug)]
struct Pattern {
    parts: Vec<Part>,
    negated: bool,
    dir_only: bool,
}

impl Pattern {
    fn parse(line: &str) -> Result<Option<Self>, IgnoreError> {
        let (line, negated) = match line.strip_prefix('!') {
            Some(rest) => (rest, true),
            None => (line, false),
        };
        let (line, dir_only) = match line.strip_suffix('/') {
            Some(rest) => (rest, true),
            None => (line, false),
        };
        let line = trim_unescaped_spaces(line).replace("\\ ", " ");
        if line.is_empty() || ends_in_odd_backslashes(&line) {
            return Ok(None);
        }

        let parts = line
            .split('/')
            .map(|part| match part {
                "" => Ok(Part::Root),
                "**" => Ok(Part::AnyDirs),
                glob => component_regex(glob).map(Part::Glob),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Self {
            parts,
            negated,
            dir_only,
        }))
    }

    fn matches(&self, path: &str, is_dir: bool) -> Match {
        if self.dir_only && !is_dir {
            return Match::NoMatch;
        }
        let segments: Vec<&str> = path.split('/').collect();
        if !match_parts(&self.parts, false, Some(&segments)) {
            Match::NoMatch
        } else if self.negated {
            Match::Include
        } else {
            Match::Ignore
        }
    }
}

/// Matches pattern parts against path segments from the right.
///
/// Without a `Root` part a pattern may match any suffix of the path, so a
/// bare name matches at every depth. `anchored` stands for an implicit
/// `Root` in front of `parts`, which `**` introduces.
fn match_parts(parts: &[Part], anchored: bool, path: Option<&[&str]>) -> bool {
    let Some((last, rest)) = parts.split_last() else {
        return !anchored || path.is_some_and(<[&str]>::is_empty);
    };
    let Some(segments) = path else {
        return false;
    };

    if let Part::AnyDirs = last {
        let anchored = anchored || !matches!(rest.first(), Some(Part::Root));
        return (0..=segments.len()).any(|n| match_parts(rest, anchored, Some(&segments[..n])));
    }

    let (segment, remaining) = match segments.split_last() {
        Some((segment, remaining)) => (*segment, Some(remaining)),
        None => ("", None),
    };
    let matched = match last {
        Part::Root => segment.is_empty(),
        Part::Glob(re) => re.is_match(segment),
        Part::AnyDirs => false,
    };
    matched && match_parts(rest, anchored, remaining)
}

/// Translates one fnmatch-style component into an anchored regex.
fn component_regex(part: &str) -> Result<Regex, IgnoreError> {
    let mut out = String::from("^(?:");
    let mut chars = part.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' {
                        class.push_str("\\\\");
                    } else {
                        class.push(c);
                    }
                }
                if closed {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    out.push_str("\\[");
                    out.push_str(&regex::escape(&class));
                }
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push_str(")$");
    Regex::new(&out).map_err(|e| IgnoreError::Pattern {
        pattern: part.to_owned(),
        source: e,
    })
}

fn trim_unescaped_spaces(line: &str) -> String {
    let mut end = line.len();
    let bytes = line.as_bytes();
    while end > 0 && bytes[end - 1] == b' ' {
        let backslashes = bytes[..end - 1]
            .iter()
            .rev()
            .take_while(|b| **b == b'\\')
            .count();
        if backslashes % 2 == 1 {
            break;
        }
        end -= 1;
    }
    line[..end].to_owned()
}

fn ends_in_odd_backslashes(line: &str) -> bool {
    line.bytes().rev().take_while(|b| *b == b'\\').count() % 2 == 1
}

/// Decides which paths under a source directory are uploaded.
#[derive(Debug, Default)]
pub struct FileChooser {
    patterns: Vec<Pattern>,
}

impl FileChooser {
    /// Rules from `text`; `#!include:` directives resolve against `dir`.
    pub fn parse(text: &str, dir: Option<&Path>) -> Result<Self, IgnoreError> {
        Self::parse_with_depth(text, dir, 1)
    }

    fn parse_with_depth(text: &str, dir: Option<&Path>, depth: u8) -> Result<Self, IgnoreError> {
        let mut patterns = Vec::new();
        for line in text.lines() {
            if let Some(comment) = line.strip_prefix('#') {
                if let Some(file) = comment.trim_start().strip_prefix(INCLUDE_DIRECTIVE) {
                    patterns.extend(Self::included(file.trim(), dir, depth)?);
                }
                continue;
            }
            if let Some(pattern) = Pattern::parse(line)? {
                patterns.push(pattern);
            }
        }
        Ok(Self { patterns })
    }

    fn included(file: &str, dir: Option<&Path>, depth: u8) -> Result<Vec<Pattern>, IgnoreError> {
        if file.contains('/') {
            return Err(IgnoreError::IncludeOutsideDirectory {
                file: file.to_owned(),
            });
        }
        let Some(dir) = dir else {
            return Ok(Vec::new());
        };
        if depth == 0 {
            tracing::debug!(file, "not following nested include directive");
            return Ok(Vec::new());
        }
        let path = dir.join(file);
        let text = std::fs::read_to_string(&path).map_err(|e| IgnoreError::Read {
            path: path.clone(),
            source: e,
        })?;
        Ok(Self::parse_with_depth(&text, Some(dir), depth - 1)?.patterns)
    }

    /// Rules for `source_dir`: its `.gcloudignore`, or the defaults
    /// (plus `.gitignore` when one exists).
    pub fn for_dir(source_dir: &Path) -> Result<Self, IgnoreError> {
        let path = source_dir.join(IGNORE_FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "using ignore file");
                Self::parse(&text, Some(source_dir))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut text = DEFAULT_IGNORE_FILE.to_owned();
                if source_dir.join(".gitignore").is_file() {
                    text.push_str("#!include:.gitignore\n");
                }
                Self::parse(&text, Some(source_dir))
            }
            Err(e) => Err(IgnoreError::Read { path, source: e }),
        }
    }

    /// Whether `path` (relative, `/`-separated) is uploaded.
    pub fn is_included(&self, path: &str, is_dir: bool) -> bool {
        let prefixes: Vec<&str> = path
            .match_indices('/')
            .map(|(i, _)| &path[..i])
            .chain(std::iter::once(path))
            .collect();
        let mut state = vec![Match::NoMatch; prefixes.len()];

        for pattern in &self.patterns {
            let mut parent = Match::NoMatch;
            for (i, prefix) in prefixes.iter().enumerate() {
                let found = if parent != Match::NoMatch {
                    parent
                } else {
                    let prefix_is_dir = i + 1 < prefixes.len() || is_dir;
                    pattern.matches(prefix, prefix_is_dir)
                };
                if found != Match::NoMatch {
                    state[i] = found;
                }
                parent = if state[i] == Match::Ignore {
                    Match::Ignore
                } else {
                    found
                };
            }
        }

        state.last() != Some(&Match::Ignore)
    }

    /// Included regular files under `root`, as sorted `/`-separated
    /// relative paths. Ignored directories are not descended into.
    pub fn included_files(&self, root: &Path) -> Result<Vec<String>, IgnoreError> {
        let mut files = Vec::new();
        self.walk(root, "", &mut files)?;
        files.sort();
        Ok(files)
    }

    fn walk(&self, dir: &Path, rel: &str, files: &mut Vec<String>) -> Result<(), IgnoreError> {
        let entries = std::fs::read_dir(dir).map_err(|e| IgnoreError::Read {
            path: dir.to_path_buf(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| IgnoreError::Read {
                path: dir.to_path_buf(),
                source: e,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = if rel.is_empty() {
                name
            } else {
                format!("{rel}/{name}")
            };
            let file_type = entry.file_type().map_err(|e| IgnoreError::Read {
                path: entry.path(),
                source: e,
            })?;
            if file_type.is_dir() {
                if self.is_included(&path, true) {
                    self.walk(&entry.path(), &path, files)?;
                }
            } else if self.is_included(&path, false) {
                files.push(path);
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IgnoreError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid ignore pattern [{pattern}]")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("may only include files in the same directory: [{file}]")]
    IncludeOutsideDirectory { file: String },
}

impl IgnoreError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::Read { .. } => appdeploy_core::ErrorKind::Source,
            Self::Pattern { .. } | Self::IncludeOutsideDirectory { .. } => {
                appdeploy_core::ErrorKind::UserInput
            }
        }
    }
}
