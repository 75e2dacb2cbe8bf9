//! Container recipes synthesized for canned runtimes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use appdeploy_core::descriptor::DEFAULT_DESCRIPTOR;
use appdeploy_core::plan::RECIPE_FILE;
use sha2::{Digest, Sha256};

/// Ignore file emitted next to the generated recipe.
pub const IGNORE_FILE: &str = ".dockerignore";

/// Generates the container recipe and ignore file for a canned runtime.
pub struct RecipeGenerator<'a> {
    runtime: &'a str,
}

impl<'a> RecipeGenerator<'a> {
    pub fn new(runtime: &'a str) -> Self {
        Self { runtime }
    }

    /// Whether a template exists for this runtime.
    pub fn supports(&self) -> bool {
        self.template().is_some()
    }

    /// Recipe and ignore file keyed by their path in the uploaded source.
    pub fn render(&self) -> Result<BTreeMap<String, Vec<u8>>, RecipeError> {
        let template = self.template().ok_or_else(|| RecipeError::UnsupportedRuntime {
            runtime: self.runtime.to_owned(),
        })?;

        let mut ignore = String::from(".dockerignore\nDockerfile\n.git\n.hg\n.svn\n");
        for extra in template.ignore {
            ignore.push_str(extra);
            ignore.push('\n');
        }

        let mut files = BTreeMap::new();
        files.insert(RECIPE_FILE.to_owned(), template.recipe.as_bytes().to_vec());
        files.insert(IGNORE_FILE.to_owned(), ignore.into_bytes());
        tracing::debug!(runtime = %self.runtime, "rendered synthetic recipe");
        Ok(files)
    }

    fn template(&self) -> Option<&'static Template> {
        TEMPLATES
            .iter()
            .find(|(name, _)| *name == self.runtime)
            .map(|(_, t)| t)
    }
}

struct Template {
    recipe: &'static str,
    ignore: &'static [&'static str],
}

const TEMPLATES: &[(&str, Template)] = &[
    (
        "python27",
        Template {
            recipe: r#"FROM gcr.io/google-appengine/python
LABEL python_version=python2.7
RUN virtualenv --no-download /env -p python2.7

ENV VIRTUAL_ENV /env
ENV PATH /env/bin:$PATH

ADD requirements.txt /app/
RUN pip install -r requirements.txt
ADD . /app/

CMD exec gunicorn -b :$PORT main:app
"#,
            ignore: &["*.pyc", "*.pyo", "env", "__pycache__"],
        },
    ),
    (
        "python",
        Template {
            recipe: r#"FROM gcr.io/google-appengine/python
RUN virtualenv --no-download /env -p python3

ENV VIRTUAL_ENV /env
ENV PATH /env/bin:$PATH

ADD requirements.txt /app/
RUN pip install -r requirements.txt
ADD . /app/

CMD exec gunicorn -b :$PORT main:app
"#,
            ignore: &["*.pyc", "*.pyo", "env", "__pycache__"],
        },
    ),
    (
        "go",
        Template {
            recipe: r#"FROM gcr.io/google-appengine/golang

COPY . /go/src/app
RUN go-wrapper install -tags appenginevm
"#,
            ignore: &[],
        },
    ),
    (
        "ruby",
        Template {
            recipe: r#"FROM gcr.io/google-appengine/ruby

COPY . /app/
RUN bundle install --deployment && rbenv rehash

ENTRYPOINT bundle exec rackup -p $PORT
"#,
            ignore: &[".bundle", "log", "tmp"],
        },
    ),
    (
        "nodejs",
        Template {
            recipe: r#"FROM gcr.io/google-appengine/nodejs

COPY . /app/
RUN npm install --unsafe-perm || \
  ((if [ -f npm-debug.log ]; then \
      cat npm-debug.log; \
    fi) && false)

CMD npm start
"#,
            ignore: &["node_modules"],
        },
    ),
];

// ── Descriptor location ──

/// How the build finds the service descriptor inside the uploaded source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorLocation {
    /// Value of `_GAE_APPLICATION_YAML_PATH`.
    pub yaml_path: String,
    /// Copy of a descriptor kept outside the source, uploaded with it.
    pub generated: Option<(String, Vec<u8>)>,
}

impl DescriptorLocation {
    pub fn default_path() -> Self {
        Self {
            yaml_path: DEFAULT_DESCRIPTOR.to_owned(),
            generated: None,
        }
    }
}

/// Locate `descriptor` relative to `source_dir`.
///
/// A descriptor inside the source is referenced by its source-relative
/// path. One outside the source is copied in as `_app_{sha256}.yaml`.
pub fn locate_descriptor(
    descriptor: &Path,
    source_dir: &Path,
) -> Result<DescriptorLocation, RecipeError> {
    let source = canonical(source_dir)?;
    let file = canonical(descriptor)?;

    if let Ok(relative) = file.strip_prefix(&source) {
        let yaml_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        return Ok(DescriptorLocation {
            yaml_path,
            generated: None,
        });
    }

    let contents = std::fs::read(&file).map_err(|e| RecipeError::ReadDescriptor {
        path: file.clone(),
        source: e,
    })?;
    let name = hashed_descriptor_name(&contents);
    tracing::debug!(
        descriptor = %file.display(),
        generated = %name,
        "descriptor lives outside the source; staging a copy"
    );
    Ok(DescriptorLocation {
        yaml_path: name.clone(),
        generated: Some((name, contents)),
    })
}

/// `_app_{sha256 hex}.yaml`
pub fn hashed_descriptor_name(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    format!("_app_{}.yaml", hex::encode(hasher.finalize()))
}

fn canonical(path: &Path) -> Result<PathBuf, RecipeError> {
    path.canonicalize().map_err(|e| RecipeError::Resolve {
        path: path.to_path_buf(),
        source: e,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("no container recipe template for runtime [{runtime}]; provide a Dockerfile and set [runtime: custom]")]
    UnsupportedRuntime { runtime: String },
    #[error("failed to resolve path {path}")]
    Resolve {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read service descriptor {path}")]
    ReadDescriptor {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl RecipeError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::UnsupportedRuntime { .. } => appdeploy_core::ErrorKind::PlanConflict,
            Self::Resolve { .. } | Self::ReadDescriptor { .. } => appdeploy_core::ErrorKind::Source,
        }
    }
}
