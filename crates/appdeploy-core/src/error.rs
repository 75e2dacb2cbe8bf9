use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification shared by every appdeploy error type.
///
/// The CLI maps kinds (and a few specific variants) to exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserInput,
    Source,
    PlanConflict,
    Environment,
    BuildFailed,
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UserInput => "user input",
            Self::Source => "source",
            Self::PlanConflict => "plan conflict",
            Self::Environment => "environment",
            Self::BuildFailed => "build failed",
            Self::Transport => "transport",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    // ── Service descriptor ──
    #[error("failed to read service descriptor {path}")]
    DescriptorLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse service descriptor {path}")]
    DescriptorParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid service descriptor {path}: {reason}")]
    DescriptorInvalid { path: PathBuf, reason: String },

    // ── Source ──
    #[error("could not find source [{path}]")]
    SourceNotFound { path: String },

    #[error("invalid source [{path}]: {reason}")]
    InvalidSource { path: String, reason: String },

    #[error("permission denied reading source [{path}]")]
    PermissionDenied {
        path: String,
        source: std::io::Error,
    },

    // ── Image naming ──
    #[error("Image value must be in the gcr.io/* or *.gcr.io/* namespace: [{image}]")]
    InvalidImage { image: String },

    #[error("Tag value must be in the gcr.io/* or *.gcr.io/* namespace: [{tag}]")]
    InvalidTag { tag: String },

    #[error("cannot parse image name [{name}]: {reason}")]
    MalformedImageName { name: String, reason: &'static str },

    #[error("invalid app name [{name}]: must be a DNS label of at most 63 characters")]
    InvalidAppName { name: String },

    #[error(
        "No default container image name available. Provide an app name with --app-name, or provide a valid --tag."
    )]
    NoDefaultName,

    #[error("{reason}")]
    NoDefaultVersion { reason: String },

    // ── Flag values ──
    #[error("Invalid value for [--expose]: port number is invalid")]
    InvalidPort { value: String },

    #[error("invalid timeout [{value}]: expected seconds or a duration such as 60s, 2m, 1h30m")]
    InvalidTimeout { value: String },

    #[error("invalid staging directory [{value}]: {reason}")]
    InvalidStagingDir { value: String, reason: &'static str },

    #[error("{message}")]
    InvalidArgument { message: String },

    // ── Build plan conflicts ──
    #[error(
        "A custom runtime must have exactly one of [Dockerfile] and [cloudbuild.yaml] in the source directory; [{dir}] contains both"
    )]
    AmbiguousCustom { dir: String },

    #[error(
        "You must provide your own Dockerfile when using a custom runtime. Otherwise provide a \"runtime\" field with one of the supported runtimes."
    )]
    MissingRecipe,

    #[error(
        "There is a Dockerfile in the current directory, and the runtime field in {descriptor} is currently set to [runtime: {runtime}]. To use your Dockerfile to build a custom runtime, set the runtime field to [runtime: custom]. To continue using the [{runtime}] runtime, please remove the Dockerfile from this directory."
    )]
    RecipeNotAllowed { descriptor: String, runtime: String },

    #[error(
        "There is a cloudbuild.yaml in the current directory, and the runtime field in {descriptor} is currently set to [runtime: {runtime}]. To use your cloudbuild.yaml to build a custom runtime, set the runtime field to [runtime: custom]. To continue using the [{runtime}] runtime, please remove the cloudbuild.yaml from this directory."
    )]
    ScriptNotAllowed { descriptor: String, runtime: String },

    // ── Build request ──
    #[error("invalid build request: {reason}")]
    InvalidRequest { reason: &'static str },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigLoad { .. }
            | Self::ConfigParse { .. }
            | Self::DescriptorLoad { .. }
            | Self::DescriptorParse { .. }
            | Self::DescriptorInvalid { .. }
            | Self::InvalidImage { .. }
            | Self::InvalidTag { .. }
            | Self::MalformedImageName { .. }
            | Self::InvalidAppName { .. }
            | Self::InvalidPort { .. }
            | Self::InvalidTimeout { .. }
            | Self::InvalidStagingDir { .. }
            | Self::InvalidArgument { .. }
            | Self::InvalidRequest { .. } => ErrorKind::UserInput,
            Self::SourceNotFound { .. } | Self::InvalidSource { .. } => ErrorKind::Source,
            Self::PermissionDenied { .. } => ErrorKind::Environment,
            Self::NoDefaultName
            | Self::NoDefaultVersion { .. }
            | Self::AmbiguousCustom { .. }
            | Self::MissingRecipe
            | Self::RecipeNotAllowed { .. }
            | Self::ScriptNotAllowed { .. } => ErrorKind::PlanConflict,
        }
    }

    /// Whether this error is a usage error (bad flag value or combination).
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::InvalidAppName { .. }
                | Self::InvalidPort { .. }
                | Self::InvalidTimeout { .. }
                | Self::InvalidStagingDir { .. }
                | Self::InvalidArgument { .. }
        )
    }
}
