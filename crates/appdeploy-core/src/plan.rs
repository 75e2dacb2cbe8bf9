//! Build plans and the strategy that selects registered builders.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Canonical container recipe file name.
pub const RECIPE_FILE: &str = "Dockerfile";

/// Canonical multi-step build-script file name.
pub const SCRIPT_FILE: &str = "cloudbuild.yaml";

/// Runtime name marking a user-provided build.
pub const CUSTOM_RUNTIME: &str = "custom";

/// Runtimes that use registered builders under [`BuilderStrategy::WhenWhitelistedGa`].
const GA_WHITELIST: &[&str] = &[
    "aspnetcore",
    "php",
    "nodejs",
    "ruby",
    "java",
    "(python|python-.+)",
    "(go|go1\\..+)",
    "gs://.*",
];

/// Additional runtimes for [`BuilderStrategy::WhenWhitelistedBeta`].
const BETA_ONLY_WHITELIST: &[&str] = &["(aspnetcore|php|nodejs|ruby|java)-.+"];

static GA_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(GA_WHITELIST));

static BETA_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[GA_WHITELIST, BETA_ONLY_WHITELIST].concat()));

/// Anchors each entry so it matches the whole runtime name.
fn compile(entries: &[&str]) -> Vec<Regex> {
    entries
        .iter()
        .filter_map(|e| match Regex::new(&format!("^(?:{e})$")) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                tracing::warn!(
                    entry = *e,
                    error = %err,
                    "ignoring invalid runtime whitelist entry"
                );
                None
            }
        })
        .collect()
}

/// When a canned runtime is handed to a registered builder instead of a
/// synthesized recipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuilderStrategy {
    Never,
    #[serde(rename = "whitelisted-beta")]
    WhenWhitelistedBeta,
    #[default]
    #[serde(rename = "whitelisted-ga")]
    WhenWhitelistedGa,
    Always,
}

impl BuilderStrategy {
    /// Whether `runtime` should be built by a registered builder.
    pub fn should_use_builder(self, runtime: &str) -> bool {
        if runtime == CUSTOM_RUNTIME {
            return false;
        }
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::WhenWhitelistedGa => GA_PATTERNS.iter().any(|re| re.is_match(runtime)),
            Self::WhenWhitelistedBeta => BETA_PATTERNS.iter().any(|re| re.is_match(runtime)),
        }
    }
}

impl fmt::Display for BuilderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Never => "never",
            Self::WhenWhitelistedBeta => "whitelisted-beta",
            Self::WhenWhitelistedGa => "whitelisted-ga",
            Self::Always => "always",
        };
        f.write_str(name)
    }
}

/// How the image for one deploy is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPlan {
    /// No image is produced.
    NoBuild,
    /// A container recipe in the source tree.
    UserRecipeOnly { recipe_path: String },
    /// A multi-step build script in the source tree.
    UserBuildScript { script_path: String },
    /// Recipe and ignore files generated for a canned runtime.
    SyntheticRecipe { generated: BTreeMap<String, Vec<u8>> },
    /// A remote template keyed by runtime name.
    RegisteredBuilder {
        builder_ref: String,
        substitutions: BTreeMap<String, String>,
    },
}

impl BuildPlan {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoBuild => "no-build",
            Self::UserRecipeOnly { .. } => "user-recipe",
            Self::UserBuildScript { .. } => "user-build-script",
            Self::SyntheticRecipe { .. } => "synthetic-recipe",
            Self::RegisteredBuilder { .. } => "registered-builder",
        }
    }

    /// Files that must be added to the uploaded source for this plan.
    pub fn generated_files(&self) -> Option<&BTreeMap<String, Vec<u8>>> {
        match self {
            Self::SyntheticRecipe { generated } => Some(generated),
            _ => None,
        }
    }
}
