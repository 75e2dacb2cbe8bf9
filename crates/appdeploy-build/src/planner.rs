//! Build plan selection.
//!
//! The decision is a pure function of the descriptor, the strategy, and
//! which of the two well-known build files the source ships:
//!
//! | image? | runtime | Dockerfile | cloudbuild.yaml | builder? | plan |
//! |--------|---------|------------|-----------------|----------|------|
//! | no     | any     | any        | any             |          | `NoBuild` |
//! | yes    | custom  | yes        | no              |          | `UserRecipeOnly` |
//! | yes    | custom  | no         | yes             |          | `UserBuildScript` |
//! | yes    | custom  | no         | no              |          | `MissingRecipe` |
//! | yes    | custom  | yes        | yes             |          | `AmbiguousCustom` |
//! | yes    | canned  | yes        | any             |          | `RecipeNotAllowed` |
//! | yes    | canned  | no         | yes             |          | `ScriptNotAllowed` |
//! | yes    | canned  | no         | no              | yes      | `RegisteredBuilder` |
//! | yes    | canned  | no         | no              | no       | `SyntheticRecipe` |

use std::collections::{BTreeMap, BTreeSet};

use appdeploy_core::plan::{CUSTOM_RUNTIME, RECIPE_FILE, SCRIPT_FILE};
use appdeploy_core::{BuildPlan, BuilderStrategy, Error, ServiceDescriptor, SourceHandle};

use crate::recipe::{RecipeError, RecipeGenerator};

/// Substitution naming the descriptor path inside the build.
pub const YAML_PATH_SUBSTITUTION: &str = "_GAE_APPLICATION_YAML_PATH";

/// Substitution naming the output image.
pub const OUTPUT_IMAGE_SUBSTITUTION: &str = "_OUTPUT_IMAGE";

pub struct BuildPlanner {
    strategy: BuilderStrategy,
}

impl BuildPlanner {
    pub fn new(strategy: BuilderStrategy) -> Self {
        Self { strategy }
    }

    /// Decide how `descriptor` is built from `source`.
    ///
    /// `source_files` lists paths relative to the source root; `None` means
    /// the contents are not known locally (remote sources), in which case a
    /// custom runtime is assumed to ship its own recipe.
    /// `yaml_path` is where the build finds the descriptor.
    pub fn plan(
        &self,
        descriptor: &ServiceDescriptor,
        source: &SourceHandle,
        source_files: Option<&BTreeSet<String>>,
        yaml_path: &str,
    ) -> Result<BuildPlan, PlanError> {
        if !descriptor.requires_image {
            return Ok(BuildPlan::NoBuild);
        }

        let runtime = descriptor.effective_runtime();
        let (has_recipe, has_script) = match source_files {
            Some(files) => (files.contains(RECIPE_FILE), files.contains(SCRIPT_FILE)),
            None => (runtime == CUSTOM_RUNTIME, false),
        };

        let plan = if runtime == CUSTOM_RUNTIME {
            match (has_recipe, has_script) {
                (true, false) => BuildPlan::UserRecipeOnly {
                    recipe_path: RECIPE_FILE.to_owned(),
                },
                (false, true) => BuildPlan::UserBuildScript {
                    script_path: SCRIPT_FILE.to_owned(),
                },
                (false, false) => return Err(Error::MissingRecipe.into()),
                (true, true) => {
                    return Err(Error::AmbiguousCustom {
                        dir: source.to_string(),
                    }
                    .into());
                }
            }
        } else if has_recipe {
            return Err(Error::RecipeNotAllowed {
                descriptor: descriptor_name(descriptor),
                runtime: runtime.to_owned(),
            }
            .into());
        } else if has_script {
            return Err(Error::ScriptNotAllowed {
                descriptor: descriptor_name(descriptor),
                runtime: runtime.to_owned(),
            }
            .into());
        } else if self.strategy.should_use_builder(runtime) {
            let mut substitutions = BTreeMap::new();
            substitutions.insert(YAML_PATH_SUBSTITUTION.to_owned(), yaml_path.to_owned());
            BuildPlan::RegisteredBuilder {
                builder_ref: runtime.to_owned(),
                substitutions,
            }
        } else {
            BuildPlan::SyntheticRecipe {
                generated: RecipeGenerator::new(runtime).render()?,
            }
        };

        tracing::debug!(
            plan = plan.name(),
            runtime = %runtime,
            strategy = %self.strategy,
            "selected build plan"
        );
        Ok(plan)
    }
}

fn descriptor_name(descriptor: &ServiceDescriptor) -> String {
    descriptor
        .descriptor_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| descriptor.descriptor_path.display().to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Conflict(#[from] Error),
    #[error(transparent)]
    Recipe(#[from] RecipeError),
}

impl PlanError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::Conflict(e) => e.kind(),
            Self::Recipe(e) => e.kind(),
        }
    }
}
