//! Build request assembly.

use std::collections::BTreeMap;

use appdeploy_core::request::Source;
use appdeploy_core::{BuildPlan, BuildRequest, BuildStep, BuildTimeout, SubstitutionPolicy};

use crate::deploy_steps::{DeployTarget, OUTPUT_BUCKET_SUBSTITUTION};
use crate::planner::{OUTPUT_IMAGE_SUBSTITUTION, YAML_PATH_SUBSTITUTION};
use crate::runtime_builders::{BuilderError, BuilderReference};
use crate::script::{ScriptError, parse_script};

const YAML_PATH_ENV: &str = "GAE_APPLICATION_YAML_PATH";

pub const BUILD_STEP_ID: &str = "Build";
pub const PUSH_STEP_ID: &str = "Push";

/// Everything besides the plan that goes into a request.
#[derive(Debug, Default)]
pub struct RequestInputs<'a> {
    /// Staged source, absent for deploy-only requests.
    pub source: Option<Source>,
    /// Bucket holding the staged source; receives build logs.
    pub logs_bucket: Option<String>,
    pub image: &'a str,
    pub timeout: Option<BuildTimeout>,
    /// Value of `_GAE_APPLICATION_YAML_PATH`.
    pub yaml_path: &'a str,
    /// Contents of the user's build script (`UserBuildScript`).
    pub script: Option<&'a str>,
    /// Registered builder and its fetched build file (`RegisteredBuilder`).
    pub builder: Option<(&'a BuilderReference, &'a str)>,
    pub deploy: Option<&'a DeployTarget>,
    /// `gs://{staging}/config` for deploy builds.
    pub output_bucket_path: Option<String>,
}

pub struct BuildRequestBuilder<'a> {
    docker_builder: &'a str,
}

impl<'a> BuildRequestBuilder<'a> {
    pub fn new(docker_builder: &'a str) -> Self {
        Self { docker_builder }
    }

    /// Request for `plan`, or `None` when nothing needs to run remotely.
    ///
    /// A `RegisteredBuilder` plan without a fetched build file yields a
    /// request that names the builder and carries no steps.
    pub fn build(
        &self,
        plan: &BuildPlan,
        inputs: RequestInputs<'_>,
    ) -> Result<Option<BuildRequest>, RequestError> {
        let mut request = match plan {
            BuildPlan::NoBuild => {
                if inputs.deploy.is_none() {
                    return Ok(None);
                }
                BuildRequest::default()
            }
            BuildPlan::UserRecipeOnly { .. } | BuildPlan::SyntheticRecipe { .. } => {
                let mut steps = vec![
                    BuildStep::new(self.docker_builder).with_args([
                        "build",
                        "-t",
                        inputs.image,
                        ".",
                    ]),
                ];
                if inputs.deploy.is_some() {
                    steps[0].id = Some(BUILD_STEP_ID.to_owned());
                    steps.push(
                        BuildStep::new(self.docker_builder)
                            .with_id(PUSH_STEP_ID)
                            .with_args(["push", inputs.image]),
                    );
                }
                BuildRequest {
                    steps,
                    images: vec![inputs.image.to_owned()],
                    ..BuildRequest::default()
                }
            }
            BuildPlan::UserBuildScript { script_path } => {
                let contents = inputs.script.ok_or(RequestError::MissingDefinition {
                    plan: plan.name(),
                })?;
                let params = image_substitutions(inputs.image, inputs.yaml_path);
                let mut request = parse_script(contents, script_path, &params)?;
                for step in &mut request.steps {
                    step.env
                        .push(format!("{YAML_PATH_ENV}=${{{YAML_PATH_SUBSTITUTION}}}"));
                }
                request.images = vec![inputs.image.to_owned()];
                request.set_substitution_policy(SubstitutionPolicy::AllowLoose);
                request
            }
            BuildPlan::RegisteredBuilder {
                builder_ref,
                substitutions,
            } => {
                let mut params = substitutions.clone();
                params.extend(image_substitutions(inputs.image, inputs.yaml_path));
                let mut request = match inputs.builder {
                    Some((reference, contents)) => reference.load_build(contents, &params)?,
                    None => BuildRequest {
                        substitutions: params,
                        builder_ref: Some(builder_ref.clone()),
                        ..BuildRequest::default()
                    },
                };
                request.images = vec![inputs.image.to_owned()];
                request.set_substitution_policy(SubstitutionPolicy::AllowLoose);
                request
            }
        };

        request.source = inputs.source;
        request.logs_bucket = inputs.logs_bucket;
        request.timeout = inputs.timeout.as_ref().map(ToString::to_string);

        if let Some(target) = inputs.deploy {
            request
                .steps
                .extend(target.steps(inputs.image, inputs.timeout.as_ref()));
            request.tags.extend(target.tags());
            if let Some(path) = inputs.output_bucket_path {
                request
                    .substitutions
                    .insert(OUTPUT_BUCKET_SUBSTITUTION.to_owned(), path);
            }
            request.set_substitution_policy(SubstitutionPolicy::AllowLoose);
        }

        request.validate().map_err(|e| RequestError::Invalid { source: e })?;
        tracing::debug!(
            plan = plan.name(),
            steps = request.steps.len(),
            substitutions = request.substitutions.len(),
            "assembled build request"
        );
        Ok(Some(request))
    }
}

fn image_substitutions(image: &str, yaml_path: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OUTPUT_IMAGE_SUBSTITUTION.to_owned(), image.to_owned()),
        (YAML_PATH_SUBSTITUTION.to_owned(), yaml_path.to_owned()),
    ])
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("no build definition was supplied for a {plan} plan")]
    MissingDefinition { plan: &'static str },
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error("assembled build request is invalid")]
    Invalid { source: appdeploy_core::Error },
}

impl RequestError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::Script(e) => e.kind(),
            Self::Builder(e) => e.kind(),
            Self::MissingDefinition { .. } | Self::Invalid { .. } => {
                appdeploy_core::ErrorKind::PlanConflict
            }
        }
    }
}
