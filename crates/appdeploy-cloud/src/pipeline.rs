//! The deploy pipeline: inspect, plan, stage, request, submit, report.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use appdeploy_build::deploy_steps::output_bucket_path;
use appdeploy_build::ignore::{FileChooser, IgnoreError};
use appdeploy_build::recipe::{DescriptorLocation, RecipeError, locate_descriptor};
use appdeploy_build::script::{ScriptError, read_script};
use appdeploy_build::source_context::{self, SourceContextError};
use appdeploy_build::{
    BuildPlanner, BuildRequestBuilder, BuilderError, DeployTarget, GitProbe,
    PlanError, RequestError, RequestInputs,
};
use appdeploy_core::descriptor::{DEFAULT_DESCRIPTOR, DEFAULT_SERVICE};
use appdeploy_core::image::{derive_service_name, derive_version};
use appdeploy_core::outcome::app_hostname;
use appdeploy_core::{
    BuildPlan, BuildTimeout, DeployContext, DeployOutcome, Error, ImageNamer, RevisionProbe,
    ServiceDescriptor, SourceHandle,
};
use tokio::sync::watch;

use crate::builders::BuilderResolver;
use crate::cloudbuild::BuildService;
use crate::retry::RetryPolicy;
use crate::storage::BlobStore;
use crate::submitter::{BuildSubmitter, PollInterval, SubmitError, SubmitMode, WaitOutcome};
use crate::uploader::{SourceUploader, StagedSource, StagingTarget, UploadError};

/// How the deployed image is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChoice {
    /// Deploy this image without building.
    Prebuilt(String),
    /// Build and push under this name.
    Tag(String),
    /// Build under a name derived from the service and version.
    Default,
}

/// Per-invocation inputs, already validated by the caller.
#[derive(Debug, Clone)]
pub struct DeployInputs {
    pub source: Option<SourceHandle>,
    /// Descriptor file that must exist; `None` deploys an implicit
    /// custom service.
    pub descriptor: Option<PathBuf>,
    pub image: ImageChoice,
    pub app_name: Option<String>,
    pub app_version: Option<String>,
    pub timeout: Option<BuildTimeout>,
    pub deploy: Option<DeployTarget>,
    pub mode: SubmitMode,
}

pub struct DeployPipeline<'a, S: BlobStore, B: BuildService> {
    ctx: &'a DeployContext,
    store: &'a S,
    builds: &'a B,
    probe: &'a dyn RevisionProbe,
    retry: RetryPolicy,
    poll: PollInterval,
}

impl<'a, S: BlobStore, B: BuildService> DeployPipeline<'a, S, B> {
    pub fn new(
        ctx: &'a DeployContext,
        store: &'a S,
        builds: &'a B,
        probe: &'a dyn RevisionProbe,
    ) -> Self {
        Self {
            ctx,
            store,
            builds,
            probe,
            retry: RetryPolicy::default(),
            poll: PollInterval::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll(mut self, poll: PollInterval) -> Self {
        self.poll = poll;
        self
    }

    /// Run one deploy. User-facing progress lines and the build log go to
    /// `sink`; setting `cancel` stops log streaming.
    pub async fn run<W: Write>(
        &self,
        inputs: &DeployInputs,
        sink: &mut W,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<DeployOutcome, PipelineError> {
        let ctx = self.ctx;
        let source = inputs.source.as_ref();
        let source_dir = source.and_then(SourceHandle::local_dir);

        // ── Inspect ──
        let descriptor = match &inputs.descriptor {
            Some(path) => Some(ServiceDescriptor::load(path)?),
            None => None,
        };

        // ── Image ──
        let (image, version) = match &inputs.image {
            ImageChoice::Prebuilt(image) => {
                (ImageNamer::prebuilt(image)?, inputs.app_version.clone())
            }
            ImageChoice::Tag(tag) => (ImageNamer::tag(tag)?, inputs.app_version.clone()),
            ImageChoice::Default => {
                let source = require_source(source)?;
                let service = derive_service_name(inputs.app_name.as_deref(), source)?;
                let version = derive_version(inputs.app_version.as_deref(), source, self.probe)?;
                let image =
                    ImageNamer::name(&ctx.registry_domain, &ctx.project_id, &service, &version);
                (image, Some(version))
            }
        };
        let mut outcome = DeployOutcome::with_image(Some(image.clone()));
        tracing::debug!(image = %image, "selected image");

        // ── Plan ──
        let files = match source_dir {
            Some(dir) => FileChooser::for_dir(dir)?.included_files(dir)?,
            None => Vec::new(),
        };
        let location = match (source_dir, &descriptor) {
            (Some(dir), Some(d)) => locate_descriptor(&d.descriptor_path, dir)?,
            _ => DescriptorLocation::default_path(),
        };
        let plan = match (&inputs.image, source) {
            (ImageChoice::Prebuilt(_), _) => BuildPlan::NoBuild,
            (_, source) => {
                let source = require_source(source)?;
                let inspected = match &descriptor {
                    Some(d) => d.clone(),
                    None => implicit_descriptor(source_dir),
                };
                let listing: BTreeSet<String> = files.iter().cloned().collect();
                BuildPlanner::new(ctx.strategy).plan(
                    &inspected,
                    source,
                    source_dir.map(|_| &listing),
                    &location.yaml_path,
                )?
            }
        };

        // ── Generated files ──
        let mut generated: BTreeMap<String, Vec<u8>> =
            plan.generated_files().cloned().unwrap_or_default();
        if !matches!(plan, BuildPlan::NoBuild) {
            if let Some((name, contents)) = &location.generated {
                generated.insert(name.clone(), contents.clone());
            }
            if let Some(dir) = source_dir.filter(|_| ctx.source_context) {
                match source_context::generate(dir, &GitProbe) {
                    Ok((name, contents)) => {
                        generated.insert(name, contents);
                    }
                    Err(SourceContextError::NotARepository) => {
                        tracing::debug!(dir = %dir.display(), "no source context outside git");
                    }
                    Err(e) => {
                        let warning = source_context::warning(&e);
                        tracing::warn!("{warning}");
                        outcome.warn(warning);
                    }
                }
            }
        }

        // ── Build definition ──
        let builder = match &plan {
            BuildPlan::RegisteredBuilder { builder_ref, .. } => {
                let resolver =
                    BuilderResolver::new(self.store, &ctx.runtime_builders_root, self.retry);
                let reference = resolver.resolve(builder_ref).await?;
                reference.warn_if_deprecated();
                if let Some(message) = &reference.deprecation_message {
                    outcome.warn(message.clone());
                }
                let contents = resolver.fetch_build_file(&reference).await?;
                Some((reference, contents))
            }
            _ => None,
        };
        let script = match (&plan, source_dir) {
            (BuildPlan::UserBuildScript { script_path }, Some(dir)) => {
                Some(read_script(&dir.join(script_path))?)
            }
            _ => None,
        };

        // ── Stage ──
        let staged = match (&plan, source) {
            (BuildPlan::NoBuild, _) | (_, None) => None,
            (_, Some(source)) => {
                let target = StagingTarget {
                    project: &ctx.project_id,
                    staging: &ctx.staging,
                    stamp: &ctx.stamp,
                };
                let staged = SourceUploader::new(self.store, self.retry)
                    .upload(source, &files, &generated, target)
                    .await?;
                if source_dir.is_some() {
                    outcome.uploaded_generated_files = generated;
                }
                Some(staged)
            }
        };

        // ── Request ──
        let request = BuildRequestBuilder::new(&ctx.docker_builder).build(
            &plan,
            RequestInputs {
                source: staged.as_ref().map(StagedSource::to_request_source),
                logs_bucket: staged.as_ref().and_then(StagedSource::bucket).map(str::to_owned),
                image: &image,
                timeout: inputs.timeout.clone(),
                yaml_path: &location.yaml_path,
                script: script.as_deref(),
                builder: builder
                    .as_ref()
                    .map(|(reference, contents)| (reference, contents.as_str())),
                deploy: inputs.deploy.as_ref(),
                output_bucket_path: inputs
                    .deploy
                    .as_ref()
                    .map(|_| output_bucket_path(&ctx.staging)),
            },
        )?;

        // ── Submit ──
        if let Some(request) = request {
            let submitter = BuildSubmitter::new(self.builds, self.retry, self.poll);
            let operation = submitter
                .submit(&ctx.project_id, &ctx.region, &request)
                .await?;
            let written = match &operation.logs_url {
                Some(url) => writeln!(sink, "Logs are available at [{url}]."),
                None => writeln!(sink, "Logs are available in the Cloud Console."),
            };
            written.map_err(|e| PipelineError::Output { source: e })?;
            outcome.operation = Some(operation.clone());

            if inputs.mode == SubmitMode::Stream {
                match submitter.wait(&operation, &request, sink, cancel).await? {
                    WaitOutcome::Finished(record) => {
                        tracing::debug!(build = %record.id, "deploy build finished");
                    }
                    WaitOutcome::Cancelled => {
                        tracing::debug!(build = %operation.id, "left build running");
                    }
                }
            }
        }

        // ── Report ──
        if let Some(descriptor) = &descriptor {
            let hostname = app_hostname(
                &ctx.app_hostname,
                Some(&descriptor.name),
                version.as_deref(),
                descriptor.ssl,
                inputs.deploy.is_some(),
            );
            outcome.set_hostname(hostname);
        }

        Ok(outcome)
    }
}

fn require_source(source: Option<&SourceHandle>) -> Result<&SourceHandle, Error> {
    source.ok_or_else(|| Error::InvalidArgument {
        message: "A SOURCE is required to build an image.".to_owned(),
    })
}

fn implicit_descriptor(source_dir: Option<&Path>) -> ServiceDescriptor {
    let path = source_dir
        .map(|dir| dir.join(DEFAULT_DESCRIPTOR))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DESCRIPTOR));
    ServiceDescriptor::implicit(DEFAULT_SERVICE, &path)
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] Error),

    #[error(transparent)]
    Ignore(#[from] IgnoreError),

    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("failed to write output")]
    Output { source: std::io::Error },
}

impl PipelineError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::Input(e) => e.kind(),
            Self::Ignore(e) => e.kind(),
            Self::Recipe(e) => e.kind(),
            Self::Plan(e) => e.kind(),
            Self::Builder(e) => e.kind(),
            Self::Script(e) => e.kind(),
            Self::Upload(e) => e.kind(),
            Self::Request(e) => e.kind(),
            Self::Submit(e) => e.kind(),
            Self::Output { .. } => appdeploy_core::ErrorKind::Environment,
        }
    }

    /// Whether the failure stems from how the command was invoked.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Input(e) if e.is_usage())
    }
}
