//! Per-deploy settings resolved from configuration and flags.

use crate::config::DeployConfig;
use crate::image::split_project;
use crate::outcome::DEFAULT_DOMAIN;
use crate::plan::BuilderStrategy;
use crate::staging::{StagingDir, StagingStamp};

/// Everything a deploy needs to know about where it runs.
///
/// Populated once by the CLI layer and passed to each component.
#[derive(Debug, Clone)]
pub struct DeployContext {
    pub project_id: String,
    pub region: String,
    pub registry_domain: String,
    /// Default hostname of the application (`{app}.appspot.com`).
    pub app_hostname: String,
    pub staging: StagingDir,
    pub strategy: BuilderStrategy,
    pub runtime_builders_root: String,
    pub docker_builder: String,
    pub deploy_builder: String,
    pub source_context: bool,
    /// Timestamp and id used to name the staged source object.
    pub stamp: StagingStamp,
}

impl DeployContext {
    /// Context for `project_id` with settings from `config`, a fresh staging
    /// stamp and the default staging directory.
    pub fn new(project_id: &str, config: &DeployConfig) -> Self {
        let app_hostname = config
            .project
            .app_hostname
            .clone()
            .unwrap_or_else(|| default_app_hostname(project_id));
        Self {
            project_id: project_id.to_owned(),
            region: config.project.region.clone(),
            registry_domain: config.build.registry_domain.clone(),
            app_hostname,
            staging: StagingDir::default_for(project_id),
            strategy: config.build.builder_strategy,
            runtime_builders_root: config.build.runtime_builders_root.clone(),
            docker_builder: config.build.docker_builder.clone(),
            deploy_builder: config.build.deploy_builder.clone(),
            source_context: config.build.source_context,
            stamp: StagingStamp::now(),
        }
    }

    pub fn with_staging(mut self, staging: StagingDir) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_stamp(mut self, stamp: StagingStamp) -> Self {
        self.stamp = stamp;
        self
    }

    pub fn with_strategy(mut self, strategy: BuilderStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// `{id}.appspot.com`, or `{id}.{domain}.appspot.com` for domain-scoped projects.
pub fn default_app_hostname(project_id: &str) -> String {
    match split_project(project_id) {
        (id, Some(domain)) => format!("{id}.{domain}.{DEFAULT_DOMAIN}"),
        (id, None) => format!("{id}.{DEFAULT_DOMAIN}"),
    }
}
