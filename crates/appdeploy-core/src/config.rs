use serde::{Deserialize, Serialize};

use crate::plan::BuilderStrategy;

/// File name looked up in the source (or working) directory.
pub const CONFIG_FILE: &str = "appdeploy.toml";

/// appdeploy.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub submit: SubmitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// GCP project ID (falls back to `gcloud config get-value project`)
    pub gcp_project_id: Option<String>,
    /// Region used for regional resources (defaults to us-central1)
    #[serde(default = "default_region")]
    pub region: String,
    /// Hostname the application is served under
    /// (defaults to `{project}.appspot.com`)
    pub app_hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// When to hand canned runtimes to a registered builder
    #[serde(default)]
    pub builder_strategy: BuilderStrategy,
    /// Root holding `runtimes.yaml` and the per-runtime build files
    #[serde(default = "default_runtime_builders_root")]
    pub runtime_builders_root: String,
    /// Registry host for generated image names
    #[serde(default = "default_registry_domain")]
    pub registry_domain: String,
    /// Builder image that runs `docker build`
    #[serde(default = "default_docker_builder")]
    pub docker_builder: String,
    /// Builder image that prepares and applies Kubernetes configs
    #[serde(default = "default_deploy_builder")]
    pub deploy_builder: String,
    /// Generate `source-context.json` for local git sources
    #[serde(default = "default_true")]
    pub source_context: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitConfig {
    /// First back-off interval of the polling loop
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,
    /// Upper bound of the polling back-off
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
    /// Attempts for requests failing with a transport error
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            gcp_project_id: None,
            region: default_region(),
            app_hostname: None,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            builder_strategy: BuilderStrategy::default(),
            runtime_builders_root: default_runtime_builders_root(),
            registry_domain: default_registry_domain(),
            docker_builder: default_docker_builder(),
            deploy_builder: default_deploy_builder(),
            source_context: true,
        }
    }
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            poll_initial_ms: default_poll_initial_ms(),
            poll_max_ms: default_poll_max_ms(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl DeployConfig {
    /// Load from appdeploy.toml in the given directory, or return defaults if not found.
    pub fn load(dir: &std::path::Path) -> crate::Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })
        } else {
            Ok(Self::default())
        }
    }
}

fn default_region() -> String {
    "us-central1".to_owned()
}

fn default_runtime_builders_root() -> String {
    "gs://runtime-builders/".to_owned()
}

fn default_registry_domain() -> String {
    "gcr.io".to_owned()
}

fn default_docker_builder() -> String {
    "gcr.io/cloud-builders/docker".to_owned()
}

fn default_deploy_builder() -> String {
    "gcr.io/cloud-builders/gke-deploy:stable".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_poll_initial_ms() -> u64 {
    500
}

fn default_poll_max_ms() -> u64 {
    5000
}

fn default_retry_attempts() -> u32 {
    3
}
