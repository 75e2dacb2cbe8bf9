use appdeploy_core::{BuilderStrategy, DeployConfig, Error};
use tempfile::TempDir;

#[test]
fn load_returns_defaults_when_no_config_file() {
    let tmp = TempDir::new().unwrap();
    let config = DeployConfig::load(tmp.path()).unwrap();

    assert!(config.project.gcp_project_id.is_none());
    assert_eq!(config.project.region, "us-central1");
    assert!(config.project.app_hostname.is_none());
    assert_eq!(config.build.builder_strategy, BuilderStrategy::WhenWhitelistedGa);
    assert_eq!(config.build.runtime_builders_root, "gs://runtime-builders/");
    assert_eq!(config.build.registry_domain, "gcr.io");
    assert_eq!(config.build.docker_builder, "gcr.io/cloud-builders/docker");
    assert_eq!(
        config.build.deploy_builder,
        "gcr.io/cloud-builders/gke-deploy:stable"
    );
    assert!(config.build.source_context);
    assert_eq!(config.submit.poll_initial_ms, 500);
    assert_eq!(config.submit.poll_max_ms, 5000);
    assert_eq!(config.submit.retry_attempts, 3);
}

#[test]
fn load_parses_full_config() {
    let tmp = TempDir::new().unwrap();
    let toml = r#"
[project]
gcp_project_id = "my-gcp-project"
region = "asia-northeast1"
app_hostname = "my-app.example.com"

[build]
builder_strategy = "always"
runtime_builders_root = "file:///opt/builders"
registry_domain = "eu.gcr.io"
docker_builder = "gcr.io/my-builders/docker"
deploy_builder = "gcr.io/my-builders/deploy"
source_context = false

[submit]
poll_initial_ms = 100
poll_max_ms = 1000
retry_attempts = 5
"#;
    std::fs::write(tmp.path().join("appdeploy.toml"), toml).unwrap();

    let config = DeployConfig::load(tmp.path()).unwrap();

    assert_eq!(
        config.project.gcp_project_id.as_deref(),
        Some("my-gcp-project")
    );
    assert_eq!(config.project.region, "asia-northeast1");
    assert_eq!(
        config.project.app_hostname.as_deref(),
        Some("my-app.example.com")
    );
    assert_eq!(config.build.builder_strategy, BuilderStrategy::Always);
    assert_eq!(config.build.runtime_builders_root, "file:///opt/builders");
    assert_eq!(config.build.registry_domain, "eu.gcr.io");
    assert_eq!(config.build.docker_builder, "gcr.io/my-builders/docker");
    assert_eq!(config.build.deploy_builder, "gcr.io/my-builders/deploy");
    assert!(!config.build.source_context);
    assert_eq!(config.submit.poll_initial_ms, 100);
    assert_eq!(config.submit.poll_max_ms, 1000);
    assert_eq!(config.submit.retry_attempts, 5);
}

#[test]
fn load_partial_config_keeps_defaults() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("appdeploy.toml"),
        "[build]\nbuilder_strategy = \"never\"\n",
    )
    .unwrap();

    let config = DeployConfig::load(tmp.path()).unwrap();

    assert_eq!(config.build.builder_strategy, BuilderStrategy::Never);
    assert_eq!(config.build.registry_domain, "gcr.io");
    assert_eq!(config.project.region, "us-central1");
}

#[test]
fn load_rejects_malformed_toml() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("appdeploy.toml"), "[build\n").unwrap();

    let err = DeployConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, Error::ConfigParse { .. }));
}

#[test]
fn load_rejects_unknown_strategy() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("appdeploy.toml"),
        "[build]\nbuilder_strategy = \"sometimes\"\n",
    )
    .unwrap();

    assert!(DeployConfig::load(tmp.path()).is_err());
}
