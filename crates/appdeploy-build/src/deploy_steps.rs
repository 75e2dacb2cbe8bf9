//! Steps that roll the built image out to a cluster.
//!
//! Three steps run after the image build: `Prepare deploy` expands
//! Kubernetes configs for the image, `Save configs` copies them to the
//! staging bucket, and `Apply deploy` applies them to the cluster.

use appdeploy_core::{BuildStep, BuildTimeout, StagingDir};

pub const PREPARE_STEP_ID: &str = "Prepare deploy";
pub const SAVE_CONFIGS_STEP_ID: &str = "Save configs";
pub const APPLY_STEP_ID: &str = "Apply deploy";

/// Substitution holding `gs://{staging}/config`.
pub const OUTPUT_BUCKET_SUBSTITUTION: &str = "_OUTPUT_BUCKET_PATH";

pub const DEPLOY_TAGS: &[&str] = &["app-deploy", "app-deploy-cli"];

const GSUTIL_BUILDER: &str = "gcr.io/cloud-builders/gsutil";

const SAVE_CONFIGS_SCRIPT: &str = r#"set -e

gsutil cp -r output/suggested ${_OUTPUT_BUCKET_PATH}/$BUILD_ID/suggested
echo "Copied suggested base configs to ${_OUTPUT_BUCKET_PATH}/$BUILD_ID/suggested"
gsutil cp -r output/expanded ${_OUTPUT_BUCKET_PATH}/$BUILD_ID/expanded
echo "Copied expanded configs to ${_OUTPUT_BUCKET_PATH}/$BUILD_ID/expanded"
"#;

/// Cluster the image is deployed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    pub cluster: String,
    pub location: String,
    pub namespace: String,
    pub expose: Option<u16>,
    pub app_name: Option<String>,
    pub app_version: Option<String>,
    /// Builder image running `prepare` and `apply`.
    pub builder: String,
}

impl DeployTarget {
    /// Steps deploying `image`, in execution order.
    pub fn steps(&self, image: &str, timeout: Option<&BuildTimeout>) -> Vec<BuildStep> {
        let mut prepare = vec![
            "prepare".to_owned(),
            format!("--image={image}"),
            format!("--namespace={}", self.namespace),
            "--output=output".to_owned(),
            "--annotation=gcb-build-id=$BUILD_ID".to_owned(),
            format!("--app={}", self.app(image)),
        ];
        if let Some(version) = self.version(image) {
            prepare.push(format!("--version={version}"));
        }
        if let Some(port) = self.expose {
            prepare.push(format!("--expose={port}"));
        }

        let mut apply = vec![
            "apply".to_owned(),
            "--filename=output/expanded".to_owned(),
            format!("--namespace={}", self.namespace),
            format!("--cluster={}", self.cluster),
            format!("--location={}", self.location),
        ];
        if let Some(timeout) = timeout {
            apply.push(format!("--timeout={timeout}"));
        }

        vec![
            BuildStep::new(&self.builder)
                .with_id(PREPARE_STEP_ID)
                .with_args(prepare),
            BuildStep::new(GSUTIL_BUILDER)
                .with_id(SAVE_CONFIGS_STEP_ID)
                .with_entrypoint("sh")
                .with_args(["-c", SAVE_CONFIGS_SCRIPT]),
            BuildStep::new(&self.builder)
                .with_id(APPLY_STEP_ID)
                .with_args(apply),
        ]
    }

    /// Tags attached to deploy builds.
    pub fn tags(&self) -> Vec<String> {
        DEPLOY_TAGS
            .iter()
            .map(|t| (*t).to_owned())
            .chain(self.app_name.clone())
            .collect()
    }

    fn app(&self, image: &str) -> String {
        if let Some(name) = &self.app_name {
            return name.clone();
        }
        let last = image_basename(image);
        match last.split_once('@') {
            Some((name, _)) => name.to_owned(),
            None => last.split(':').next().unwrap_or(last).to_owned(),
        }
    }

    fn version(&self, image: &str) -> Option<String> {
        if let Some(version) = &self.app_version {
            return Some(version.clone());
        }
        let last = image_basename(image);
        if last.contains('@') {
            return None;
        }
        last.split_once(':').map(|(_, tag)| tag.to_owned())
    }
}

fn image_basename(image: &str) -> &str {
    image.rsplit('/').next().unwrap_or(image)
}

/// `gs://{staging}/config`, the value of `_OUTPUT_BUCKET_PATH`.
pub fn output_bucket_path(staging: &StagingDir) -> String {
    staging.config_uri()
}

/// Where the expanded configs of build `build_id` are saved.
pub fn expanded_configs_uri(output_bucket_path: &str, build_id: &str) -> String {
    format!("{output_bucket_path}/{build_id}/expanded")
}

pub fn suggested_configs_uri(output_bucket_path: &str, build_id: &str) -> String {
    format!("{output_bucket_path}/{build_id}/suggested")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DeployTarget {
        DeployTarget {
            cluster: "my-cluster".to_owned(),
            location: "us-central1-b".to_owned(),
            namespace: "default".to_owned(),
            expose: None,
            app_name: None,
            app_version: None,
            builder: "gcr.io/cloud-builders/gke-deploy:stable".to_owned(),
        }
    }

    #[test]
    fn steps_in_order() {
        let steps = target().steps("gcr.io/p/app:v1", None);
        let ids: Vec<_> = steps.iter().map(|s| s.id.as_deref().unwrap()).collect();
        assert_eq!(ids, [PREPARE_STEP_ID, SAVE_CONFIGS_STEP_ID, APPLY_STEP_ID]);
        assert_eq!(
            steps[0].args,
            [
                "prepare",
                "--image=gcr.io/p/app:v1",
                "--namespace=default",
                "--output=output",
                "--annotation=gcb-build-id=$BUILD_ID",
                "--app=app",
                "--version=v1",
            ]
        );
        assert_eq!(steps[1].entrypoint.as_deref(), Some("sh"));
        assert!(steps[1].args[1].contains("${_OUTPUT_BUCKET_PATH}/$BUILD_ID/expanded"));
        assert_eq!(
            steps[2].args,
            [
                "apply",
                "--filename=output/expanded",
                "--namespace=default",
                "--cluster=my-cluster",
                "--location=us-central1-b",
            ]
        );
    }

    #[test]
    fn digest_image_has_no_default_version() {
        let steps = target().steps("gcr.io/p/app@sha256:abc", None);
        assert!(steps[0].args.contains(&"--app=app".to_owned()));
        assert!(!steps[0].args.iter().any(|a| a.starts_with("--version")));
    }

    #[test]
    fn explicit_names_expose_and_timeout() {
        let mut t = target();
        t.app_name = Some("web".to_owned());
        t.app_version = Some("2".to_owned());
        t.expose = Some(8080);
        let timeout = BuildTimeout::parse("1m2s").unwrap();

        let steps = t.steps("gcr.io/p/app:v1", Some(&timeout));

        assert!(steps[0].args.contains(&"--app=web".to_owned()));
        assert!(steps[0].args.contains(&"--version=2".to_owned()));
        assert_eq!(steps[0].args.last().unwrap(), "--expose=8080");
        assert_eq!(steps[2].args.last().unwrap(), "--timeout=62s");
        assert_eq!(t.tags(), ["app-deploy", "app-deploy-cli", "web"]);
    }

    #[test]
    fn expanded_configs_location() {
        let staging = StagingDir::parse("gs://bucket/stage").unwrap();
        let path = output_bucket_path(&staging);
        assert_eq!(path, "gs://bucket/stage/config");
        assert_eq!(
            expanded_configs_uri(&path, "build-1"),
            "gs://bucket/stage/config/build-1/expanded"
        );
    }
}
