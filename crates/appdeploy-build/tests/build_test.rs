use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use appdeploy_build::archive::create_archive;
use appdeploy_build::deploy_steps::{DeployTarget, output_bucket_path};
use appdeploy_build::ignore::FileChooser;
use appdeploy_build::recipe::{DescriptorLocation, hashed_descriptor_name, locate_descriptor};
use appdeploy_build::request_builder::{BUILD_STEP_ID, PUSH_STEP_ID};
use appdeploy_build::{BuildPlanner, BuildRequestBuilder, PlanError, RequestInputs};
use appdeploy_core::request::{Source, StorageSource};
use appdeploy_core::{
    BuildPlan, BuildRequest, BuilderStrategy, Error, ServiceDescriptor, SourceHandle, StagingDir,
    StagingStamp, SubstitutionPolicy,
};
use proptest::prelude::*;
use tempfile::TempDir;

const DOCKER: &str = "gcr.io/cloud-builders/docker";
const TARGET: &str = "blah.gcr.io/fakeproject/appengine/foo.1.2:latest";

fn write_descriptor(dir: &Path, contents: &str) -> ServiceDescriptor {
    let path = dir.join("app.yaml");
    std::fs::write(&path, contents).unwrap();
    ServiceDescriptor::load(&path).unwrap()
}

fn source_files(dir: &Path) -> BTreeSet<String> {
    FileChooser::for_dir(dir)
        .unwrap()
        .included_files(dir)
        .unwrap()
        .into_iter()
        .collect()
}

fn storage_source(stamp: &StagingStamp) -> Source {
    let staging = StagingDir::default_for("my-project");
    Source::StorageSource(StorageSource {
        bucket: staging.bucket.clone(),
        object: staging.source_object(stamp, ".tgz"),
        generation: None,
    })
}

fn plan_for(dir: &Path, strategy: BuilderStrategy) -> Result<BuildPlan, PlanError> {
    let descriptor = ServiceDescriptor::load(&dir.join("app.yaml")).unwrap();
    let source = SourceHandle::Local {
        path: dir.to_path_buf(),
    };
    BuildPlanner::new(strategy).plan(&descriptor, &source, Some(&source_files(dir)), "app.yaml")
}

// ── Registered builder ──

#[test]
fn registered_builder_with_default_descriptor() {
    let tmp = TempDir::new().unwrap();
    write_descriptor(tmp.path(), "runtime: python27\nenv: flex\n");
    std::fs::write(tmp.path().join("main.py"), "print('hi')").unwrap();

    let plan = plan_for(tmp.path(), BuilderStrategy::Always).unwrap();
    let location = locate_descriptor(&tmp.path().join("app.yaml"), tmp.path()).unwrap();
    assert_eq!(location, DescriptorLocation::default_path());

    let stamp = StagingStamp::fixed(1_500_000_000, "0123abcd");
    let staging = StagingDir::default_for("my-project");
    let request = BuildRequestBuilder::new(DOCKER)
        .build(
            &plan,
            RequestInputs {
                source: Some(storage_source(&stamp)),
                logs_bucket: Some(staging.bucket.clone()),
                image: TARGET,
                yaml_path: &location.yaml_path,
                ..RequestInputs::default()
            },
        )
        .unwrap()
        .unwrap();

    assert_eq!(request.images, [TARGET]);
    assert!(request.steps.is_empty());
    assert_eq!(request.builder_ref.as_deref(), Some("python27"));
    assert_eq!(
        request.substitutions,
        BTreeMap::from([
            ("_OUTPUT_IMAGE".to_owned(), TARGET.to_owned()),
            ("_GAE_APPLICATION_YAML_PATH".to_owned(), "app.yaml".to_owned()),
        ])
    );
    assert_eq!(
        request.substitution_policy(),
        Some(SubstitutionPolicy::AllowLoose)
    );

    let Some(Source::StorageSource(source)) = &request.source else {
        panic!("expected a storage source");
    };
    assert_eq!(source.bucket, "my-project_cloudbuild");
    assert_eq!(source.object, "deploy/source/1500000000-0123abcd.tgz");
}

// ── User recipe ──

#[test]
fn custom_runtime_with_dockerfile_is_one_docker_step() {
    let tmp = TempDir::new().unwrap();
    write_descriptor(tmp.path(), "runtime: custom\nenv: flex\n");
    std::fs::write(tmp.path().join("Dockerfile"), "FROM scratch\n").unwrap();

    let plan = plan_for(tmp.path(), BuilderStrategy::Always).unwrap();
    assert!(matches!(plan, BuildPlan::UserRecipeOnly { .. }));

    let request = BuildRequestBuilder::new(DOCKER)
        .build(
            &plan,
            RequestInputs {
                image: TARGET,
                yaml_path: "app.yaml",
                ..RequestInputs::default()
            },
        )
        .unwrap()
        .unwrap();

    assert_eq!(request.steps.len(), 1);
    assert_eq!(request.steps[0].name, DOCKER);
    assert_eq!(request.steps[0].args, ["build", "-t", TARGET, "."]);
    assert!(request.substitutions.is_empty());
    assert_eq!(request.substitution_policy(), None);
}

#[test]
fn custom_runtime_with_both_files_is_ambiguous() {
    let tmp = TempDir::new().unwrap();
    write_descriptor(tmp.path(), "runtime: custom\nenv: flex\n");
    std::fs::write(tmp.path().join("Dockerfile"), "FROM scratch\n").unwrap();
    std::fs::write(tmp.path().join("cloudbuild.yaml"), "steps: []\n").unwrap();

    let err = plan_for(tmp.path(), BuilderStrategy::Always).unwrap_err();
    assert!(matches!(
        err,
        PlanError::Conflict(Error::AmbiguousCustom { .. })
    ));
}

#[test]
fn ignored_dockerfile_does_not_count() {
    let tmp = TempDir::new().unwrap();
    write_descriptor(tmp.path(), "runtime: custom\nenv: flex\n");
    std::fs::write(tmp.path().join("Dockerfile"), "FROM scratch\n").unwrap();
    std::fs::write(tmp.path().join("cloudbuild.yaml"), "steps: []\n").unwrap();
    std::fs::write(tmp.path().join(".gcloudignore"), "cloudbuild.yaml\n").unwrap();

    let plan = plan_for(tmp.path(), BuilderStrategy::Always).unwrap();
    assert!(matches!(plan, BuildPlan::UserRecipeOnly { .. }));
}

// ── Descriptor outside the source ──

#[test]
fn descriptor_outside_source_is_staged_under_hashed_name() {
    let tmp = TempDir::new().unwrap();
    let subdir = tmp.path().join("subdir");
    let module = tmp.path().join("module");
    std::fs::create_dir_all(&subdir).unwrap();
    std::fs::create_dir_all(&module).unwrap();
    std::fs::write(subdir.join("bar.yaml"), "yaml contents").unwrap();
    std::fs::write(module.join("main.py"), "print('hi')").unwrap();

    let location = locate_descriptor(&subdir.join("bar.yaml"), &module).unwrap();
    let expected = hashed_descriptor_name(b"yaml contents");
    assert_eq!(location.yaml_path, expected);
    assert_eq!(
        location.generated,
        Some((expected.clone(), b"yaml contents".to_vec()))
    );

    let descriptor =
        ServiceDescriptor::parse("runtime: python27\nenv: flex\n", &subdir.join("bar.yaml"))
            .unwrap();
    let source = SourceHandle::Local {
        path: module.clone(),
    };
    let plan = BuildPlanner::new(BuilderStrategy::Always)
        .plan(
            &descriptor,
            &source,
            Some(&source_files(&module)),
            &location.yaml_path,
        )
        .unwrap();
    let request = BuildRequestBuilder::new(DOCKER)
        .build(
            &plan,
            RequestInputs {
                image: TARGET,
                yaml_path: &location.yaml_path,
                ..RequestInputs::default()
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(
        request.substitutions["_GAE_APPLICATION_YAML_PATH"],
        expected
    );

    let generated: BTreeMap<String, Vec<u8>> = location.generated.into_iter().collect();
    let files: Vec<String> = source_files(&module).into_iter().collect();
    let archive = create_archive(&module, &files, &generated).unwrap();
    assert_eq!(archive.entries, 2);
}

// ── Build script ──

#[test]
fn build_script_keeps_step_order_and_adds_descriptor_env() {
    let tmp = TempDir::new().unwrap();
    write_descriptor(tmp.path(), "runtime: custom\nenv: flex\n");
    let script = r#"
steps:
- name: gcr.io/cloud-builders/docker
  id: first
  args: ['build', '-t', '${_OUTPUT_IMAGE}', '.']
- name: gcr.io/cloud-builders/gsutil
  id: second
  args: 'version'
- name: ubuntu
  id: third
  env: ['GAE_APPLICATION_YAML_PATH=custom.yaml']
"#;
    std::fs::write(tmp.path().join("cloudbuild.yaml"), script).unwrap();

    let plan = plan_for(tmp.path(), BuilderStrategy::Never).unwrap();
    let request = BuildRequestBuilder::new(DOCKER)
        .build(
            &plan,
            RequestInputs {
                image: TARGET,
                yaml_path: "app.yaml",
                script: Some(script),
                ..RequestInputs::default()
            },
        )
        .unwrap()
        .unwrap();

    let ids: Vec<_> = request.steps.iter().filter_map(|s| s.id.as_deref()).collect();
    assert_eq!(ids, ["first", "second", "third"]);
    assert_eq!(request.steps[1].args, ["version"]);
    for step in &request.steps {
        assert!(step.has_env("GAE_APPLICATION_YAML_PATH"), "{step:?}");
    }
    assert_eq!(
        request.steps[0].env,
        ["GAE_APPLICATION_YAML_PATH=${_GAE_APPLICATION_YAML_PATH}"]
    );
    assert_eq!(
        request.steps[2].env,
        [
            "GAE_APPLICATION_YAML_PATH=custom.yaml",
            "GAE_APPLICATION_YAML_PATH=${_GAE_APPLICATION_YAML_PATH}",
        ]
    );
    assert_eq!(request.images, [TARGET]);
    assert_eq!(
        request.substitution_policy(),
        Some(SubstitutionPolicy::AllowLoose)
    );
}

#[test]
fn build_script_plan_without_contents_fails() {
    let plan = BuildPlan::UserBuildScript {
        script_path: "cloudbuild.yaml".to_owned(),
    };
    let err = BuildRequestBuilder::new(DOCKER)
        .build(
            &plan,
            RequestInputs {
                image: TARGET,
                ..RequestInputs::default()
            },
        )
        .unwrap_err();
    assert!(err.to_string().contains("user-build-script"));
}

// ── Cluster deploy ──

fn target() -> DeployTarget {
    DeployTarget {
        cluster: "my-cluster".to_owned(),
        location: "us-east1-b".to_owned(),
        namespace: "default".to_owned(),
        expose: Some(8080),
        app_name: None,
        app_version: None,
        builder: "gcr.io/cloud-builders/gke-deploy:stable".to_owned(),
    }
}

#[test]
fn deploy_target_appends_push_and_deploy_steps() {
    let staging = StagingDir::parse("gs://my-bucket/staging").unwrap();
    let target = target();
    let plan = BuildPlan::UserRecipeOnly {
        recipe_path: "Dockerfile".to_owned(),
    };
    let request = BuildRequestBuilder::new(DOCKER)
        .build(
            &plan,
            RequestInputs {
                image: "gcr.io/p/app:v1",
                yaml_path: "app.yaml",
                deploy: Some(&target),
                output_bucket_path: Some(output_bucket_path(&staging)),
                ..RequestInputs::default()
            },
        )
        .unwrap()
        .unwrap();

    let ids: Vec<_> = request.steps.iter().filter_map(|s| s.id.as_deref()).collect();
    assert_eq!(
        ids,
        [
            BUILD_STEP_ID,
            PUSH_STEP_ID,
            "Prepare deploy",
            "Save configs",
            "Apply deploy"
        ]
    );
    assert_eq!(request.steps[1].args, ["push", "gcr.io/p/app:v1"]);
    assert_eq!(
        request.substitutions["_OUTPUT_BUCKET_PATH"],
        "gs://my-bucket/staging/config"
    );
    assert_eq!(request.tags, ["app-deploy", "app-deploy-cli"]);
    assert_eq!(
        request.substitution_policy(),
        Some(SubstitutionPolicy::AllowLoose)
    );
}

#[test]
fn prebuilt_image_with_deploy_target_is_deploy_only() {
    let target = target();
    let request = BuildRequestBuilder::new(DOCKER)
        .build(
            &BuildPlan::NoBuild,
            RequestInputs {
                image: "gcr.io/p/app:v1",
                deploy: Some(&target),
                output_bucket_path: Some("gs://b/config".to_owned()),
                ..RequestInputs::default()
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(request.steps.len(), 3);
    assert!(request.images.is_empty());
    assert!(request.source.is_none());
}

#[test]
fn no_build_without_target_is_no_request() {
    let request = BuildRequestBuilder::new(DOCKER)
        .build(
            &BuildPlan::NoBuild,
            RequestInputs {
                image: TARGET,
                ..RequestInputs::default()
            },
        )
        .unwrap();
    assert!(request.is_none());
}

// ── Idempotence ──

fn assemble(dir: &Path, stamp: &StagingStamp) -> BuildRequest {
    let plan = plan_for(dir, BuilderStrategy::WhenWhitelistedGa).unwrap();
    let location = locate_descriptor(&dir.join("app.yaml"), dir).unwrap();
    BuildRequestBuilder::new(DOCKER)
        .build(
            &plan,
            RequestInputs {
                source: Some(storage_source(stamp)),
                logs_bucket: Some("my-project_cloudbuild".to_owned()),
                image: TARGET,
                yaml_path: &location.yaml_path,
                ..RequestInputs::default()
            },
        )
        .unwrap()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn same_inputs_give_identical_requests(
        runtime in prop_oneof![Just("python"), Just("go"), Just("nodejs"), Just("python27")],
        timestamp in 0i64..4_000_000_000,
        uuid in "[0-9a-f]{32}",
    ) {
        let tmp = TempDir::new().unwrap();
        write_descriptor(tmp.path(), &format!("runtime: {runtime}\nenv: flex\n"));
        std::fs::write(tmp.path().join("main.txt"), "x").unwrap();
        let stamp = StagingStamp::fixed(timestamp, uuid);

        let first = assemble(tmp.path(), &stamp);
        let second = assemble(tmp.path(), &stamp);

        prop_assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
        prop_assert_eq!(first, second);
    }
}
