use std::path::{Path, PathBuf};

use anyhow::Context;
use appdeploy_build::DeployTarget;
use appdeploy_build::GitProbe;
use appdeploy_build::deploy_steps::{
    expanded_configs_uri, output_bucket_path, suggested_configs_uri,
};
use appdeploy_cloud::{
    AuthorizedClient, CloudBuildService, DeployInputs, DeployPipeline, GcloudClient, GcsStore,
    ImageChoice, PollInterval, RetryPolicy, SubmitMode,
};
use appdeploy_core::descriptor::DEFAULT_DESCRIPTOR;
use appdeploy_core::image::is_dns_label;
use appdeploy_core::{
    BuildTimeout, DeployConfig, DeployContext, DeployOutcome, Error, ImageNamer, SourceHandle,
    SourceResolver, StagingDir,
};
use clap::ArgGroup;
use tokio::sync::watch;

#[derive(clap::Args, Debug, Default)]
#[command(group(ArgGroup::new("docker").args(["image", "tag", "tag_default"])))]
pub struct DeployArgs {
    /// Source to build: a local directory or archive, a gs:// object, or a
    /// repository URL
    pub source: Option<String>,

    /// Existing container image to deploy without building
    #[arg(long)]
    pub image: Option<String>,

    /// Tag of the image to build (gcr.io/* or *.gcr.io/*)
    #[arg(long)]
    pub tag: Option<String>,

    /// Build under a tag derived from the service name and version
    #[arg(long)]
    pub tag_default: bool,

    /// Service name used in the image and the deployed objects
    #[arg(long)]
    pub app_name: Option<String>,

    /// Version used in the image and the deployed objects
    #[arg(long)]
    pub app_version: Option<String>,

    /// Region the build runs in (overrides appdeploy.toml)
    #[arg(long)]
    pub region: Option<String>,

    /// Namespace of the target cluster
    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Name of the target cluster
    #[arg(long)]
    pub cluster: Option<String>,

    /// Region or zone of the target cluster
    #[arg(long)]
    pub location: Option<String>,

    /// Service descriptor, relative to SOURCE (default: app.yaml)
    #[arg(long)]
    pub config: Option<String>,

    /// Port the deployed application listens on
    #[arg(long)]
    pub expose: Option<String>,

    /// gs://bucket[/prefix] receiving the staged source and configs
    #[arg(long)]
    pub gcs_staging_dir: Option<String>,

    /// Maximum build duration, e.g. 600, 10m or 1h2m3s
    #[arg(long)]
    pub timeout: Option<String>,

    /// Return once the build is submitted instead of streaming its log
    #[arg(long = "async")]
    pub async_: bool,
}

/// Flag values checked before anything is read or uploaded.
#[derive(Debug)]
struct Validated {
    image: ImageChoice,
    timeout: Option<BuildTimeout>,
    staging: Option<StagingDir>,
    expose: Option<u16>,
    cluster: Option<(String, String)>,
}

/// Build SOURCE and deploy it.
pub async fn deploy(args: DeployArgs) -> anyhow::Result<()> {
    let validated = validate(&args)?;

    let cwd = std::env::current_dir().context("failed to read the working directory")?;
    let source = args
        .source
        .as_deref()
        .map(|arg| SourceResolver::resolve(arg, &cwd))
        .transpose()?;
    let source_dir = source.as_ref().and_then(SourceHandle::local_dir);
    let descriptor = find_descriptor(source_dir, args.config.as_deref())?;
    let config = DeployConfig::load(source_dir.unwrap_or(&cwd))?;

    let gcloud = GcloudClient::new();
    let project = match &config.project.gcp_project_id {
        Some(id) => id.clone(),
        None => gcloud.default_project().await?.ok_or_else(|| {
            anyhow::anyhow!(
                "no project set; set [project].gcp_project_id in appdeploy.toml or run: \
                 gcloud config set project PROJECT_ID"
            )
        })?,
    };
    let token = gcloud.access_token().await?;

    let mut ctx = DeployContext::new(&project, &config);
    if let Some(region) = &args.region {
        ctx.region = region.clone();
    }
    if let Some(staging) = validated.staging {
        ctx = ctx.with_staging(staging);
    }

    let deploy = validated
        .cluster
        .map(|(cluster, location)| DeployTarget {
            cluster,
            location,
            namespace: args.namespace.clone(),
            expose: validated.expose,
            app_name: args.app_name.clone(),
            app_version: args.app_version.clone(),
            builder: ctx.deploy_builder.clone(),
        });
    let inputs = DeployInputs {
        source,
        descriptor,
        image: validated.image,
        app_name: args.app_name.clone(),
        app_version: args.app_version.clone(),
        timeout: validated.timeout,
        deploy,
        mode: if args.async_ {
            SubmitMode::Async
        } else {
            SubmitMode::Stream
        },
    };

    let client = AuthorizedClient::new(token)?;
    let store = GcsStore::new(client.clone());
    let builds = CloudBuildService::new(client);

    let (interrupt, mut cancel) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && interrupt.send(true).is_err() {
            tracing::debug!("interrupt arrived after the deploy finished");
        }
    });

    let outcome = DeployPipeline::new(&ctx, &store, &builds, &GitProbe)
        .with_retry(RetryPolicy::from_config(&config.submit))
        .with_poll(PollInterval::from_config(&config.submit))
        .run(&inputs, &mut std::io::stdout(), &mut cancel)
        .await?;

    let detached = args.async_ || *cancel.borrow();
    report(&outcome, &ctx, inputs.deploy.is_some(), detached);
    Ok(())
}

fn validate(args: &DeployArgs) -> Result<Validated, Error> {
    let image = match (&args.image, &args.tag) {
        (Some(image), _) => ImageChoice::Prebuilt(ImageNamer::prebuilt(image)?),
        (None, Some(tag)) => ImageChoice::Tag(ImageNamer::tag(tag)?),
        (None, None) => ImageChoice::Default,
    };

    match (&image, args.source.is_some()) {
        (ImageChoice::Prebuilt(_), true) => {
            return Err(usage(
                "Source must not be provided when no docker builds are required.",
            ));
        }
        (ImageChoice::Tag(_) | ImageChoice::Default, false) => {
            return Err(usage(
                "A SOURCE is required to build the image named by --tag or --tag-default.",
            ));
        }
        _ => {}
    }
    if args.config.is_some() && args.source.is_none() {
        return Err(usage(
            "A SOURCE is required because --config is a relative path in the source directory.",
        ));
    }

    if let Some(name) = args.app_name.as_deref().filter(|n| !is_dns_label(n)) {
        return Err(Error::InvalidAppName {
            name: name.to_owned(),
        });
    }

    let expose = args.expose.as_deref().map(parse_port).transpose()?;
    let timeout = args.timeout.as_deref().map(BuildTimeout::parse).transpose()?;
    let staging = args
        .gcs_staging_dir
        .as_deref()
        .map(StagingDir::parse)
        .transpose()?;

    let cluster = match (&args.cluster, &args.location) {
        (Some(cluster), Some(location)) => Some((cluster.clone(), location.clone())),
        (None, None) => None,
        _ => return Err(usage("--cluster and --location must be given together.")),
    };
    if cluster.is_none() && matches!(image, ImageChoice::Prebuilt(_)) {
        return Err(usage(
            "--image requires --cluster and --location; there is nothing to build.",
        ));
    }

    Ok(Validated {
        image,
        timeout,
        staging,
        expose,
        cluster,
    })
}

fn parse_port(value: &str) -> Result<u16, Error> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::InvalidPort {
            value: value.to_owned(),
        }),
    }
}

fn usage(message: &str) -> Error {
    Error::InvalidArgument {
        message: message.to_owned(),
    }
}

/// Descriptor to inspect: `--config` inside the source directory, or
/// `app.yaml` there when present.
fn find_descriptor(
    source_dir: Option<&Path>,
    config: Option<&str>,
) -> Result<Option<PathBuf>, Error> {
    match (source_dir, config) {
        (Some(dir), Some(config)) => Ok(Some(dir.join(config))),
        (Some(dir), None) => {
            let path = dir.join(DEFAULT_DESCRIPTOR);
            Ok(path.is_file().then_some(path))
        }
        (None, Some(_)) => Err(usage("--config requires a local SOURCE directory.")),
        (None, None) => Ok(None),
    }
}

fn report(outcome: &DeployOutcome, ctx: &DeployContext, deployed: bool, detached: bool) {
    for warning in &outcome.warnings {
        eprintln!("WARNING: {warning}");
    }

    let Some(operation) = &outcome.operation else {
        return;
    };
    if detached {
        println!("Check operation [{}] for status.", operation.id);
        return;
    }

    if deployed {
        let configs = output_bucket_path(&ctx.staging);
        println!();
        println!("Successfully deployed to your Google Kubernetes Engine cluster.");
        println!();
        println!(
            "You can find the configuration files of the deployed Kubernetes objects stored at {}.",
            expanded_configs_uri(&configs, &operation.id)
        );
        println!();
        println!(
            "You can also find suggested base Kubernetes configuration files at {}.",
            suggested_configs_uri(&configs, &operation.id)
        );
    } else if let Some(image) = &outcome.image {
        println!("Create request issued for: [{image}]");
    }

    if let Some(hostname) = &outcome.hostname {
        println!("Service will be served at [{hostname}].");
    }
}
