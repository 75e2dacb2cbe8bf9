//! Remote services for appdeploy: blob staging, build submission, and the
//! deploy pipeline that ties them to the local build plan.
//!
//! Every remote call goes through a narrow trait ([`BlobStore`],
//! [`BuildService`], [`GcloudExecutor`]) so the pipeline can be driven by
//! mocks in tests.

pub mod builders;
pub mod client;
pub mod cloudbuild;
pub mod executor;
pub mod pipeline;
pub mod retry;
pub mod storage;
pub mod submitter;
pub mod transport;
pub mod uploader;

pub use builders::BuilderResolver;
pub use client::{CredentialError, GcloudClient};
pub use cloudbuild::{BuildService, BuildServiceError, CloudBuildService};
pub use executor::{GcloudExecutor, RealExecutor, SdkError};
pub use pipeline::{DeployInputs, DeployPipeline, ImageChoice, PipelineError};
pub use retry::RetryPolicy;
pub use storage::{BlobStore, GcsStore, StorageError};
pub use submitter::{BuildSubmitter, PollInterval, SubmitError, SubmitMode, WaitOutcome};
pub use transport::{AuthorizedClient, TransportError};
pub use uploader::{SourceUploader, StagedSource, StagingTarget, UploadError};
