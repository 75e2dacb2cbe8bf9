//! Core types and configuration for appdeploy.
//!
//! This crate defines the `appdeploy.toml` schema ([`DeployConfig`]), the
//! deploy data model (sources, descriptors, plans, requests, operations,
//! outcomes), the pure decisions made on it, and shared error types.

pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod image;
pub mod operation;
pub mod outcome;
pub mod plan;
pub mod request;
pub mod source;
pub mod staging;
pub mod timeout;

pub use config::{BuildConfig, DeployConfig, ProjectConfig, SubmitConfig};
pub use context::DeployContext;
pub use descriptor::{Environment, ServiceDescriptor, SslPolicy};
pub use error::{Error, ErrorKind, Result};
pub use image::{ImageNamer, ImageRef, RepoState, RevisionProbe};
pub use operation::{BuildOperation, BuildRecord, BuildStatus, Operation};
pub use outcome::{DeployOutcome, Hostname};
pub use plan::{BuildPlan, BuilderStrategy};
pub use request::{BuildRequest, BuildStep, SubstitutionPolicy};
pub use source::{BlobRef, SourceHandle, SourceResolver};
pub use staging::{StagingDir, StagingStamp};
pub use timeout::BuildTimeout;
