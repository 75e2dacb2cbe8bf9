//! Build planning, recipe generation, and build request assembly for appdeploy.
//!
//! # Deploy pipeline
//!
//! ```text
//! appdeploy deploy
//!   1. Plan       ── BuildPlanner::plan() over the descriptor and source files
//!   2. Recipe     ── RecipeGenerator::render() for canned runtimes
//!   3. Archive    ── .gcloudignore rules → reproducible .tgz with generated files
//!   4. Request    ── BuildRequestBuilder::build() (+ deploy steps for a cluster)
//! ```
//!
//! # Plans
//!
//! - **UserRecipeOnly / SyntheticRecipe**: one `docker build -t IMAGE .` step
//! - **UserBuildScript**: the steps of the source's `cloudbuild.yaml`
//! - **RegisteredBuilder**: steps from the runtime's registered build file
//! - **NoBuild**: no request, unless a cluster deploy is requested

pub mod archive;
pub mod deploy_steps;
pub mod git;
pub mod ignore;
pub mod planner;
pub mod recipe;
pub mod request_builder;
pub mod runtime_builders;
pub mod script;
pub mod source_context;

pub use deploy_steps::DeployTarget;
pub use git::GitProbe;
pub use planner::{BuildPlanner, PlanError};
pub use recipe::RecipeGenerator;
pub use request_builder::{BuildRequestBuilder, RequestError, RequestInputs};
pub use runtime_builders::{BuilderError, BuilderReference, Manifest};
