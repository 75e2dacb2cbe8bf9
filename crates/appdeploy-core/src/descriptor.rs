//! Service descriptor parsing and classification.
//!
//! The descriptor is the per-service YAML file (`app.yaml` by default).
//! Only the fields that drive the build are modelled; everything else in
//! the file is ignored.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Descriptor file name used when `--config` is not given.
pub const DEFAULT_DESCRIPTOR: &str = "app.yaml";

/// Service name used when the descriptor does not name one.
pub const DEFAULT_SERVICE: &str = "default";

/// Runtime name the legacy `vm: true` flag rewrites to.
pub const VM_RUNTIME: &str = "vm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Standard,
    Flex,
    Vm,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standard => "standard",
            Self::Flex => "flex",
            Self::Vm => "vm",
        };
        f.write_str(name)
    }
}

/// Scheme the service is reachable under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslPolicy {
    #[default]
    Http,
    HttpOrHttps,
    Https,
}

/// Raw on-disk shape of the descriptor.
#[derive(Debug, Default, Deserialize)]
struct DescriptorFile {
    service: Option<String>,
    module: Option<String>,
    runtime: Option<String>,
    env: Option<serde_yaml::Value>,
    #[serde(default)]
    vm: bool,
    #[serde(default)]
    handlers: Vec<HandlerFile>,
}

#[derive(Debug, Deserialize)]
struct HandlerFile {
    secure: Option<String>,
}

/// The user's service configuration, classified for the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub runtime: String,
    pub environment: Environment,
    pub requires_image: bool,
    /// Location of the descriptor file on disk.
    pub descriptor_path: PathBuf,
    /// Runtime declared before the legacy `vm: true` rewrite.
    pub original_runtime: Option<String>,
    pub ssl: SslPolicy,
}

impl ServiceDescriptor {
    /// Read and classify the descriptor at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::DescriptorLoad {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    /// Classify descriptor `content` read from `path`.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let file: DescriptorFile =
            serde_yaml::from_str(content).map_err(|e| Error::DescriptorParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        inspect(file, path)
    }

    /// Descriptor for a source tree that ships no descriptor file:
    /// a flexible-environment service built from the user's own recipe.
    pub fn implicit(name: &str, path: &Path) -> Self {
        Self {
            name: name.to_owned(),
            runtime: crate::plan::CUSTOM_RUNTIME.to_owned(),
            environment: Environment::Flex,
            requires_image: true,
            descriptor_path: path.to_path_buf(),
            original_runtime: None,
            ssl: SslPolicy::Http,
        }
    }

    /// Runtime the build decision is made on.
    ///
    /// For legacy `vm: true` descriptors this is the runtime the user wrote,
    /// not the `vm` placeholder.
    pub fn effective_runtime(&self) -> &str {
        match (&self.original_runtime, self.runtime.as_str()) {
            (Some(original), VM_RUNTIME) => original,
            _ => &self.runtime,
        }
    }

    pub fn is_default_service(&self) -> bool {
        self.name == DEFAULT_SERVICE
    }
}

fn inspect(file: DescriptorFile, path: &Path) -> Result<ServiceDescriptor> {
    let invalid = |reason: String| Error::DescriptorInvalid {
        path: path.to_path_buf(),
        reason,
    };

    let mut runtime = file
        .runtime
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| invalid("missing required field [runtime]".to_owned()))?;

    let name = file
        .service
        .or(file.module)
        .unwrap_or_else(|| DEFAULT_SERVICE.to_owned());

    let explicit = match &file.env {
        Some(value) => Some(parse_environment(value).ok_or_else(|| {
            invalid(format!(
                "unsupported value for [env]: {}",
                yaml_scalar(value)
            ))
        })?),
        None => None,
    };

    let mut original_runtime = None;
    let environment = match explicit {
        Some(env) => env,
        None if file.vm => {
            original_runtime = Some(std::mem::replace(&mut runtime, VM_RUNTIME.to_owned()));
            Environment::Vm
        }
        None => Environment::Standard,
    };

    let requires_image =
        matches!(environment, Environment::Flex | Environment::Vm) || runtime == VM_RUNTIME;

    let ssl = file
        .handlers
        .iter()
        .find_map(|h| match h.secure.as_deref() {
            Some("always") => Some(SslPolicy::Https),
            Some("optional") => Some(SslPolicy::HttpOrHttps),
            _ => None,
        })
        .unwrap_or_default();

    tracing::debug!(
        service = %name,
        runtime = %runtime,
        environment = %environment,
        requires_image,
        "inspected service descriptor"
    );

    Ok(ServiceDescriptor {
        name,
        runtime,
        environment,
        requires_image,
        descriptor_path: path.to_path_buf(),
        original_runtime,
        ssl,
    })
}

fn parse_environment(value: &serde_yaml::Value) -> Option<Environment> {
    match yaml_scalar(value).as_str() {
        "flex" | "flexible" | "2" => Some(Environment::Flex),
        "standard" | "1" => Some(Environment::Standard),
        _ => None,
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> ServiceDescriptor {
        ServiceDescriptor::parse(yaml, Path::new("app.yaml")).unwrap()
    }

    #[test]
    fn flex_requires_image() {
        let d = parse("runtime: python27\nenv: flex\nservice: api\n");
        assert_eq!(d.environment, Environment::Flex);
        assert_eq!(d.name, "api");
        assert!(d.requires_image);
    }

    #[test]
    fn numeric_env_is_accepted() {
        let d = parse("runtime: go\nenv: 2\n");
        assert_eq!(d.environment, Environment::Flex);
    }

    #[test]
    fn standard_does_not_require_image() {
        let d = parse("runtime: python27\n");
        assert_eq!(d.environment, Environment::Standard);
        assert!(!d.requires_image);
        assert_eq!(d.name, DEFAULT_SERVICE);
    }

    #[test]
    fn legacy_vm_flag_rewrites_runtime() {
        let d = parse("runtime: ruby\nvm: true\nmodule: worker\n");
        assert_eq!(d.environment, Environment::Vm);
        assert_eq!(d.runtime, "vm");
        assert_eq!(d.original_runtime.as_deref(), Some("ruby"));
        assert_eq!(d.effective_runtime(), "ruby");
        assert_eq!(d.name, "worker");
        assert!(d.requires_image);
    }

    #[test]
    fn explicit_env_wins_over_vm_flag() {
        let d = parse("runtime: ruby\nvm: true\nenv: flex\n");
        assert_eq!(d.environment, Environment::Flex);
        assert_eq!(d.runtime, "ruby");
        assert!(d.original_runtime.is_none());
    }

    #[test]
    fn runtime_vm_requires_image_even_on_standard() {
        let d = parse("runtime: vm\nenv: standard\n");
        assert!(d.requires_image);
    }

    #[test]
    fn missing_runtime_is_rejected() {
        let err = ServiceDescriptor::parse("service: x\n", Path::new("app.yaml")).unwrap_err();
        assert!(err.to_string().contains("runtime"));
    }

    #[test]
    fn unknown_env_is_rejected() {
        let err =
            ServiceDescriptor::parse("runtime: go\nenv: lunar\n", Path::new("app.yaml")).unwrap_err();
        assert!(err.to_string().contains("lunar"));
    }

    #[test]
    fn first_secure_handler_sets_ssl_policy() {
        let d = parse(
            "runtime: go\nenv: flex\nhandlers:\n- url: /a\n- url: /b\n  secure: always\n- url: /c\n  secure: optional\n",
        );
        assert_eq!(d.ssl, SslPolicy::Https);

        let d = parse("runtime: go\nenv: flex\nhandlers:\n- url: /\n  secure: optional\n");
        assert_eq!(d.ssl, SslPolicy::HttpOrHttps);

        let d = parse("runtime: go\nenv: flex\n");
        assert_eq!(d.ssl, SslPolicy::Http);
    }
}
