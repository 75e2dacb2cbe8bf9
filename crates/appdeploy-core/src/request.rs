//! The build request submitted to the remote builder.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Builder image for a step, with its arguments and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wait_for: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl BuildStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    /// Whether any env entry sets `key`.
    pub fn has_env(&self, key: &str) -> bool {
        self.env
            .iter()
            .any(|e| e.split_once('=').is_some_and(|(k, _)| k == key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSource {
    pub bucket: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    StorageSource(StorageSource),
    GitSource(GitSource),
}

/// How unmatched substitutions are treated by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubstitutionPolicy {
    #[serde(rename = "MUST_MATCH")]
    Strict,
    #[serde(rename = "ALLOW_LOOSE")]
    AllowLoose,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substitution_option: Option<SubstitutionPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<BuildStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_bucket: Option<String>,
    /// Seconds with a trailing `s`, e.g. `"62s"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub substitutions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BuildOptions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Registered builder that supplied the steps, if any.
    #[serde(skip)]
    pub builder_ref: Option<String>,
}

impl BuildRequest {
    pub fn substitution_policy(&self) -> Option<SubstitutionPolicy> {
        self.options.as_ref().and_then(|o| o.substitution_option)
    }

    pub fn set_substitution_policy(&mut self, policy: SubstitutionPolicy) {
        self.options
            .get_or_insert_with(BuildOptions::default)
            .substitution_option = Some(policy);
    }

    /// Structural checks before submission.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() && self.builder_ref.as_deref().is_none_or(str::is_empty) {
            return Err(Error::InvalidRequest {
                reason: "a request without steps needs a registered builder",
            });
        }
        if self.substitutions.keys().any(|k| !k.starts_with('_')) {
            return Err(Error::InvalidRequest {
                reason: "substitution keys must start with '_'",
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_wire_shape() {
        let mut request = BuildRequest {
            steps: vec![BuildStep::new("gcr.io/cloud-builders/docker").with_args(["build", "."])],
            images: vec!["gcr.io/p/img".to_owned()],
            source: Some(Source::StorageSource(StorageSource {
                bucket: "b".to_owned(),
                object: "o.tgz".to_owned(),
                generation: None,
            })),
            logs_bucket: Some("b".to_owned()),
            timeout: Some("62s".to_owned()),
            ..BuildRequest::default()
        };
        request
            .substitutions
            .insert("_OUTPUT_IMAGE".to_owned(), "gcr.io/p/img".to_owned());
        request.set_substitution_policy(SubstitutionPolicy::AllowLoose);

        let value: serde_json::Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(value["source"]["storageSource"]["object"], "o.tgz");
        assert_eq!(value["logsBucket"], "b");
        assert_eq!(value["timeout"], "62s");
        assert_eq!(value["options"]["substitutionOption"], "ALLOW_LOOSE");
        assert_eq!(value["steps"][0]["args"][1], ".");
        assert!(value["steps"][0].get("env").is_none());
    }

    #[test]
    fn steps_or_builder_required() {
        let request = BuildRequest::default();
        assert!(request.validate().is_err());

        let request = BuildRequest {
            builder_ref: Some("python".to_owned()),
            ..BuildRequest::default()
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn substitution_keys_need_underscore() {
        let mut request = BuildRequest {
            steps: vec![BuildStep::new("x")],
            ..BuildRequest::default()
        };
        request
            .substitutions
            .insert("COMMIT_SHA".to_owned(), "abc".to_owned());
        assert!(request.validate().is_err());
    }

    #[test]
    fn env_lookup_by_key() {
        let mut step = BuildStep::new("x");
        step.env.push("GAE_APPLICATION_YAML_PATH=app.yaml".to_owned());
        assert!(step.has_env("GAE_APPLICATION_YAML_PATH"));
        assert!(!step.has_env("GAE"));
    }
}
