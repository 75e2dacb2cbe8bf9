//! Build script (`cloudbuild.yaml`) parsing.
//!
//! Scripts are YAML or JSON. Field names may be snake_case; they are
//! normalized to camelCase before decoding, except below `secret_env`
//! whose keys are environment variable names. List fields accept a
//! single string.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use appdeploy_core::BuildRequest;
use serde_json::{Map, Value};

const SECRET_ENV: &str = "secretEnv";

const BUILD_FIELDS: &[&str] = &[
    "steps",
    "images",
    "timeout",
    "substitutions",
    "options",
    "tags",
    "logsBucket",
];

const STEP_FIELDS: &[&str] = &[
    "name",
    "args",
    "env",
    "id",
    "entrypoint",
    "dir",
    "waitFor",
    "secretEnv",
    "timeout",
];

const BUILD_LIST_FIELDS: &[&str] = &["images", "tags"];
const STEP_LIST_FIELDS: &[&str] = &["args", "env", "waitFor", "secretEnv"];

/// Raw contents of the build script at `path`.
pub fn read_script(path: &Path) -> Result<String, ScriptError> {
    let origin = path.display().to_string();
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ScriptError::NotFound { origin }
        } else {
            ScriptError::Read { origin, source: e }
        }
    })
}

/// Parse build script `contents`; `origin` names it in errors.
pub fn parse_script(
    contents: &str,
    origin: &str,
    params: &BTreeMap<String, String>,
) -> Result<BuildRequest, ScriptError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(contents).map_err(|e| ScriptError::Parse {
            origin: origin.to_owned(),
            source: e,
        })?;
    let value = serde_json::to_value(yaml).map_err(|e| ScriptError::Decode {
        origin: origin.to_owned(),
        source: e,
    })?;
    let Value::Object(raw) = value else {
        return Err(ScriptError::NotAMapping {
            origin: origin.to_owned(),
        });
    };

    let Value::Object(mut build) = snake_to_camel(Value::Object(raw)) else {
        return Err(ScriptError::NotAMapping {
            origin: origin.to_owned(),
        });
    };

    if build.contains_key("source") {
        return Err(ScriptError::SourceSpecified {
            origin: origin.to_owned(),
        });
    }

    check_unused(&build, origin)?;
    coerce_lists(&mut build, BUILD_LIST_FIELDS);
    if let Some(Value::Array(steps)) = build.get_mut("steps") {
        for step in steps.iter_mut() {
            if let Value::Object(step) = step {
                coerce_lists(step, STEP_LIST_FIELDS);
            }
        }
    }

    let mut request: BuildRequest =
        serde_json::from_value(Value::Object(build)).map_err(|e| ScriptError::Decode {
            origin: origin.to_owned(),
            source: e,
        })?;

    if request.steps.is_empty() {
        return Err(ScriptError::NoSteps {
            origin: origin.to_owned(),
        });
    }
    if request.substitutions.keys().any(|k| !k.starts_with('_')) {
        return Err(ScriptError::BuiltinSubstitutions {
            origin: origin.to_owned(),
        });
    }

    for (key, value) in params {
        request.substitutions.insert(key.clone(), value.clone());
    }
    Ok(request)
}

// ── Field normalization ──

/// `wait_for` → `waitFor`. Leading underscores are kept; repeated
/// separators collapse.
pub fn snake_to_camel_str(name: &str) -> String {
    let rest = name.trim_start_matches('_');
    let leading = &name[..name.len() - rest.len()];
    if rest.is_empty() {
        return name.to_owned();
    }

    let mut out = String::from(leading);
    for (i, part) in rest.split('_').filter(|p| !p.is_empty()).enumerate() {
        if i == 0 {
            out.push_str(part);
            continue;
        }
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Recursively camelCase mapping keys, leaving `secretEnv` values alone.
pub fn snake_to_camel(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let key = snake_to_camel_str(&k);
                    let v = if key == SECRET_ENV { v } else { snake_to_camel(v) };
                    (key, v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(snake_to_camel).collect()),
        other => other,
    }
}

fn coerce_lists(map: &mut Map<String, Value>, fields: &[&str]) {
    for field in fields {
        if let Some(value) = map.get_mut(*field)
            && let Value::String(s) = value
        {
            *value = Value::Array(vec![Value::String(std::mem::take(s))]);
        }
    }
}

fn check_unused(build: &Map<String, Value>, origin: &str) -> Result<(), ScriptError> {
    let unused = unknown_keys(build, BUILD_FIELDS);
    if !unused.is_empty() {
        return Err(ScriptError::Unused {
            origin: origin.to_owned(),
            field: format!(".{}", group(&unused)),
        });
    }

    if let Some(Value::Array(steps)) = build.get("steps") {
        for (i, step) in steps.iter().enumerate() {
            let Value::Object(step) = step else { continue };
            let unused = unknown_keys(step, STEP_FIELDS);
            if !unused.is_empty() {
                return Err(ScriptError::Unused {
                    origin: origin.to_owned(),
                    field: format!(".steps[{i}].{}", group(&unused)),
                });
            }
        }
    }
    Ok(())
}

fn unknown_keys<'a>(map: &'a Map<String, Value>, known: &[&str]) -> BTreeSet<&'a str> {
    map.keys()
        .map(String::as_str)
        .filter(|k| !known.contains(k))
        .collect()
}

fn group(names: &BTreeSet<&str>) -> String {
    if names.len() == 1 {
        names.iter().copied().collect()
    } else {
        format!("{{{}}}", names.iter().copied().collect::<Vec<_>>().join(","))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("build script {origin} not found")]
    NotFound { origin: String },
    #[error("failed to read build script {origin}")]
    Read {
        origin: String,
        source: std::io::Error,
    },
    #[error("{origin}: error parsing build script")]
    Parse {
        origin: String,
        source: serde_yaml::Error,
    },
    #[error("{origin}: could not decode build script")]
    Decode {
        origin: String,
        source: serde_json::Error,
    },
    #[error("{origin}: build script must be a mapping")]
    NotAMapping { origin: String },
    #[error("{origin}: config cannot specify source")]
    SourceSpecified { origin: String },
    #[error("{origin}: config must list at least one step")]
    NoSteps { origin: String },
    #[error("{origin}: config cannot specify built-in substitutions")]
    BuiltinSubstitutions { origin: String },
    #[error("{origin}: {field}: unused")]
    Unused { origin: String, field: String },
}

impl ScriptError {
    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        match self {
            Self::NotFound { .. } | Self::Read { .. } => appdeploy_core::ErrorKind::Source,
            _ => appdeploy_core::ErrorKind::UserInput,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Result<BuildRequest, ScriptError> {
        parse_script(contents, "cloudbuild.yaml", &BTreeMap::new())
    }

    #[test]
    fn camel_case_names() {
        let cases = [
            ("_", "_"),
            ("__", "__"),
            ("wait_for", "waitFor"),
            ("foozleBop", "foozleBop"),
            ("_xyz", "_xyz"),
            ("__xyz", "__xyz"),
            ("a__b", "aB"),
        ];
        for (input, expected) in cases {
            assert_eq!(snake_to_camel_str(input), expected, "input {input}");
        }
    }

    #[test]
    fn secret_env_values_keep_their_keys() {
        let input = serde_json::json!({
            "camel_me": "",
            "secret_env": {"FOO_BAR": "asdf"},
            "super_list": [{"wait_for": ["x"]}],
        });
        let expected = serde_json::json!({
            "camelMe": "",
            "secretEnv": {"FOO_BAR": "asdf"},
            "superList": [{"waitFor": ["x"]}],
        });
        assert_eq!(snake_to_camel(input), expected);
    }

    #[test]
    fn yaml_with_scalar_images() {
        let request = parse(
            r#"
steps:
 - name: gcr.io/cloud-builders/docker
   args: [build, -t, gcr.io/my-project/simple]
   wait_for: [foo, bar]
images: gcr.io/my-project/simple
"#,
        )
        .unwrap();
        assert_eq!(request.images, vec!["gcr.io/my-project/simple"]);
        assert_eq!(request.steps[0].wait_for, vec!["foo", "bar"]);
        assert_eq!(request.steps[0].args[0], "build");
    }

    #[test]
    fn json_is_accepted() {
        let request = parse(
            r#"{"steps": [{"name": "gcr.io/cloud-builders/docker", "args": ["build"]}]}"#,
        )
        .unwrap();
        assert_eq!(request.steps.len(), 1);
    }

    #[test]
    fn params_override_script_substitutions() {
        let mut params = BTreeMap::new();
        params.insert("_DAY".to_owned(), "tuesday".to_owned());
        let request = parse_script(
            "steps:\n- name: x\nsubstitutions:\n  _DAY: monday\n  _BEER: orval\n",
            "cloudbuild.yaml",
            &params,
        )
        .unwrap();
        assert_eq!(request.substitutions["_DAY"], "tuesday");
        assert_eq!(request.substitutions["_BEER"], "orval");
    }

    #[test]
    fn rejects_source() {
        let err = parse("steps:\n- name: x\nsource:\n  storageSource: {}\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cloudbuild.yaml: config cannot specify source"
        );
    }

    #[test]
    fn rejects_empty_steps() {
        let err = parse("images: [x]\n").unwrap_err();
        assert!(err.to_string().contains("config must list at least one step"));
    }

    #[test]
    fn rejects_builtin_substitutions() {
        let err = parse("steps:\n- name: x\nsubstitutions:\n  COMMIT_SHA: abc\n").unwrap_err();
        assert!(
            err.to_string()
                .contains("config cannot specify built-in substitutions")
        );
    }

    #[test]
    fn reports_unused_step_field() {
        let err = parse("steps:\n- name: x\n  tags: [a]\n").unwrap_err();
        assert_eq!(err.to_string(), "cloudbuild.yaml: .steps[0].tags: unused");
    }

    #[test]
    fn reports_unused_fields_grouped() {
        let err = parse("steps:\n- name: x\nnonsense: 1\nextra: 2\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cloudbuild.yaml: .{extra,nonsense}: unused"
        );
    }

    #[test]
    fn garbage_is_not_a_mapping() {
        let err = parse("this file is neither json nor yaml\n").unwrap_err();
        assert!(matches!(err, ScriptError::NotAMapping { .. }));
    }
}
