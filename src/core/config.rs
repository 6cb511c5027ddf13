//! Global configuration: layered loading, then frozen for the run.
//!
//! The cluster config file is a YAML mapping of profiles. Layers, lowest first:
//! the `default` section, the selected profile, `STRATA_CFG_<Key>` environment
//! variables, and `KEY=VALUE` overrides.

use super::error::ConfigError;
use super::types::Value;
use indexmap::IndexMap;
use std::path::Path;

/// Section merged beneath every profile.
pub const DEFAULT_SECTION: &str = "default";

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "STRATA_CFG_";

/// Key naming the credential profile every backend call runs under.
pub const CREDENTIALS_KEY: &str = "AWSProfile";

pub const DEFAULT_CREDENTIALS: &str = "default";

/// Immutable key/value configuration shared by every node in a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfig {
    profile: String,
    values: IndexMap<String, Value>,
}

impl GlobalConfig {
    pub fn builder(profile: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            profile: profile.into(),
            values: IndexMap::new(),
        }
    }

    /// Build directly from key/value pairs (tests and embedding).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut builder = Self::builder("inline");
        for (k, v) in pairs {
            builder.set(k.into(), v.into());
        }
        builder.build()
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Look up a key. Null values count as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Credential profile for the run; `default` when unset.
    pub fn credential_profile(&self) -> &str {
        self.get_str(CREDENTIALS_KEY).unwrap_or(DEFAULT_CREDENTIALS)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Accumulates configuration layers; later layers win.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    profile: String,
    values: IndexMap<String, Value>,
}

impl ConfigBuilder {
    fn set(&mut self, key: String, value: Value) {
        self.values.insert(key, unquote(value));
    }

    /// Layer the `default` section and the selected profile from YAML text.
    pub fn yaml(mut self, yaml: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml_ng::from_str(yaml)?;
        let sections = root.as_mapping().ok_or(ConfigError::NotAMapping)?;

        let section = |name: &str| sections.get(name).and_then(Value::as_mapping);

        let profile = section(&self.profile).ok_or_else(|| ConfigError::UnknownProfile {
            profile: self.profile.clone(),
            available: sections
                .keys()
                .filter_map(Value::as_str)
                .filter(|k| *k != DEFAULT_SECTION)
                .collect::<Vec<_>>()
                .join(", "),
        })?;

        for layer in section(DEFAULT_SECTION).into_iter().chain([profile]) {
            for (k, v) in layer {
                if let Some(key) = k.as_str() {
                    self.set(key.to_string(), v.clone());
                }
            }
        }
        Ok(self)
    }

    /// Layer a config file from disk.
    pub fn file(self, path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.yaml(&content)
    }

    /// Layer `STRATA_CFG_<Key>` variables from an environment snapshot.
    pub fn env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(ENV_PREFIX).filter(|k| !k.is_empty()) {
                self.set(key.to_string(), Value::String(value));
            }
        }
        self
    }

    /// Layer `KEY=VALUE` overrides.
    pub fn overrides(mut self, pairs: &[String]) -> Result<Self, ConfigError> {
        for pair in pairs {
            let (key, value) = pair
                .split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| ConfigError::InvalidOverride(pair.clone()))?;
            self.set(key.to_string(), Value::String(value.to_string()));
        }
        Ok(self)
    }

    pub fn build(self) -> GlobalConfig {
        GlobalConfig {
            profile: self.profile,
            values: self.values,
        }
    }
}

/// Load a profile from a config file with environment and CLI overrides.
pub fn load(path: &Path, profile: &str, overrides: &[String]) -> Result<GlobalConfig, ConfigError> {
    Ok(GlobalConfig::builder(profile)
        .file(path)?
        .env(utf8_vars())
        .overrides(overrides)?
        .build())
}

/// Process environment, skipping variables whose name or value is not UTF-8.
fn utf8_vars() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
}

/// Strip one run of surrounding double quotes, then single quotes.
fn unquote(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim_matches('"').trim_matches('\'').to_string()),
        other => other,
    }
}
