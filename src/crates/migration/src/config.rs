//! Migration settings
//!
//! Settings are layered, each layer overriding the one before:
//!
//! 1. Built-in defaults
//! 2. An optional YAML or TOML file (YAML strings may use `${ENV:default}`)
//! 3. `MIGRATION_*` environment variables
//!
//! Overrides are read through a lookup function, the process environment by
//! default. [`MigrationSettings::load_with`] takes any other source.
//!
//! ```yaml
//! upload_concurrency: ${UPLOADS:4}
//! verify_checksums: true
//! retry:
//!   max_attempts: 3
//!   initial_interval_secs: 1.0
//! ```

use crate::error::{MigrationError, Result};
use crate::retry::RetryPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "MIGRATION_";

/// Tunables for a migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationSettings {
    /// Maximum binary uploads in flight at once
    pub upload_concurrency: usize,

    /// Verify size and sha256 of transferred binaries when known
    pub verify_checksums: bool,

    pub retry: RetryPolicy,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            upload_concurrency: 1,
            verify_checksums: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl MigrationSettings {
    /// Defaults, then `path` if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, process_env)
    }

    /// Like [`load`](Self::load), with overrides looked up by full variable name
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let settings = settings.with_overrides_from(lookup)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a `.yaml`, `.yml`, or `.toml` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MigrationError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("toml") => toml::from_str(&content).map_err(|e| {
                MigrationError::Config(format!("failed to parse {}: {}", path.display(), e))
            }),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content).map_err(|e| match e {
                MigrationError::Config(msg) => {
                    MigrationError::Config(format!("{}: {}", path.display(), msg))
                }
                other => other,
            }),
            _ => Err(MigrationError::Config(format!(
                "unsupported settings file {}: expected .yaml, .yml, or .toml",
                path.display()
            ))),
        }
    }

    /// Parse YAML settings, expanding `${ENV:default}` in string values
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut value: YamlValue = serde_yaml::from_str(content)
            .map_err(|e| MigrationError::Config(format!("invalid YAML: {}", e)))?;
        expand_variables(&mut value);
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value)
            .map_err(|e| MigrationError::Config(format!("invalid settings: {}", e)))
    }

    /// Apply `MIGRATION_*` environment variables on top of these settings
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(process_env)
    }

    /// Apply `MIGRATION_*` overrides found through `lookup`
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        if let Some(n) = get_env_parse::<usize, _>(&lookup, "UPLOAD_CONCURRENCY")? {
            self.upload_concurrency = n;
        }
        if let Some(verify) = get_env_bool(&lookup, "VERIFY_CHECKSUMS")? {
            self.verify_checksums = verify;
        }
        if let Some(n) = get_env_parse::<usize, _>(&lookup, "RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = n;
        }
        if let Some(secs) = get_env_parse::<f64, _>(&lookup, "RETRY_INITIAL_INTERVAL_SECS")? {
            self.retry.initial_interval_secs = secs;
        }
        if let Some(jitter) = get_env_bool(&lookup, "RETRY_JITTER")? {
            self.retry.jitter = jitter;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload_concurrency == 0 {
            return Err(MigrationError::Config(
                "upload_concurrency must be at least 1".into(),
            ));
        }
        self.retry.validate()
    }

    pub fn with_upload_concurrency(mut self, n: usize) -> Self {
        self.upload_concurrency = n;
        self
    }

    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Override lookup backed by the process environment
pub fn process_env(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(MigrationError::Config(format!(
            "environment variable {} contains invalid UTF-8",
            name
        ))),
    }
}

fn get_env<F>(lookup: &F, key: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Result<Option<String>>,
{
    lookup(&format!("{}{}", ENV_PREFIX, key))
}

fn get_env_parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Result<Option<String>>,
{
    match get_env(lookup, key)? {
        Some(val) => val.trim().parse::<T>().map(Some).map_err(|e| {
            MigrationError::Config(format!(
                "failed to parse environment variable {}{}: {}",
                ENV_PREFIX, key, e
            ))
        }),
        None => Ok(None),
    }
}

fn get_env_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Result<Option<String>>,
{
    match get_env(lookup, key)? {
        Some(val) => match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            other => Err(MigrationError::Config(format!(
                "environment variable {}{} is not a boolean: {}",
                ENV_PREFIX, key, other
            ))),
        },
        None => Ok(None),
    }
}

fn expand_variables(value: &mut YamlValue) {
    match value {
        YamlValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                // Re-read the expansion so "${N:4}" yields a number, not a string
                *value = match serde_yaml::from_str::<YamlValue>(&expanded) {
                    Ok(scalar) if scalar.is_number() || scalar.is_bool() => scalar,
                    _ => YamlValue::String(expanded),
                };
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v);
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

/// Expand `${ENV_VAR:default}` references in a string
fn expand_env_in_string(s: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

    if !s.contains("${") {
        return None;
    }
    let re = PATTERN
        .get_or_init(|| Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok())
        .as_ref()?;

    let expanded = re.replace_all(s, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        env::var(&cap[1]).unwrap_or_else(|_| default_value.to_string())
    });
    Some(expanded.into_owned())
}
