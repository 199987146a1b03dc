//! Variable interpolation for configuration values.
//!
//! Supports `${env.VAR_NAME}`, replaced by the environment variable of that
//! name. References to unset variables are left as written.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static VAR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{env\.([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap());

/// Variables available to configuration values.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    env: HashMap<String, String>,
}

impl Variables {
    /// Create an empty variable set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the process environment.
    pub fn from_process_env() -> Self {
        Self {
            env: std::env::vars().collect(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Replace every known `${env.NAME}` in `input`.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                self.env
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}
