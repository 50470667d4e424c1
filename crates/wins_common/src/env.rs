//! Environment snapshot and variable naming.
//!
//! The core never calls `std::env::var` directly. The entry point takes one
//! snapshot of the process environment and hands it down, so every decision
//! is a function of the snapshot it was given.

use std::collections::BTreeMap;
use std::fmt;

/// Prefix shared by every namespaced rancher-wins variable
pub const ENV_PREFIX: &str = "CATTLE_WINS_";

/// Immutable view of environment variables taken at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    ///
    /// Variables whose name or value is not valid unicode are dropped.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    /// Builds a snapshot from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns a copy with `name` set to `value`
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Value of `name` if it is present and non-empty.
    ///
    /// An empty value means "no opinion" and is reported as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// True when `name` holds any non-empty value
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Simple boolean gate: true only for `true` or `$true`, any case.
    ///
    /// `$true` is what PowerShell users tend to write.
    pub fn is_truthy(&self, name: &str) -> bool {
        self.get(name)
            .map(|v| {
                let v = v.trim().to_ascii_lowercase();
                v == "true" || v == "$true"
            })
            .unwrap_or(false)
    }

    /// Number of variables held
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Name of an environment variable the agent recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVarName {
    /// Prefixed with `CATTLE_WINS_`, stored lowercase without the prefix
    Namespaced(&'static str),
    /// A well-known variable shared with other rancher components
    Bare(&'static str),
}

impl EnvVarName {
    /// Canonical uppercase variable name
    pub fn name(&self) -> String {
        match self {
            EnvVarName::Namespaced(base) => {
                format!("{}{}", ENV_PREFIX, base.to_ascii_uppercase())
            }
            EnvVarName::Bare(base) => base.to_ascii_uppercase(),
        }
    }

    /// Reads this variable from a snapshot
    pub fn lookup<'a>(&self, env: &'a EnvSnapshot) -> Option<&'a str> {
        env.get(&self.name())
    }
}

impl fmt::Display for EnvVarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
