//! rancher-wins configuration document and its on-disk store.
//!
//! The document lives at `/etc/rancher/wins/config` (`C:/etc/rancher/wins/config`
//! on Windows) unless an explicit path or `CATTLE_WINS_CONFIG_DIR` says
//! otherwise. Loading always starts from the defaults and merges what the
//! file specifies, so a partial or missing file is not an error.

use crate::env::{EnvSnapshot, EnvVarName};
use crate::error::ErrorClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Directory override; the document is `<dir>/config`
pub const CONFIG_DIR_ENV_VAR: EnvVarName = EnvVarName::Namespaced("config_dir");

/// File name of the document inside the config directory
pub const CONFIG_FILE_NAME: &str = "config";

/// Default config file path
#[cfg(windows)]
pub const DEFAULT_CONFIG_PATH: &str = "C:/etc/rancher/wins/config";
#[cfg(not(windows))]
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rancher/wins/config";

/// Named pipe the wins server listens on by default
pub const DEFAULT_LISTEN: &str = "rancher_wins";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config {}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to serialize config")]
    Serialize(#[from] serde_yaml::Error),

    #[error("failed to write config {}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

impl ConfigError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ConfigError::Parse { .. } => ErrorClass::Input,
            ConfigError::Read { .. } | ConfigError::Write { .. } | ConfigError::Serialize(_) => {
                ErrorClass::Environmental
            }
        }
    }
}

/// CSI proxy settings, absent until something configures them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsiProxyConfig {
    pub url: String,
    pub version: String,
    #[serde(rename = "kubeletPath")]
    pub kubelet_path: String,
}

/// The rancher-wins server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    pub debug: bool,

    pub listen: String,

    pub proxy: String,

    #[serde(rename = "agentStrictTLSMode")]
    pub agent_strict_tls_mode: bool,

    #[serde(rename = "csi-proxy", skip_serializing_if = "Option::is_none")]
    pub csi_proxy: Option<CsiProxyConfig>,

    /// Keys this tool does not model (white lists, system agent settings...),
    /// carried through load/save untouched
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            debug: false,
            listen: DEFAULT_LISTEN.to_string(),
            proxy: String::new(),
            agent_strict_tls_mode: false,
            csi_proxy: None,
            other: BTreeMap::new(),
        }
    }
}

impl ConfigDocument {
    /// CSI proxy section, created zero-valued on first use
    pub fn csi_proxy_mut(&mut self) -> &mut CsiProxyConfig {
        self.csi_proxy.get_or_insert_with(CsiProxyConfig::default)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Loads and saves the document at one resolved path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store bound to exactly `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Explicit path wins, then `CATTLE_WINS_CONFIG_DIR`, then the default
    pub fn resolve(explicit: Option<&Path>, env: &EnvSnapshot) -> Self {
        if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
            return Self::at(path);
        }
        if let Some(dir) = CONFIG_DIR_ENV_VAR.lookup(env) {
            return Self::at(Path::new(dir).join(CONFIG_FILE_NAME));
        }
        Self::at(DEFAULT_CONFIG_PATH)
    }

    /// Store for the environment/default path, with no explicit override
    pub fn from_env(env: &EnvSnapshot) -> Self {
        Self::resolve(None, env)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document, falling back to defaults for anything missing
    pub fn load(&self) -> Result<ConfigDocument, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(
                    "No config found at {}, using defaults",
                    self.path.display()
                );
                return Ok(ConfigDocument::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            debug!("Config {} is empty, using defaults", self.path.display());
            return Ok(ConfigDocument::default());
        }

        let document = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        debug!("Loaded config from {}", self.path.display());
        Ok(document)
    }

    /// Writes the whole document, replacing the file in one rename
    pub fn save(&self, document: &ConfigDocument) -> Result<(), ConfigError> {
        let content = document.to_yaml()?;
        atomic_write(&self.path, content.as_bytes()).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;
        info!("Saved config to {}", self.path.display());
        Ok(())
    }
}

/// Write to a sibling temp file, sync, then rename over the target
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}
