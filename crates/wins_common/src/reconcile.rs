//! Reconcile the rancher-wins config with environment overrides.
//!
//! A fixed table maps recognised variables to document fields. Each entry
//! is evaluated in table order; an absent or empty variable never touches
//! its field. Boolean fields that fail to parse are logged and skipped so a
//! single bad variable cannot block the others.

use crate::config::{ConfigDocument, ConfigError, ConfigStore};
use crate::env::{EnvSnapshot, EnvVarName};
use crate::error::ErrorClass;
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

/// Any non-empty value asks the entry command to reconcile
pub const UPDATE_CONFIG_TRIGGER: EnvVarName = EnvVarName::Namespaced("update_config");

/// Document field an override can write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    Debug,
    Listen,
    Proxy,
    AgentStrictTlsMode,
    CsiProxyUrl,
    CsiProxyVersion,
    CsiProxyKubeletPath,
}

impl ConfigField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigField::Debug => "debug",
            ConfigField::Listen => "listen",
            ConfigField::Proxy => "proxy",
            ConfigField::AgentStrictTlsMode => "agentStrictTLSMode",
            ConfigField::CsiProxyUrl => "csi-proxy.url",
            ConfigField::CsiProxyVersion => "csi-proxy.version",
            ConfigField::CsiProxyKubeletPath => "csi-proxy.kubeletPath",
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, ConfigField::Debug | ConfigField::AgentStrictTlsMode)
    }

    /// Current value rendered as text, `None` when the CSI proxy section is absent
    fn current(&self, doc: &ConfigDocument) -> Option<String> {
        match self {
            ConfigField::Debug => Some(doc.debug.to_string()),
            ConfigField::Listen => Some(doc.listen.clone()),
            ConfigField::Proxy => Some(doc.proxy.clone()),
            ConfigField::AgentStrictTlsMode => Some(doc.agent_strict_tls_mode.to_string()),
            ConfigField::CsiProxyUrl => doc.csi_proxy.as_ref().map(|c| c.url.clone()),
            ConfigField::CsiProxyVersion => doc.csi_proxy.as_ref().map(|c| c.version.clone()),
            ConfigField::CsiProxyKubeletPath => {
                doc.csi_proxy.as_ref().map(|c| c.kubelet_path.clone())
            }
        }
    }

    /// Writes `raw` into the field. Returns whether the document changed.
    fn apply(&self, doc: &mut ConfigDocument, raw: &str) -> Result<bool, InvalidBool> {
        fn set_text(slot: &mut String, raw: &str) -> bool {
            if slot == raw {
                return false;
            }
            *slot = raw.to_string();
            true
        }

        fn set_bool(slot: &mut bool, raw: &str) -> Result<bool, InvalidBool> {
            let value = parse_bool(raw)?;
            if *slot == value {
                return Ok(false);
            }
            *slot = value;
            Ok(true)
        }

        // Equal values must not create an empty csi-proxy section
        let differs = self.current(doc).as_deref() != Some(raw);

        match self {
            ConfigField::Debug => set_bool(&mut doc.debug, raw),
            ConfigField::AgentStrictTlsMode => set_bool(&mut doc.agent_strict_tls_mode, raw),
            ConfigField::Listen => Ok(set_text(&mut doc.listen, raw)),
            ConfigField::Proxy => Ok(set_text(&mut doc.proxy, raw)),
            ConfigField::CsiProxyUrl if differs => Ok(set_text(&mut doc.csi_proxy_mut().url, raw)),
            ConfigField::CsiProxyVersion if differs => {
                Ok(set_text(&mut doc.csi_proxy_mut().version, raw))
            }
            ConfigField::CsiProxyKubeletPath if differs => {
                Ok(set_text(&mut doc.csi_proxy_mut().kubelet_path, raw))
            }
            ConfigField::CsiProxyUrl
            | ConfigField::CsiProxyVersion
            | ConfigField::CsiProxyKubeletPath => Ok(false),
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the override table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvOverride {
    pub var: EnvVarName,
    pub field: ConfigField,
}

/// Recognised overrides, evaluated in this order
pub const ENV_OVERRIDES: &[EnvOverride] = &[
    EnvOverride {
        var: EnvVarName::Namespaced("debug"),
        field: ConfigField::Debug,
    },
    EnvOverride {
        var: EnvVarName::Namespaced("listen"),
        field: ConfigField::Listen,
    },
    EnvOverride {
        var: EnvVarName::Namespaced("proxy"),
        field: ConfigField::Proxy,
    },
    EnvOverride {
        var: EnvVarName::Bare("strict_verify"),
        field: ConfigField::AgentStrictTlsMode,
    },
    EnvOverride {
        var: EnvVarName::Namespaced("csi_proxy_url"),
        field: ConfigField::CsiProxyUrl,
    },
    EnvOverride {
        var: EnvVarName::Namespaced("csi_proxy_version"),
        field: ConfigField::CsiProxyVersion,
    },
    EnvOverride {
        var: EnvVarName::Namespaced("kubelet_path"),
        field: ConfigField::CsiProxyKubeletPath,
    },
];

/// Value that is not a boolean
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid boolean '{0}'")]
pub struct InvalidBool(pub String);

/// Accepts `1 t true 0 f false` in any case
pub fn parse_bool(raw: &str) -> Result<bool, InvalidBool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        _ => Err(InvalidBool(raw.to_string())),
    }
}

/// A field that was overwritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub var: String,
    pub field: ConfigField,
    pub value: String,
}

/// A variable that was present but could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOverride {
    pub var: String,
    pub field: ConfigField,
    pub reason: String,
}

/// Result of applying the table to a document
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub document: ConfigDocument,
    pub changes: Vec<FieldChange>,
    pub skipped: Vec<SkippedOverride>,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Pure core: `(document, env) → (document', changes)`
pub fn apply_overrides(mut document: ConfigDocument, env: &EnvSnapshot) -> Reconciliation {
    let mut changes = Vec::new();
    let mut skipped = Vec::new();

    for entry in ENV_OVERRIDES {
        let var = entry.var.name();
        if entry.field.is_boolean() {
            info!(
                "Checking for {} value. This is a boolean flag, expecting 'true'",
                var
            );
        } else {
            info!("Checking for {} value", var);
        }

        let Some(value) = entry.var.lookup(env) else {
            continue;
        };
        info!("Found value '{}' for {}", value, var);

        match entry.field.apply(&mut document, value) {
            Ok(true) => changes.push(FieldChange {
                var,
                field: entry.field,
                value: value.to_string(),
            }),
            Ok(false) => {}
            Err(e) => {
                error!(
                    "Error encountered while parsing {}, field {} will not be updated: {}",
                    var, entry.field, e
                );
                skipped.push(SkippedOverride {
                    var,
                    field: entry.field,
                    reason: e.to_string(),
                });
            }
        }
    }

    Reconciliation {
        document,
        changes,
        skipped,
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("failed to load config")]
    Load(#[source] ConfigError),

    #[error("failed to save config")]
    Save {
        #[source]
        source: ConfigError,
        changes: Vec<FieldChange>,
    },
}

impl ReconcileError {
    /// True when the document differed from the environment, so a restart
    /// would be warranted even though it could not be persisted
    pub fn restart_warranted(&self) -> bool {
        matches!(self, ReconcileError::Save { .. })
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ReconcileError::Load(e) | ReconcileError::Save { source: e, .. } => e.class(),
        }
    }
}

/// What reconcile did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub changes: Vec<FieldChange>,
    pub skipped: Vec<SkippedOverride>,
}

impl ReconcileOutcome {
    /// Something was written, the service must restart to pick it up
    pub fn changed(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Loads the document, applies the overrides, and saves if anything changed
pub fn reconcile(env: &EnvSnapshot, store: &ConfigStore) -> Result<ReconcileOutcome, ReconcileError> {
    info!("Loading config from {}", store.path().display());
    let current = store.load().map_err(ReconcileError::Load)?;

    let Reconciliation {
        document,
        changes,
        skipped,
    } = apply_overrides(current, env);

    if changes.is_empty() {
        info!("Did not detect a change in configuration");
        return Ok(ReconcileOutcome { changes, skipped });
    }

    info!(
        "Detected {} change(s) in configuration, updating config file",
        changes.len()
    );
    if let Err(source) = store.save(&document) {
        return Err(ReconcileError::Save { source, changes });
    }

    Ok(ReconcileOutcome { changes, skipped })
}
