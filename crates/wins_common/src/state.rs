//! Initial state captured before a reconfiguration sequence.
//!
//! If a later step fails, the captured document is written back verbatim.
//! Only configuration is covered; binary swaps performed by the upgrader
//! cannot be undone from here.

use crate::config::{ConfigDocument, ConfigError, ConfigStore};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Configuration of rancher-wins before any change was made
#[derive(Debug, Clone, PartialEq)]
pub struct InitialState {
    pub initial_config: ConfigDocument,
    pub captured_at: DateTime<Utc>,
}

impl InitialState {
    /// Loads the current document through `store`
    pub fn capture(store: &ConfigStore) -> Result<Self, ConfigError> {
        let initial_config = store.load()?;
        let captured_at = Utc::now();
        info!(
            "Captured initial config from {} at {}",
            store.path().display(),
            captured_at.to_rfc3339()
        );
        Ok(Self {
            initial_config,
            captured_at,
        })
    }

    /// Writes the captured document back, consuming the snapshot
    pub fn restore(self, store: &ConfigStore) -> Result<(), ConfigError> {
        warn!(
            "Restoring config captured at {} to {}",
            self.captured_at.to_rfc3339(),
            store.path().display()
        );
        store.save(&self.initial_config)
    }
}
