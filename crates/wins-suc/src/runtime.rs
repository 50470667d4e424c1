//! Run sequence of wins-suc.
//!
//! Order matters so the service is restarted at most once:
//! 1. Capture the config (only when it may be rewritten)
//! 2. Reconcile the config file against the environment
//! 3. Upgrade the wins binary (stops the service when it swaps)
//! 4. Restart the service if anything requires it and nothing failed
//!
//! A failed config update skips the upgrade, so the service is never
//! stopped for a run that is already failing. On failure the captured
//! config is written back and, if the upgrade left the service stopped, one
//! attempt is made to start it again. The errors are still reported.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use wins_common::config::ConfigStore;
use wins_common::env::EnvSnapshot;
use wins_common::reconcile::{reconcile, ReconcileOutcome, UPDATE_CONFIG_TRIGGER};
use wins_common::service::ServiceControl;
use wins_common::state::InitialState;
use wins_common::upgrade::{
    BinaryLocations, FilePayload, UpgradeOutcome, Upgrader, ENABLE_UPGRADE_ENV_VAR,
    PAYLOAD_PATH_ENV_VAR, PAYLOAD_VERSION_ENV_VAR,
};
use wins_common::version::{CommandProbe, VersionProbe};

use crate::cli::Cli;
use crate::report::combine_errors;

/// Version the payload is assumed to report when none is given
pub const DEFAULT_PAYLOAD_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// What to do, with flags already merged over the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub update_config: bool,
    pub payload: Option<PathBuf>,
    pub payload_version: Option<String>,
}

impl RunOptions {
    pub fn from_cli(cli: &Cli, env: &EnvSnapshot) -> Self {
        let update_config = cli.update_config || UPDATE_CONFIG_TRIGGER.lookup(env).is_some();
        let payload = cli
            .payload
            .clone()
            .or_else(|| PAYLOAD_PATH_ENV_VAR.lookup(env).map(PathBuf::from));
        let payload_version = cli
            .payload_version
            .clone()
            .or_else(|| PAYLOAD_VERSION_ENV_VAR.lookup(env).map(str::to_string));

        Self {
            update_config,
            payload,
            payload_version,
        }
    }

    fn payload(&self) -> Option<FilePayload> {
        let path = self.payload.as_ref()?;
        let version = self
            .payload_version
            .as_deref()
            .unwrap_or(DEFAULT_PAYLOAD_VERSION);
        Some(FilePayload::new(version, path))
    }
}

/// What a successful run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub reconciled: Option<ReconcileOutcome>,
    pub upgraded: Option<UpgradeOutcome>,
    pub restarted: bool,
}

/// Host resources a run operates on
pub struct Runtime<'a> {
    store: ConfigStore,
    locations: BinaryLocations,
    service: &'a dyn ServiceControl,
    probe: &'a dyn VersionProbe,
}

impl<'a> Runtime<'a> {
    pub fn new(
        store: ConfigStore,
        locations: BinaryLocations,
        service: &'a dyn ServiceControl,
    ) -> Self {
        Self {
            store,
            locations,
            service,
            probe: &CommandProbe,
        }
    }

    pub fn with_probe(mut self, probe: &'a dyn VersionProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn run(&self, options: &RunOptions, env: &EnvSnapshot) -> Result<RunSummary> {
        let payload = options.payload();
        if payload.is_none() && env.is_truthy(&ENABLE_UPGRADE_ENV_VAR.name()) {
            warn!(
                "{} is set but no payload was provided ({} or --payload), skipping binary upgrade",
                ENABLE_UPGRADE_ENV_VAR, PAYLOAD_PATH_ENV_VAR
            );
        }

        if !options.update_config && payload.is_none() {
            info!("Nothing to do");
            return Ok(RunSummary::default());
        }

        let snapshot = if options.update_config {
            Some(InitialState::capture(&self.store).context("failed to capture initial config")?)
        } else {
            None
        };

        let mut summary = RunSummary::default();
        let mut errors: Vec<anyhow::Error> = Vec::new();
        let mut refresh_service = false;
        let mut config_touched = false;
        let mut service_stopped = false;

        if options.update_config {
            match reconcile(env, &self.store) {
                Ok(outcome) => {
                    refresh_service |= outcome.changed();
                    config_touched = outcome.changed();
                    summary.reconciled = Some(outcome);
                }
                Err(e) => {
                    config_touched = e.restart_warranted();
                    errors.push(anyhow::Error::new(e).context("failed to update rancher-wins config"));
                }
            }
        }

        let payload = match payload {
            Some(_) if !errors.is_empty() => {
                warn!("Skipping wins binary upgrade because the config update failed");
                None
            }
            other => other,
        };

        if let Some(payload) = payload.as_ref() {
            debug!(
                "Using payload {} (version {})",
                payload.path().display(),
                options.payload_version.as_deref().unwrap_or(DEFAULT_PAYLOAD_VERSION)
            );
            let upgrader = Upgrader::new(self.locations.clone(), payload, self.service)
                .with_probe(self.probe);
            match upgrader.run(env) {
                Ok(outcome) => {
                    refresh_service |= outcome.restart_required();
                    summary.upgraded = Some(outcome);
                }
                Err(e) => {
                    service_stopped = e.service_stopped();
                    if e.is_degraded() {
                        error!("wins binary upgrade left the host degraded: {}", e);
                    }
                    errors.push(anyhow::Error::new(e).context("failed to upgrade wins binary"));
                }
            }
        }

        if !errors.is_empty() {
            let snapshot = snapshot.filter(|_| config_touched);
            self.recover(snapshot, service_stopped, &mut errors);
            return Err(combine_errors(errors));
        }

        if refresh_service {
            info!("Restarting rancher-wins to apply changes");
            self.service
                .open()
                .and_then(|handle| handle.restart())
                .context("failed to restart rancher-wins service")?;
            summary.restarted = true;
        }

        Ok(summary)
    }

    /// Puts the host back to the last known state as far as possible
    fn recover(
        &self,
        snapshot: Option<InitialState>,
        service_stopped: bool,
        errors: &mut Vec<anyhow::Error>,
    ) {
        if let Some(snapshot) = snapshot {
            if let Err(e) = snapshot.restore(&self.store) {
                error!("Failed to restore initial config: {}", e);
                errors.push(anyhow::Error::new(e).context("failed to restore initial config"));
            }
        }

        if !service_stopped {
            return;
        }
        if !self.locations.primary.exists() {
            error!(
                "{} is missing, rancher-wins will not be started",
                self.locations.primary.display()
            );
            return;
        }

        info!("Attempting to start rancher-wins after failed upgrade");
        if let Err(e) = self.service.open().and_then(|handle| handle.start()) {
            error!("Failed to start rancher-wins: {:#}", anyhow::Error::new(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wins_common::upgrade::PayloadProvider;

    #[test]
    fn test_options_flags_override_env() {
        let env = EnvSnapshot::from_pairs([
            ("CATTLE_WINS_UPGRADE_PAYLOAD", "/env/wins"),
            ("CATTLE_WINS_UPGRADE_VERSION", "v0.1.0"),
        ]);
        let cli = Cli {
            payload: Some(PathBuf::from("/flag/wins")),
            ..Default::default()
        };

        let options = RunOptions::from_cli(&cli, &env);
        assert_eq!(options.payload, Some(PathBuf::from("/flag/wins")));
        assert_eq!(options.payload_version.as_deref(), Some("v0.1.0"));
        assert!(!options.update_config);
    }

    #[test]
    fn test_options_trigger_var() {
        let env = EnvSnapshot::from_pairs([("CATTLE_WINS_UPDATE_CONFIG", "1")]);
        assert!(RunOptions::from_cli(&Cli::default(), &env).update_config);

        // empty counts as unset
        let env = EnvSnapshot::from_pairs([("CATTLE_WINS_UPDATE_CONFIG", "")]);
        assert!(!RunOptions::from_cli(&Cli::default(), &env).update_config);
    }

    #[test]
    fn test_default_payload_version() {
        let options = RunOptions {
            payload: Some(PathBuf::from("/tmp/wins")),
            ..Default::default()
        };
        let payload = options.payload().unwrap();
        assert_eq!(payload.version(), DEFAULT_PAYLOAD_VERSION);
        assert!(DEFAULT_PAYLOAD_VERSION.starts_with('v'));
    }
}
