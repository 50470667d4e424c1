//! End-to-end runs of the wins-suc sequence against a temporary host layout.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use wins_common::config::{ConfigDocument, ConfigStore};
use wins_common::env::EnvSnapshot;
use wins_common::service::{ServiceControl, ServiceError, ServiceHandle, ServiceStatus};
use wins_common::upgrade::{BinaryLocations, UpgradeOutcome};
use wins_common::version::{VersionError, VersionProbe};
use wins_common::ErrorClass;
use wins_suc::{classify, exit_code, RunOptions, Runtime, StepErrors};

#[derive(Default)]
struct FileProbe {
    overrides: Mutex<HashMap<PathBuf, String>>,
}

impl VersionProbe for FileProbe {
    fn probe(&self, path: &Path) -> Result<String, VersionError> {
        if let Some(output) = self.overrides.lock().unwrap().get(path) {
            return Ok(output.clone());
        }
        fs::read_to_string(path).map_err(|source| VersionError::Spawn {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Default)]
struct ServiceState {
    events: Vec<&'static str>,
    stopped: bool,
}

#[derive(Clone, Default)]
struct FakeService {
    state: Arc<Mutex<ServiceState>>,
}

impl FakeService {
    fn events(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().events.clone()
    }

    fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }
}

impl ServiceControl for FakeService {
    fn open(&self) -> Result<Box<dyn ServiceHandle>, ServiceError> {
        self.state.lock().unwrap().events.push("open");
        Ok(Box::new(self.clone()))
    }
}

impl ServiceHandle for FakeService {
    fn name(&self) -> &str {
        "rancher-wins"
    }

    fn status(&self) -> Result<ServiceStatus, ServiceError> {
        if self.is_stopped() {
            Ok(ServiceStatus::Stopped)
        } else {
            Ok(ServiceStatus::Running)
        }
    }

    fn stop(&self) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.events.push("stop");
        state.stopped = true;
        Ok(())
    }

    fn start(&self) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.events.push("start");
        state.stopped = false;
        Ok(())
    }
}

fn binary(version: &str) -> Vec<u8> {
    format!("rancher-wins version {}\n", version).into_bytes()
}

struct Host {
    temp: TempDir,
    locations: BinaryLocations,
    config_path: PathBuf,
}

impl Host {
    fn new(installed: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let locations = BinaryLocations::under(temp.path());
        for path in [&locations.primary, &locations.mirror] {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, binary(installed)).unwrap();
        }
        let config_path = locations.config_dir.join("config");
        Self {
            temp,
            locations,
            config_path,
        }
    }

    fn write_payload(&self, version: &str) -> PathBuf {
        let path = self.temp.path().join("payload");
        fs::write(&path, binary(version)).unwrap();
        path
    }

    fn runtime<'a>(&self, service: &'a FakeService, probe: &'a FileProbe) -> Runtime<'a> {
        Runtime::new(
            ConfigStore::at(&self.config_path),
            self.locations.clone(),
            service,
        )
        .with_probe(probe)
    }
}

#[test]
fn test_nothing_requested_is_noop() {
    let host = Host::new("v1.0.0");
    let service = FakeService::default();
    let probe = FileProbe::default();

    let summary = host
        .runtime(&service, &probe)
        .run(&RunOptions::default(), &EnvSnapshot::default())
        .unwrap();

    assert!(summary.reconciled.is_none());
    assert!(summary.upgraded.is_none());
    assert!(!summary.restarted);
    assert!(service.events().is_empty());
    assert!(!host.config_path.exists());
}

#[test]
fn test_config_change_restarts_service() {
    let host = Host::new("v1.0.0");
    let service = FakeService::default();
    let probe = FileProbe::default();
    let env = EnvSnapshot::from_pairs([
        ("CATTLE_WINS_UPDATE_CONFIG", "true"),
        ("CATTLE_WINS_DEBUG", "true"),
    ]);
    let options = RunOptions::from_cli(&Default::default(), &env);

    let summary = host.runtime(&service, &probe).run(&options, &env).unwrap();

    assert!(summary.reconciled.as_ref().unwrap().changed());
    assert!(summary.restarted);
    assert_eq!(service.events(), vec!["open", "stop", "start"]);

    let saved = ConfigStore::at(&host.config_path).load().unwrap();
    assert!(saved.debug);
}

#[test]
fn test_config_unchanged_no_restart() {
    let host = Host::new("v1.0.0");
    let service = FakeService::default();
    let probe = FileProbe::default();
    let env = EnvSnapshot::default();
    let options = RunOptions {
        update_config: true,
        ..Default::default()
    };

    let summary = host.runtime(&service, &probe).run(&options, &env).unwrap();

    assert!(!summary.reconciled.unwrap().changed());
    assert!(!summary.restarted);
    assert!(service.events().is_empty());
    assert!(!host.config_path.exists());
}

#[test]
fn test_upgrade_and_config_restart_once() {
    let host = Host::new("v1.0.0");
    let service = FakeService::default();
    let probe = FileProbe::default();
    let env = EnvSnapshot::from_pairs([
        ("CATTLE_WINS_ENABLE_BINARY_UPGRADE", "true"),
        ("CATTLE_WINS_LISTEN", "wins_pipe"),
    ]);
    let options = RunOptions {
        update_config: true,
        payload: Some(host.write_payload("v2.0.0")),
        payload_version: Some("v2.0.0".to_string()),
    };

    let summary = host.runtime(&service, &probe).run(&options, &env).unwrap();

    assert!(matches!(
        summary.upgraded,
        Some(UpgradeOutcome::Upgraded { .. })
    ));
    assert!(summary.restarted);
    // stopped once by the upgrade, started once by the refresh
    assert_eq!(service.events(), vec!["open", "stop", "open", "start"]);
    assert!(!service.is_stopped());

    assert_eq!(fs::read(&host.locations.primary).unwrap(), binary("v2.0.0"));
    let saved = ConfigStore::at(&host.config_path).load().unwrap();
    assert_eq!(saved.listen, "wins_pipe");
}

#[test]
fn test_upgrade_disabled_without_gate() {
    let host = Host::new("v1.0.0");
    let service = FakeService::default();
    let probe = FileProbe::default();
    let options = RunOptions {
        payload: Some(host.write_payload("v2.0.0")),
        payload_version: Some("v2.0.0".to_string()),
        ..Default::default()
    };

    let summary = host
        .runtime(&service, &probe)
        .run(&options, &EnvSnapshot::default())
        .unwrap();

    assert_eq!(summary.upgraded, Some(UpgradeOutcome::Disabled));
    assert!(!summary.restarted);
    assert!(service.events().is_empty());
    assert_eq!(fs::read(&host.locations.primary).unwrap(), binary("v1.0.0"));
}

#[test]
fn test_failed_upgrade_restores_config_and_starts_service() {
    let host = Host::new("v1.0.0");
    let original = ConfigDocument {
        listen: "original_pipe".to_string(),
        ..Default::default()
    };
    ConfigStore::at(&host.config_path).save(&original).unwrap();

    let service = FakeService::default();
    let probe = FileProbe::default();
    // the swapped primary keeps reporting the old version
    probe.overrides.lock().unwrap().insert(
        host.locations.primary.clone(),
        "rancher-wins version v1.0.0".to_string(),
    );
    let env = EnvSnapshot::from_pairs([
        ("CATTLE_WINS_ENABLE_BINARY_UPGRADE", "true"),
        ("CATTLE_WINS_LISTEN", "new_pipe"),
    ]);
    let options = RunOptions {
        update_config: true,
        payload: Some(host.write_payload("v2.0.0")),
        payload_version: Some("v2.0.0".to_string()),
    };

    let err = host
        .runtime(&service, &probe)
        .run(&options, &env)
        .unwrap_err();

    assert!(format!("{:#}", err).contains("failed to upgrade wins binary"));
    let restored = ConfigStore::at(&host.config_path).load().unwrap();
    assert_eq!(restored, original);
    // stopped by the upgrade, one best-effort start afterwards
    assert_eq!(service.events(), vec!["open", "stop", "open", "start"]);
    assert!(!service.is_stopped());
}

#[test]
fn test_failure_before_stop_leaves_service_alone() {
    let host = Host::new("v1.0.0");
    let service = FakeService::default();
    let probe = FileProbe::default();
    let env = EnvSnapshot::from_pairs([
        ("CATTLE_WINS_ENABLE_BINARY_UPGRADE", "true"),
        ("CATTLE_WINS_DEBUG", "true"),
    ]);
    // payload reports a different version than requested
    let options = RunOptions {
        update_config: true,
        payload: Some(host.write_payload("v2.0.1")),
        payload_version: Some("v2.0.0".to_string()),
    };

    let err = host
        .runtime(&service, &probe)
        .run(&options, &env)
        .unwrap_err();

    assert!(format!("{:#}", err).contains("did not return expected version"));
    assert!(service.events().is_empty());
    // the debug change was rolled back
    let restored = ConfigStore::at(&host.config_path).load().unwrap();
    assert!(!restored.debug);
    assert_eq!(fs::read(&host.locations.primary).unwrap(), binary("v1.0.0"));
}

#[test]
fn test_missing_payload_file_reported() {
    let host = Host::new("v1.0.0");
    let service = FakeService::default();
    let probe = FileProbe::default();
    let env = EnvSnapshot::from_pairs([("CATTLE_WINS_ENABLE_BINARY_UPGRADE", "true")]);
    let options = RunOptions {
        payload: Some(host.temp.path().join("missing")),
        payload_version: Some("v2.0.0".to_string()),
        ..Default::default()
    };

    let err = host
        .runtime(&service, &probe)
        .run(&options, &env)
        .unwrap_err();

    assert!(format!("{:#}", err).contains("failed to read upgrade payload"));
    assert!(service.events().is_empty());
    assert_eq!(fs::read(&host.locations.primary).unwrap(), binary("v1.0.0"));
}

#[test]
fn test_failed_config_save_skips_upgrade() {
    let host = Host::new("v1.0.0");
    // a directory where the temp file goes makes the save fail while load still works
    fs::create_dir_all(host.config_path.with_file_name("config.tmp")).unwrap();

    let service = FakeService::default();
    let probe = FileProbe::default();
    let env = EnvSnapshot::from_pairs([
        ("CATTLE_WINS_ENABLE_BINARY_UPGRADE", "true"),
        ("CATTLE_WINS_DEBUG", "true"),
    ]);
    let options = RunOptions {
        update_config: true,
        payload: Some(host.write_payload("v2.0.0")),
        payload_version: Some("v2.0.0".to_string()),
    };

    let err = host
        .runtime(&service, &probe)
        .run(&options, &env)
        .unwrap_err();

    assert!(format!("{:#}", err).contains("failed to update rancher-wins config"));
    assert_eq!(classify(&err), Some(ErrorClass::Environmental));
    assert!(service.events().is_empty());
    assert!(!service.is_stopped());
    assert_eq!(fs::read(&host.locations.primary).unwrap(), binary("v1.0.0"));
    assert_eq!(fs::read(&host.locations.mirror).unwrap(), binary("v1.0.0"));
}

#[test]
fn test_staged_mismatch_classified_as_integrity() {
    let host = Host::new("v1.0.0");
    let service = FakeService::default();
    let probe = FileProbe::default();
    let env = EnvSnapshot::from_pairs([("CATTLE_WINS_ENABLE_BINARY_UPGRADE", "true")]);
    let options = RunOptions {
        payload: Some(host.write_payload("v2.0.1")),
        payload_version: Some("v2.0.0".to_string()),
        ..Default::default()
    };

    let err = host
        .runtime(&service, &probe)
        .run(&options, &env)
        .unwrap_err();

    let class = classify(&err);
    assert_eq!(class, Some(ErrorClass::Integrity));
    assert_eq!(exit_code(class), wins_suc::report::EXIT_INTEGRITY);
}

#[test]
fn test_error_chain_not_repeated() {
    let host = Host::new("v1.0.0");
    fs::create_dir_all(host.config_path.with_file_name("config.tmp")).unwrap();
    let service = FakeService::default();
    let probe = FileProbe::default();
    let env = EnvSnapshot::from_pairs([("CATTLE_WINS_DEBUG", "true")]);
    let options = RunOptions {
        update_config: true,
        ..Default::default()
    };

    let err = host
        .runtime(&service, &probe)
        .run(&options, &env)
        .unwrap_err();

    // save and restore both fail, each names the write failure once
    let rendered = format!("{:#}", err);
    let write_failure = format!("failed to write config {}", host.config_path.display());
    assert_eq!(rendered.matches(&write_failure).count(), 2, "{}", rendered);

    let steps = err.downcast_ref::<StepErrors>().unwrap();
    for step in steps.errors() {
        for cause in step.chain() {
            if let Some(source) = cause.source() {
                let text = cause.to_string();
                assert!(!text.contains(&source.to_string()), "'{}' repeats its cause", text);
            }
        }
    }
}
