//! Upgrade execution steps.
//!
//! Everything up to `stop_service` can be undone by discarding the staged
//! file. From `swap_primary` on the service is down and the priority is
//! forward progress to a verified binary; nothing is rolled back.

use super::error::UpgradeError;
use super::locations::BinaryLocations;
use super::payload::{sha256_hex, PayloadProvider};
use super::ENABLE_UPGRADE_ENV_VAR;
use crate::env::EnvSnapshot;
use crate::service::ServiceControl;
use crate::version::{resolve_with, CommandProbe, Version, VersionProbe};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// `EXDEV`: rename across filesystems
#[cfg(unix)]
const CROSS_DEVICE_LINK: i32 = 18;

/// Versions an upgrade moves between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    current: Version,
    desired: Version,
}

impl UpgradeRequest {
    pub fn new(current: Version, desired: Version) -> Self {
        Self { current, desired }
    }

    pub fn current(&self) -> &Version {
        &self.current
    }

    pub fn desired(&self) -> &Version {
        &self.desired
    }

    /// Installed version already matches
    pub fn is_noop(&self) -> bool {
        self.current == self.desired
    }
}

/// How an upgrade run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Opt-in variable not set
    Disabled,
    /// Installed version already matches
    UpToDate { version: Version },
    /// New binary installed and verified
    Upgraded { from: Version, to: Version },
}

impl UpgradeOutcome {
    pub fn restart_required(&self) -> bool {
        matches!(self, UpgradeOutcome::Upgraded { .. })
    }
}

/// Replaces the installed wins binary with the payload
pub struct Upgrader<'a> {
    locations: BinaryLocations,
    payload: &'a dyn PayloadProvider,
    service: &'a dyn ServiceControl,
    probe: &'a dyn VersionProbe,
}

impl<'a> Upgrader<'a> {
    pub fn new(
        locations: BinaryLocations,
        payload: &'a dyn PayloadProvider,
        service: &'a dyn ServiceControl,
    ) -> Self {
        Self {
            locations,
            payload,
            service,
            probe: &CommandProbe,
        }
    }

    /// Replaces the process-based version probe
    pub fn with_probe(mut self, probe: &'a dyn VersionProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Runs the upgrade if `CATTLE_WINS_ENABLE_BINARY_UPGRADE` is true
    pub fn run(&self, env: &EnvSnapshot) -> Result<UpgradeOutcome, UpgradeError> {
        if !env.is_truthy(&ENABLE_UPGRADE_ENV_VAR.name()) {
            info!(
                "{} is not set to true, will not attempt to upgrade the wins binary",
                ENABLE_UPGRADE_ENV_VAR
            );
            return Ok(UpgradeOutcome::Disabled);
        }
        self.upgrade()
    }

    /// Runs the upgrade unconditionally
    pub fn upgrade(&self) -> Result<UpgradeOutcome, UpgradeError> {
        let request = self.plan()?;

        if request.is_noop() {
            info!(
                "Installed wins version is already up-to-date ({})",
                request.current()
            );
            return Ok(UpgradeOutcome::UpToDate {
                version: request.current,
            });
        }

        info!(
            "Attempting to upgrade wins from {} to {}",
            request.current(),
            request.desired()
        );
        self.execute(&request)?;

        info!("Successfully upgraded wins to version {}", request.desired());
        Ok(UpgradeOutcome::Upgraded {
            from: request.current,
            to: request.desired,
        })
    }

    /// Resolves the installed version and validates the desired one.
    /// Touches neither disk nor service.
    pub fn plan(&self) -> Result<UpgradeRequest, UpgradeError> {
        let primary = &self.locations.primary;
        let current = resolve_with(self.probe, primary).map_err(|source| {
            UpgradeError::ResolveCurrent {
                path: primary.clone(),
                source,
            }
        })?;

        // never install a dirty build onto a host
        let raw = self.payload.version();
        let desired = Version::parse(raw).map_err(|source| UpgradeError::InvalidDesired {
            version: raw.to_string(),
            source,
        })?;

        Ok(UpgradeRequest::new(current, desired))
    }

    /// Stage, verify, stop, swap, verify, clean up
    pub fn execute(&self, request: &UpgradeRequest) -> Result<(), UpgradeError> {
        let staged = self.stage_binary(request.desired())?;
        self.verify_staged(&staged, request.desired())?;
        self.stop_service()?;

        let old_binary = self.swap_primary(&staged, request.current())?;
        self.swap_mirror(&staged)?;
        self.verify_swapped(request.desired())?;

        info!(
            "Removing out-dated wins binary ({})",
            old_binary.display()
        );
        cleanup_old_binary(&old_binary)
    }

    fn stage_binary(&self, desired: &Version) -> Result<PathBuf, UpgradeError> {
        let staged = self.locations.staging_path(desired);
        info!("Writing updated wins binary to {}", staged.display());

        let bytes = self.payload.bytes()?;
        let stage_err = |source| UpgradeError::Stage {
            path: staged.clone(),
            source,
        };

        fs::create_dir_all(&self.locations.config_dir).map_err(stage_err)?;
        fs::write(&staged, bytes.as_ref()).map_err(stage_err)?;
        make_executable(&staged).map_err(stage_err)?;

        // read back before anything executes it
        let written = fs::read(&staged).map_err(stage_err)?;
        let expected = sha256_hex(bytes.as_ref());
        let actual = sha256_hex(&written);
        if expected != actual {
            let reason = format!("sha256 expected {}, found {}", expected, actual);
            discard_staged(&staged, reason)?;
            return Err(UpgradeError::StagedDigestMismatch {
                path: staged,
                expected,
                actual,
            });
        }
        debug!("Staged {} (sha256 {})", staged.display(), actual);

        Ok(staged)
    }

    fn verify_staged(&self, staged: &Path, desired: &Version) -> Result<(), UpgradeError> {
        let reported =
            resolve_with(self.probe, staged).map_err(|source| UpgradeError::VerifyStaged {
                path: staged.to_path_buf(),
                source,
            })?;

        if &reported != desired {
            let reason = format!(
                "desired version: {}, returned version: {}",
                desired, reported
            );
            discard_staged(staged, reason)?;
            return Err(UpgradeError::StagedVersionMismatch {
                path: staged.to_path_buf(),
                expected: desired.to_string(),
                actual: reported.to_string(),
            });
        }

        info!("Staged binary {} reports {}", staged.display(), reported);
        Ok(())
    }

    fn stop_service(&self) -> Result<(), UpgradeError> {
        let handle = self
            .service
            .open()
            .map_err(|source| UpgradeError::OpenService {
                service: crate::service::SERVICE_NAME.to_string(),
                source,
            })?;

        info!("Stopping {}...", handle.name());
        // the binary cannot be replaced while the service holds it
        handle.stop().map_err(|source| UpgradeError::StopService {
            service: handle.name().to_string(),
            source,
        })
    }

    /// Moves the installed binary aside and copies the staged one in.
    /// Returns where the old binary went.
    fn swap_primary(&self, staged: &Path, current: &Version) -> Result<PathBuf, UpgradeError> {
        let primary = &self.locations.primary;
        let old_binary = self.locations.staging_path(current);

        info!("Moving {} to {}", primary.display(), old_binary.display());
        move_file(primary, &old_binary).map_err(|source| {
            error!("wins service is stopped and {} could not be moved", primary.display());
            UpgradeError::RenamePrimary {
                from: primary.clone(),
                to: old_binary.clone(),
                source,
            }
        })?;

        info!("Copying {} to {}", staged.display(), primary.display());
        fs::copy(staged, primary).map_err(|source| {
            error!(
                "wins service is stopped and {} is missing; the previous binary is at {}",
                primary.display(),
                old_binary.display()
            );
            UpgradeError::CopyPrimary {
                from: staged.to_path_buf(),
                to: primary.clone(),
                source,
            }
        })?;

        Ok(old_binary)
    }

    fn swap_mirror(&self, staged: &Path) -> Result<(), UpgradeError> {
        let mirror = &self.locations.mirror;
        info!("Moving {} to {}", staged.display(), mirror.display());

        let mirror_err = |source| {
            error!("{} is updated but {} is stale", self.locations.primary.display(), mirror.display());
            UpgradeError::RenameMirror {
                from: staged.to_path_buf(),
                to: mirror.clone(),
                source,
            }
        };

        if let Some(parent) = mirror.parent() {
            fs::create_dir_all(parent).map_err(mirror_err)?;
        }
        move_file(staged, mirror).map_err(mirror_err)
    }

    fn verify_swapped(&self, desired: &Version) -> Result<(), UpgradeError> {
        let primary = &self.locations.primary;
        info!("Validating updated binary...");

        let installed =
            resolve_with(self.probe, primary).map_err(|source| UpgradeError::VerifySwapped {
                path: primary.clone(),
                source,
            })?;

        if &installed != desired {
            error!(
                "{} reports {} after upgrade to {}; manual recovery required",
                primary.display(),
                installed,
                desired
            );
            return Err(UpgradeError::InstalledVersionMismatch {
                path: primary.clone(),
                expected: desired.to_string(),
                actual: installed.to_string(),
            });
        }
        Ok(())
    }
}

/// Deletes the binary left behind by a swap. Already absent is success,
/// since an interrupted earlier run may have removed it.
pub fn cleanup_old_binary(path: &Path) -> Result<(), UpgradeError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Old wins binary {} already removed", path.display());
            Ok(())
        }
        Err(source) => Err(UpgradeError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn discard_staged(staged: &Path, reason: String) -> Result<(), UpgradeError> {
    warn!("Discarding {} ({})", staged.display(), reason);
    fs::remove_file(staged).map_err(|source| UpgradeError::DiscardStaged {
        path: staged.to_path_buf(),
        reason,
        source,
    })
}

/// Rename, falling back to copy + delete across filesystems
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        #[cfg(unix)]
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_LINK) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_request_noop_uses_canonical_form() {
        let request = UpgradeRequest::new(
            Version::parse("v0.4.20").unwrap(),
            Version::parse("0.4.20").unwrap(),
        );
        assert!(request.is_noop());

        let request = UpgradeRequest::new(
            Version::parse("abc1234").unwrap(),
            Version::parse("v0.4.20").unwrap(),
        );
        assert!(!request.is_noop());
    }

    #[test]
    fn test_outcome_restart() {
        let v = Version::parse("v1.0.0").unwrap();
        assert!(!UpgradeOutcome::Disabled.restart_required());
        assert!(!UpgradeOutcome::UpToDate { version: v.clone() }.restart_required());
        assert!(UpgradeOutcome::Upgraded {
            from: Version::parse("v0.9.0").unwrap(),
            to: v
        }
        .restart_required());
    }

    #[test]
    fn test_cleanup_twice_is_ok() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("wins-v0.9.0");
        fs::write(&old, b"old").unwrap();

        cleanup_old_binary(&old).unwrap();
        assert!(!old.exists());
        cleanup_old_binary(&old).unwrap();
    }

    #[test]
    fn test_cleanup_other_error_reported() {
        let temp = TempDir::new().unwrap();
        // removing a directory with remove_file fails with something other than NotFound
        let err = cleanup_old_binary(temp.path()).unwrap_err();
        assert!(matches!(err, UpgradeError::Cleanup { .. }));
        assert!(err.restart_required());
    }

    #[test]
    fn test_move_file() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("a");
        let to = temp.path().join("b");
        fs::write(&from, b"payload").unwrap();
        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"payload");
    }
}
