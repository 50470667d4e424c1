//! Upgrade failures, one variant per way a step can fail.

use super::payload::PayloadError;
use crate::error::ErrorClass;
use crate::service::ServiceError;
use crate::version::VersionError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Steps of the upgrade, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpgradeStep {
    ResolveCurrent,
    ValidateDesired,
    StageBinary,
    VerifyStaged,
    StopService,
    SwapPrimary,
    SwapMirror,
    VerifySwapped,
    CleanupOldBinary,
}

impl UpgradeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeStep::ResolveCurrent => "resolve_current",
            UpgradeStep::ValidateDesired => "validate_desired",
            UpgradeStep::StageBinary => "stage_binary",
            UpgradeStep::VerifyStaged => "verify_staged",
            UpgradeStep::StopService => "stop_service",
            UpgradeStep::SwapPrimary => "swap_primary",
            UpgradeStep::SwapMirror => "swap_mirror",
            UpgradeStep::VerifySwapped => "verify_swapped",
            UpgradeStep::CleanupOldBinary => "cleanup_old_binary",
        }
    }
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("could not determine current wins version from {}", .path.display())]
    ResolveCurrent {
        path: PathBuf,
        source: VersionError,
    },

    #[error("refusing to install wins version '{version}'")]
    InvalidDesired {
        version: String,
        source: VersionError,
    },

    #[error("failed to load embedded wins binary")]
    Payload(#[from] PayloadError),

    #[error("failed to write updated wins binary to {}", .path.display())]
    Stage { path: PathBuf, source: io::Error },

    #[error("{} does not match the payload (sha256 expected {expected}, found {actual})", .path.display())]
    StagedDigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("was not able to determine version of {}", .path.display())]
    VerifyStaged {
        path: PathBuf,
        source: VersionError,
    },

    #[error("{} did not return expected version (desired version: {expected}, returned version: {actual})", .path.display())]
    StagedVersionMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("failed to delete rejected binary {} ({reason})", .path.display())]
    DiscardStaged {
        path: PathBuf,
        reason: String,
        source: io::Error,
    },

    #[error("failed to open {service} service while attempting to upgrade binary")]
    OpenService {
        service: String,
        source: ServiceError,
    },

    #[error("failed to stop {service} service while attempting to upgrade binary")]
    StopService {
        service: String,
        source: ServiceError,
    },

    #[error("failed to rename existing wins binary {} to {}", .from.display(), .to.display())]
    RenamePrimary {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("failed to copy new wins binary {} to {}", .from.display(), .to.display())]
    CopyPrimary {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("failed to rename new wins binary {} to {}", .from.display(), .to.display())]
    RenameMirror {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("failed to get version of updated wins binary {}", .path.display())]
    VerifySwapped {
        path: PathBuf,
        source: VersionError,
    },

    #[error("failed to verify version of updated wins binary {} (returned version: {actual}, desired version: {expected})", .path.display())]
    InstalledVersionMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("error encountered deleting old wins binary {}", .path.display())]
    Cleanup { path: PathBuf, source: io::Error },
}

impl UpgradeError {
    /// Step the upgrade stopped in
    pub fn step(&self) -> UpgradeStep {
        match self {
            UpgradeError::ResolveCurrent { .. } => UpgradeStep::ResolveCurrent,
            UpgradeError::InvalidDesired { .. } => UpgradeStep::ValidateDesired,
            UpgradeError::Payload(_) | UpgradeError::Stage { .. } => UpgradeStep::StageBinary,
            UpgradeError::StagedDigestMismatch { .. }
            | UpgradeError::VerifyStaged { .. }
            | UpgradeError::StagedVersionMismatch { .. }
            | UpgradeError::DiscardStaged { .. } => UpgradeStep::VerifyStaged,
            UpgradeError::OpenService { .. } | UpgradeError::StopService { .. } => {
                UpgradeStep::StopService
            }
            UpgradeError::RenamePrimary { .. } | UpgradeError::CopyPrimary { .. } => {
                UpgradeStep::SwapPrimary
            }
            UpgradeError::RenameMirror { .. } => UpgradeStep::SwapMirror,
            UpgradeError::VerifySwapped { .. } | UpgradeError::InstalledVersionMismatch { .. } => {
                UpgradeStep::VerifySwapped
            }
            UpgradeError::Cleanup { .. } => UpgradeStep::CleanupOldBinary,
        }
    }

    /// The service was stopped before this failure and was left stopped
    pub fn service_stopped(&self) -> bool {
        self.step() >= UpgradeStep::SwapPrimary
    }

    /// Host is not in a known-good state (service down or binaries unverified)
    pub fn is_degraded(&self) -> bool {
        self.service_stopped() && self.step() != UpgradeStep::CleanupOldBinary
    }

    /// The new binary is installed and verified; only the old copy lingers
    pub fn restart_required(&self) -> bool {
        self.step() == UpgradeStep::CleanupOldBinary
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            UpgradeError::ResolveCurrent { source, .. }
            | UpgradeError::VerifyStaged { source, .. }
            | UpgradeError::VerifySwapped { source, .. } => source.class(),
            UpgradeError::InvalidDesired { .. }
            | UpgradeError::StagedDigestMismatch { .. }
            | UpgradeError::StagedVersionMismatch { .. }
            | UpgradeError::InstalledVersionMismatch { .. } => ErrorClass::Integrity,
            UpgradeError::OpenService { source, .. } | UpgradeError::StopService { source, .. } => {
                source.class()
            }
            UpgradeError::Payload(_)
            | UpgradeError::Stage { .. }
            | UpgradeError::DiscardStaged { .. }
            | UpgradeError::RenamePrimary { .. }
            | UpgradeError::CopyPrimary { .. }
            | UpgradeError::RenameMirror { .. }
            | UpgradeError::Cleanup { .. } => ErrorClass::Environmental,
        }
    }
}
