//! In-place upgrade of the wins binary.
//!
//! Guarantees:
//! 1. A dirty version is never staged or installed
//! 2. The service is not touched unless the new binary was written and
//!    reported exactly the desired version
//! 3. Equal versions are a no-op: no disk writes, no service calls
//! 4. Re-running after an interruption does not fail because of leftovers
//!
//! Steps:
//! 1. resolve_current (`--version` of the primary binary)
//! 2. validate_desired
//! 3. compare_versions
//! 4. stage_binary (payload → `<config dir>/wins-<desired>`)
//! 5. verify_staged (digest, then `--version`)
//! 6. stop_service
//! 7. swap_primary (primary → `<config dir>/wins-<current>`, staged copied to primary)
//! 8. swap_mirror (staged renamed onto the mirror)
//! 9. verify_swapped (`--version` of the primary)
//! 10. cleanup_old_binary
//!
//! Once the service is stopped there is no automatic binary rollback; every
//! error names the paths and versions involved so an operator can recover.

pub mod error;
pub mod locations;
pub mod payload;
pub mod steps;

pub use error::{UpgradeError, UpgradeStep};
pub use locations::BinaryLocations;
pub use payload::{FilePayload, PayloadError, PayloadProvider, StaticPayload};
pub use steps::{cleanup_old_binary, UpgradeOutcome, UpgradeRequest, Upgrader};

use crate::env::EnvVarName;

/// Opt-in gate; upgrades are never attempted unless this is `true`
pub const ENABLE_UPGRADE_ENV_VAR: EnvVarName = EnvVarName::Namespaced("enable_binary_upgrade");

/// Path to the payload binary, used by the entry command
pub const PAYLOAD_PATH_ENV_VAR: EnvVarName = EnvVarName::Namespaced("upgrade_payload");

/// Version the payload binary reports, used by the entry command
pub const PAYLOAD_VERSION_ENV_VAR: EnvVarName = EnvVarName::Namespaced("upgrade_version");
