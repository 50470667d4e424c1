//! Host-side maintenance of rancher-wins: configuration reconciliation,
//! version discovery and in-place binary upgrade.

pub mod config;
pub mod env;
pub mod error;
pub mod reconcile;
pub mod service;
pub mod state;
pub mod upgrade;
pub mod version;

pub use config::{ConfigDocument, ConfigError, ConfigStore, CsiProxyConfig};
pub use env::{EnvSnapshot, EnvVarName};
pub use error::ErrorClass;
pub use reconcile::{reconcile, ReconcileError, ReconcileOutcome};
pub use service::{ServiceControl, ServiceError, ServiceHandle, ServiceStatus, SystemServiceControl};
pub use state::InitialState;
pub use upgrade::{BinaryLocations, UpgradeError, UpgradeOutcome, Upgrader};
pub use version::{Version, VersionError, VersionKind};
