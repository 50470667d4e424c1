//! Version resolution for the managed `wins` binary.
//!
//! The binary is asked for `--version` and is expected to print exactly
//! three whitespace-separated fields, e.g. `rancher-wins version v0.4.20`.
//! Untagged builds print a commit hash in the third field, and builds from a
//! dirty tree print `<commit>-dirty`. Dirty builds are rejected here, which
//! is the single point that keeps them from being staged or installed.

use crate::error::ErrorClass;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, error};

/// Flag passed to the binary to query its version
pub const VERSION_FLAG: &str = "--version";

/// Marker that identifies a build from an unclean tree
pub const DIRTY_MARKER: &str = "dirty";

/// Number of fields the probe output must contain
const PROBE_FIELD_COUNT: usize = 3;

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("must specify a path to the wins binary")]
    MissingPath,

    #[error("provided path ({}) does not exist", .path.display())]
    NotFound { path: PathBuf },

    #[error("encountered error stat'ing '{}'", .path.display())]
    Stat { path: PathBuf, source: io::Error },

    #[error("failed to invoke {}", .path.display())]
    Spawn { path: PathBuf, source: io::Error },

    #[error("{} {} exited with {status} (output: '{output}')", .path.display(), VERSION_FLAG)]
    ExitStatus {
        path: PathBuf,
        status: String,
        output: String,
    },

    #[error("'wins {}' did not return expected output ('{output}' was returned)", VERSION_FLAG)]
    Parse { output: String },

    #[error("wins binary returned a dirty version ({version})")]
    Dirty { version: String },
}

impl VersionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VersionError::MissingPath | VersionError::NotFound { .. } => ErrorClass::Input,
            VersionError::Stat { .. }
            | VersionError::Spawn { .. }
            | VersionError::ExitStatus { .. } => ErrorClass::Environmental,
            VersionError::Parse { .. } | VersionError::Dirty { .. } => ErrorClass::Integrity,
        }
    }
}

/// Shape of a version token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    /// Tagged build, contains a `.` (e.g. `v0.4.20`, `v0.5.0-rc.1`)
    Release,
    /// Untagged build identified by commit
    Commit,
}

/// A version token that is known not to be dirty.
///
/// Equality and hashing use the canonical form, so `v1.2.3` and `1.2.3`
/// compare equal while commit hashes compare verbatim.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    raw: String,
}

impl Version {
    /// Validates a raw token. Trailing newlines and surrounding whitespace
    /// are trimmed; an empty or dirty token is rejected.
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let token = raw.trim();
        if token.is_empty() || token.split_whitespace().count() != 1 {
            return Err(VersionError::Parse {
                output: raw.to_string(),
            });
        }
        if token.contains(DIRTY_MARKER) {
            return Err(VersionError::Dirty {
                version: token.to_string(),
            });
        }
        Ok(Self {
            raw: token.to_string(),
        })
    }

    /// Token exactly as the binary reported it
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> VersionKind {
        if self.raw.contains('.') {
            VersionKind::Release
        } else {
            VersionKind::Commit
        }
    }

    pub fn is_release(&self) -> bool {
        self.kind() == VersionKind::Release
    }

    /// Comparison form: the leading `v` is stripped from release versions
    /// only. Commit hashes are left untouched.
    pub fn canonical(&self) -> &str {
        match self.kind() {
            VersionKind::Release => self.raw.strip_prefix('v').unwrap_or(&self.raw),
            VersionKind::Commit => &self.raw,
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses the combined output of `wins --version`
pub fn parse_probe_output(output: &str) -> Result<Version, VersionError> {
    let fields: Vec<&str> = output.split_whitespace().collect();
    if fields.len() != PROBE_FIELD_COUNT {
        return Err(VersionError::Parse {
            output: output.to_string(),
        });
    }

    let version = Version::parse(fields[PROBE_FIELD_COUNT - 1])?;
    debug!(
        "Detected wins version '{}' (release: {})",
        version,
        version.is_release()
    );
    Ok(version)
}

/// Runs a binary and returns what it printed for `--version`.
///
/// Production uses [`CommandProbe`]; tests substitute synthetic binaries.
pub trait VersionProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<String, VersionError>;
}

/// Executes the binary as a child process and captures stdout then stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandProbe;

impl VersionProbe for CommandProbe {
    fn probe(&self, path: &Path) -> Result<String, VersionError> {
        let output = Command::new(path)
            .arg(VERSION_FLAG)
            .output()
            .map_err(|source| {
                error!(
                    "could not invoke {} to determine installed rancher-wins version: {}",
                    path.display(),
                    source
                );
                VersionError::Spawn {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(VersionError::ExitStatus {
                path: path.to_path_buf(),
                status: output.status.to_string(),
                output: combined,
            });
        }

        Ok(combined)
    }
}

/// Resolves the version of the binary at `path` using a real child process
pub fn resolve(path: &Path) -> Result<Version, VersionError> {
    resolve_with(&CommandProbe, path)
}

/// Resolves the version of the binary at `path` through `probe`
pub fn resolve_with(probe: &dyn VersionProbe, path: &Path) -> Result<Version, VersionError> {
    if path.as_os_str().is_empty() {
        return Err(VersionError::MissingPath);
    }

    if let Err(source) = std::fs::metadata(path) {
        if source.kind() == io::ErrorKind::NotFound {
            return Err(VersionError::NotFound {
                path: path.to_path_buf(),
            });
        }
        return Err(VersionError::Stat {
            path: path.to_path_buf(),
            source,
        });
    }

    let output = probe.probe(path)?;
    debug!("'{} {}' output: {}", path.display(), VERSION_FLAG, output.trim_end());
    parse_probe_output(&output)
}
