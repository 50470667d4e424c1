//! Source of the bytes to install.

use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("failed to read upgrade payload {}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("upgrade payload {} is empty", .path.display())]
    Empty { path: PathBuf },
}

/// Supplies the new binary and the version it is expected to report
pub trait PayloadProvider: Send + Sync {
    /// Version the payload reports through `--version`
    fn version(&self) -> &str;

    fn bytes(&self) -> Result<Cow<'_, [u8]>, PayloadError>;
}

/// Payload held in memory, e.g. bytes embedded with `include_bytes!`
#[derive(Debug, Clone)]
pub struct StaticPayload {
    version: String,
    bytes: Cow<'static, [u8]>,
}

impl StaticPayload {
    pub fn new(version: impl Into<String>, bytes: impl Into<Cow<'static, [u8]>>) -> Self {
        Self {
            version: version.into(),
            bytes: bytes.into(),
        }
    }
}

impl PayloadProvider for StaticPayload {
    fn version(&self) -> &str {
        &self.version
    }

    fn bytes(&self) -> Result<Cow<'_, [u8]>, PayloadError> {
        Ok(Cow::Borrowed(self.bytes.as_ref()))
    }
}

/// Payload read from a file shipped next to the upgrader
#[derive(Debug, Clone)]
pub struct FilePayload {
    version: String,
    path: PathBuf,
}

impl FilePayload {
    pub fn new(version: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PayloadProvider for FilePayload {
    fn version(&self) -> &str {
        &self.version
    }

    fn bytes(&self) -> Result<Cow<'_, [u8]>, PayloadError> {
        let bytes = fs::read(&self.path).map_err(|source| PayloadError::Read {
            path: self.path.clone(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(PayloadError::Empty {
                path: self.path.clone(),
            });
        }
        Ok(Cow::Owned(bytes))
    }
}

/// Lowercase hex sha256
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
