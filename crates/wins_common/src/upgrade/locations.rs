//! The three places a wins binary lives.

use crate::version::Version;
use std::env::consts::EXE_SUFFIX;
use std::path::{Path, PathBuf};

#[cfg(windows)]
mod defaults {
    pub const PRIMARY: &str = r"c:\Windows\wins.exe";
    pub const MIRROR: &str = r"c:\usr\local\bin\wins.exe";
    pub const CONFIG_DIR: &str = r"c:\etc\rancher\wins";
}

#[cfg(not(windows))]
mod defaults {
    pub const PRIMARY: &str = "/usr/bin/wins";
    pub const MIRROR: &str = "/usr/local/bin/wins";
    pub const CONFIG_DIR: &str = "/etc/rancher/wins";
}

/// Binary locations on the host.
///
/// `primary` is what the service loads. `mirror` is kept identical for
/// consistency but never loaded. Staging files live in `config_dir` and are
/// named after a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryLocations {
    pub primary: PathBuf,
    pub mirror: PathBuf,
    pub config_dir: PathBuf,
}

impl BinaryLocations {
    pub fn new(
        primary: impl Into<PathBuf>,
        mirror: impl Into<PathBuf>,
        config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            primary: primary.into(),
            mirror: mirror.into(),
            config_dir: config_dir.into(),
        }
    }

    /// Layout rooted somewhere other than `/`, for tests and image builds
    pub fn under(root: &Path) -> Self {
        let strip = |p: &str| {
            let rel = p
                .trim_start_matches(|c| c == '/' || c == '\\')
                .trim_start_matches("c:\\");
            root.join(rel)
        };
        Self::new(
            strip(defaults::PRIMARY),
            strip(defaults::MIRROR),
            strip(defaults::CONFIG_DIR),
        )
    }

    /// `<config dir>/wins-<version><exe suffix>`
    pub fn staging_path(&self, version: &Version) -> PathBuf {
        self.config_dir
            .join(format!("wins-{}{}", version.as_str(), EXE_SUFFIX))
    }
}

impl Default for BinaryLocations {
    fn default() -> Self {
        Self::new(defaults::PRIMARY, defaults::MIRROR, defaults::CONFIG_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_uses_raw_version() {
        let locations = BinaryLocations::new("/p/wins", "/m/wins", "/etc/rancher/wins");
        let v = Version::parse("v0.4.20\n").unwrap();
        let expected = format!("wins-v0.4.20{}", EXE_SUFFIX);
        assert_eq!(
            locations.staging_path(&v),
            Path::new("/etc/rancher/wins").join(expected)
        );
    }

    #[test]
    fn test_under_root() {
        let root = Path::new("/tmp/host");
        let locations = BinaryLocations::under(root);
        assert!(locations.primary.starts_with(root));
        assert!(locations.mirror.starts_with(root));
        assert!(locations.config_dir.starts_with(root));
        assert_ne!(locations.primary, locations.mirror);
    }
}
