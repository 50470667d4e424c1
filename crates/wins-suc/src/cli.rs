//! Command line surface of wins-suc.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "wins-suc")]
#[command(about = "A way to modify rancher-wins via the Rancher System Upgrade Controller", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Turn on verbose debug logging
    #[arg(long)]
    pub debug: bool,

    /// Turn off all logging
    #[arg(long)]
    pub quiet: bool,

    /// Update the rancher-wins config file using environment variables
    #[arg(long)]
    pub update_config: bool,

    /// Config file to reconcile (defaults to CATTLE_WINS_CONFIG_DIR or the host default)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// wins binary to install when binary upgrades are enabled
    #[arg(long, value_name = "PATH")]
    pub payload: Option<PathBuf>,

    /// Version the payload reports through `--version`
    #[arg(long, value_name = "VERSION")]
    pub payload_version: Option<String>,
}

impl Cli {
    /// Filter directive for the log subscriber; `None` defers to `RUST_LOG`
    pub fn log_directive(&self) -> Option<&'static str> {
        if self.quiet {
            Some("off")
        } else if self.debug {
            Some("debug")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from([
            "wins-suc",
            "--update-config",
            "--payload",
            "/tmp/wins",
            "--payload-version",
            "v0.4.21",
        ]);
        assert!(cli.update_config);
        assert_eq!(cli.payload, Some(PathBuf::from("/tmp/wins")));
        assert_eq!(cli.payload_version.as_deref(), Some("v0.4.21"));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_log_directive() {
        assert_eq!(Cli::parse_from(["wins-suc"]).log_directive(), None);
        assert_eq!(
            Cli::parse_from(["wins-suc", "--debug"]).log_directive(),
            Some("debug")
        );
        // quiet wins over debug
        assert_eq!(
            Cli::parse_from(["wins-suc", "--debug", "--quiet"]).log_directive(),
            Some("off")
        );
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
