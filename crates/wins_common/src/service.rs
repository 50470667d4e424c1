//! Control of the rancher-wins OS service.
//!
//! The upgrader only needs `open` and `stop`; the entry command also starts
//! and restarts the service. On Windows the service control manager is
//! driven through `sc.exe`, elsewhere through `systemctl`.

use crate::error::ErrorClass;
use std::fmt;
use std::io;
use std::process::Command;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Name of the service that loads the wins binary
pub const SERVICE_NAME: &str = "rancher-wins";

/// `sc.exe stop` returns immediately; poll this many times for STOPPED
const SC_STOP_POLL_ATTEMPTS: u32 = 60;
const SC_STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Exit code of `sc.exe` for a service that does not exist
const SC_ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("service {name} does not exist")]
    NotFound { name: String },

    #[error("failed to run '{command}'")]
    Spawn { command: String, source: io::Error },

    #[error("'{command}' failed for service {name}: {output}")]
    Command {
        name: String,
        command: String,
        output: String,
    },

    #[error("service {name} did not stop (last status: {last})")]
    StopIncomplete { name: String, last: ServiceStatus },
}

impl ServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::NotFound { .. } => ErrorClass::Input,
            _ => ErrorClass::Environmental,
        }
    }
}

/// Coarse run state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    Pending,
    Unknown,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Pending => "pending",
            ServiceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Locates the dependent service
pub trait ServiceControl: Send + Sync {
    fn open(&self) -> Result<Box<dyn ServiceHandle>, ServiceError>;
}

/// A bound service
pub trait ServiceHandle: Send {
    fn name(&self) -> &str;

    fn status(&self) -> Result<ServiceStatus, ServiceError>;

    /// Requests a stop and blocks until the service reports stopped
    fn stop(&self) -> Result<(), ServiceError>;

    fn start(&self) -> Result<(), ServiceError>;

    /// Stops the service if it is not already stopped, then starts it
    fn restart(&self) -> Result<(), ServiceError> {
        if self.status()? != ServiceStatus::Stopped {
            info!("Stopping {}...", self.name());
            self.stop()?;
        }
        info!("Starting {}...", self.name());
        self.start()
    }
}

/// The real OS service manager
#[derive(Debug, Clone)]
pub struct SystemServiceControl {
    name: String,
}

impl SystemServiceControl {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for SystemServiceControl {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl ServiceControl for SystemServiceControl {
    fn open(&self) -> Result<Box<dyn ServiceHandle>, ServiceError> {
        let service = SystemService {
            name: self.name.clone(),
        };
        // fails with NotFound when the unit/service is not registered
        let status = service.status()?;
        debug!("Opened service {} ({})", service.name, status);
        Ok(Box::new(service))
    }
}

#[derive(Debug)]
struct SystemService {
    name: String,
}

impl SystemService {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        let command = format!("{} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| ServiceError::Spawn {
                command: command.clone(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            command,
            code: output.status.code(),
            success: output.status.success(),
            text,
        })
    }

    fn run_checked(&self, program: &str, args: &[&str]) -> Result<(), ServiceError> {
        let out = self.run(program, args)?;
        if !out.success {
            return Err(ServiceError::Command {
                name: self.name.clone(),
                command: out.command,
                output: out.text.trim().to_string(),
            });
        }
        Ok(())
    }
}

struct CommandOutput {
    command: String,
    code: Option<i32>,
    success: bool,
    text: String,
}

impl ServiceHandle for SystemService {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> Result<ServiceStatus, ServiceError> {
        if cfg!(windows) {
            let out = self.run("sc.exe", &["query", &self.name])?;
            if out.code == Some(SC_ERROR_SERVICE_DOES_NOT_EXIST) {
                return Err(ServiceError::NotFound {
                    name: self.name.clone(),
                });
            }
            if !out.success {
                return Err(ServiceError::Command {
                    name: self.name.clone(),
                    command: out.command,
                    output: out.text.trim().to_string(),
                });
            }
            Ok(parse_sc_state(&out.text))
        } else {
            let load = self.run("systemctl", &["show", "-p", "LoadState", "--value", &self.name])?;
            if load.text.trim() == "not-found" {
                return Err(ServiceError::NotFound {
                    name: self.name.clone(),
                });
            }
            // is-active exits non-zero for anything but active
            let out = self.run("systemctl", &["is-active", &self.name])?;
            Ok(parse_systemctl_state(&out.text))
        }
    }

    fn stop(&self) -> Result<(), ServiceError> {
        // sc.exe refuses to stop a stopped service (1062)
        if self.status()? == ServiceStatus::Stopped {
            debug!("Service {} is already stopped", self.name);
            return Ok(());
        }
        if cfg!(windows) {
            self.run_checked("sc.exe", &["stop", &self.name])?;
            let mut last = ServiceStatus::Unknown;
            for _ in 0..SC_STOP_POLL_ATTEMPTS {
                last = self.status()?;
                if last == ServiceStatus::Stopped {
                    return Ok(());
                }
                thread::sleep(SC_STOP_POLL_INTERVAL);
            }
            Err(ServiceError::StopIncomplete {
                name: self.name.clone(),
                last,
            })
        } else {
            // systemctl stop blocks until the unit is inactive
            self.run_checked("systemctl", &["stop", &self.name])
        }
    }

    fn start(&self) -> Result<(), ServiceError> {
        if cfg!(windows) {
            self.run_checked("sc.exe", &["start", &self.name])
        } else {
            self.run_checked("systemctl", &["start", &self.name])
        }
    }
}

/// Reads the `STATE : <code> <NAME>` line printed by `sc.exe query`
pub fn parse_sc_state(output: &str) -> ServiceStatus {
    output
        .lines()
        .find(|line| line.trim_start().starts_with("STATE"))
        .and_then(|line| line.split_once(':'))
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|code| match code {
            "1" => ServiceStatus::Stopped,
            "4" => ServiceStatus::Running,
            "2" | "3" | "5" | "6" | "7" => ServiceStatus::Pending,
            _ => ServiceStatus::Unknown,
        })
        .unwrap_or(ServiceStatus::Unknown)
}

/// Maps the output of `systemctl is-active`
pub fn parse_systemctl_state(output: &str) -> ServiceStatus {
    match output.trim() {
        "active" | "reloading" => ServiceStatus::Running,
        "inactive" | "failed" => ServiceStatus::Stopped,
        "activating" | "deactivating" => ServiceStatus::Pending,
        _ => ServiceStatus::Unknown,
    }
}
