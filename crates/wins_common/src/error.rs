//! Error classification shared by every component.
//!
//! Each module owns its own `thiserror` enum; this module only carries the
//! coarse class the entry point uses to pick its fatal log line and exit
//! status.

use std::fmt;

/// Coarse failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Operator or environment mistake (missing path, missing config)
    Input,
    /// Dirty version, verification mismatch, digest mismatch.
    /// Never downgraded to a warning.
    Integrity,
    /// I/O, subprocess or service-control failure; safe to retry a new run
    Environmental,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Input => "input",
            ErrorClass::Integrity => "integrity",
            ErrorClass::Environmental => "environmental",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
