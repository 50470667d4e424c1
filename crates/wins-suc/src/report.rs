//! Turning run failures into a log line and an exit status.

use std::io;
use thiserror::Error;
use wins_common::config::ConfigError;
use wins_common::reconcile::ReconcileError;
use wins_common::service::ServiceError;
use wins_common::upgrade::{PayloadError, UpgradeError};
use wins_common::version::VersionError;
use wins_common::ErrorClass;

/// Exit status per error class
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_INPUT: i32 = 2;
pub const EXIT_INTEGRITY: i32 = 3;

/// Several steps failed in one run; each keeps its own cause chain
#[derive(Error, Debug)]
#[error("{} steps failed: {}", .0.len(), render(.0))]
pub struct StepErrors(Vec<anyhow::Error>);

impl StepErrors {
    pub fn errors(&self) -> &[anyhow::Error] {
        &self.0
    }
}

fn render(errors: &[anyhow::Error]) -> String {
    errors
        .iter()
        .map(|e| format!("{:#}", e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Joins every step error into one, keeping a lone error intact
pub fn combine_errors(mut errors: Vec<anyhow::Error>) -> anyhow::Error {
    if errors.len() == 1 {
        if let Some(only) = errors.pop() {
            return only;
        }
    }
    anyhow::Error::new(StepErrors(errors))
}

fn severity(class: ErrorClass) -> u8 {
    match class {
        ErrorClass::Environmental => 0,
        ErrorClass::Input => 1,
        ErrorClass::Integrity => 2,
    }
}

/// Class of the outermost library error in the chain. For joined step
/// errors, the most severe class among them.
pub fn classify(err: &anyhow::Error) -> Option<ErrorClass> {
    if let Some(steps) = err.downcast_ref::<StepErrors>() {
        return steps
            .errors()
            .iter()
            .filter_map(classify)
            .max_by_key(|class| severity(*class));
    }

    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<UpgradeError>() {
            Some(e.class())
        } else if let Some(e) = cause.downcast_ref::<ReconcileError>() {
            Some(e.class())
        } else if let Some(e) = cause.downcast_ref::<ConfigError>() {
            Some(e.class())
        } else if let Some(e) = cause.downcast_ref::<VersionError>() {
            Some(e.class())
        } else if let Some(e) = cause.downcast_ref::<ServiceError>() {
            Some(e.class())
        } else if cause.downcast_ref::<PayloadError>().is_some() {
            Some(ErrorClass::Environmental)
        } else {
            None
        }
    })
}

/// Errors caused by end of input exit cleanly. Joined errors qualify only
/// when every step ended that way.
pub fn is_end_of_input(err: &anyhow::Error) -> bool {
    if let Some(steps) = err.downcast_ref::<StepErrors>() {
        return steps.errors().iter().all(is_end_of_input);
    }
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::UnexpectedEof)
    })
}

pub fn exit_code(class: Option<ErrorClass>) -> i32 {
    match class {
        Some(ErrorClass::Integrity) => EXIT_INTEGRITY,
        Some(ErrorClass::Input) => EXIT_INPUT,
        Some(ErrorClass::Environmental) | None => EXIT_FAILURE,
    }
}
