//! wins-suc: reconfigures and upgrades rancher-wins when run by the
//! Rancher System Upgrade Controller.

pub mod cli;
pub mod report;
pub mod runtime;

pub use cli::Cli;
pub use report::{classify, combine_errors, exit_code, is_end_of_input, StepErrors};
pub use runtime::{RunOptions, RunSummary, Runtime};
