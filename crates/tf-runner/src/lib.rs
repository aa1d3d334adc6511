//! tf-runner: Terraform Integration for Pastures
//!
//! This crate is the IaC engine layer. It runs the external `terraform`
//! binary in a stage working directory with an ordered list of var files and
//! extra variables, and reads root module outputs.
//!
//! ## Key Components
//!
//! - `IacEngine`: the engine contract used by stages
//! - `TerraformCli`: process-backed implementation
//! - `TfVar`: a literal `-var` value
//! - `fakes::RecordingEngine`: call-recording fake for tests

pub mod cli;
pub mod engine;
mod error;
pub mod fakes;

pub use cli::TerraformCli;
pub use engine::{IacEngine, InitOptions, Invocation, TfVar};
pub use error::TfError;

/// Result type for tf-runner operations
pub type Result<T> = std::result::Result<T, TfError>;

/// Check if the given Terraform binary can be executed
pub async fn is_terraform_available(binary: impl AsRef<std::ffi::OsStr>) -> bool {
    tokio::process::Command::new(binary)
        .arg("version")
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}
