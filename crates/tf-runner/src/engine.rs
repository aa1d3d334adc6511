//! IaC engine contract.
//!
//! Stages talk to Terraform only through [`IacEngine`], so the pipeline can be
//! exercised against [`crate::fakes::RecordingEngine`] in tests.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::Result;

/// A single `-var` passed to Terraform.
///
/// Values are literal strings; structured values must be pre-rendered by the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfVar {
    pub name: String,
    pub value: String,
}

impl TfVar {
    /// Create a variable from anything with a `Display` rendering
    /// (integers render in decimal).
    pub fn new(name: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }

    /// Create a boolean variable rendered as `true` / `false`.
    pub fn flag(name: impl Into<String>, value: bool) -> Self {
        Self::new(name, if value { "true" } else { "false" })
    }

    /// Render as a Terraform CLI argument.
    pub fn to_arg(&self) -> String {
        format!("-var={}={}", self.name, self.value)
    }
}

/// Options for `terraform init`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitOptions {
    /// Copy existing local state into the configured remote backend.
    pub migrate_state: bool,
}

impl InitOptions {
    pub fn migrate() -> Self {
        Self {
            migrate_state: true,
        }
    }
}

/// One plan/apply/destroy invocation.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Working directory of the stage.
    pub dir: &'a Path,

    /// Var files in override order (later wins).
    pub var_files: &'a [PathBuf],

    /// Extra `-var` values appended after the var files.
    pub vars: &'a [TfVar],
}

impl<'a> Invocation<'a> {
    pub fn new(dir: &'a Path, var_files: &'a [PathBuf], vars: &'a [TfVar]) -> Self {
        Self {
            dir,
            var_files,
            vars,
        }
    }

    /// Var-file and var arguments in the order Terraform should see them.
    pub fn var_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.var_files.len() + self.vars.len());
        for file in self.var_files {
            args.push(format!("-var-file={}", file.display()));
        }
        args.extend(self.vars.iter().map(TfVar::to_arg));
        args
    }
}

/// The external infrastructure-as-code engine.
#[async_trait]
pub trait IacEngine: Send + Sync {
    /// Prepare the working directory and backend.
    async fn init(&self, dir: &Path, options: InitOptions) -> Result<()>;

    /// Evaluate changes without touching cloud resources.
    async fn plan(&self, invocation: Invocation<'_>) -> Result<()>;

    /// Reconcile towards the configuration.
    async fn apply(&self, invocation: Invocation<'_>) -> Result<()>;

    /// Tear down everything in the stage's state.
    async fn destroy(&self, invocation: Invocation<'_>) -> Result<()>;

    /// Read a root module output as a raw string.
    async fn output(&self, dir: &Path, name: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tfvar_rendering() {
        assert_eq!(TfVar::new("region", "us-central1").to_arg(), "-var=region=us-central1");
        assert_eq!(TfVar::new("count", 3).value, "3");
        assert_eq!(TfVar::flag("enable_rag", true).value, "true");
        assert_eq!(TfVar::flag("enable_rag", false).value, "false");
    }

    #[test]
    fn test_invocation_orders_files_before_vars() {
        let dir = PathBuf::from("/tmp/stage");
        let files = vec![PathBuf::from("/a.tfvars.json"), PathBuf::from("/b.tfvars.json")];
        let vars = vec![TfVar::new("region", "europe-west1")];
        let args = Invocation::new(&dir, &files, &vars).var_args();

        assert_eq!(
            args,
            vec![
                "-var-file=/a.tfvars.json".to_string(),
                "-var-file=/b.tfvars.json".to_string(),
                "-var=region=europe-west1".to_string(),
            ]
        );
    }

    #[test]
    fn test_init_options_default_is_plain() {
        let opts = InitOptions::default();
        assert!(!opts.migrate_state);
        assert!(InitOptions::migrate().migrate_state);
    }
}
