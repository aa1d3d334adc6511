//! Terraform CLI invoker.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};

use crate::engine::{IacEngine, InitOptions, Invocation};
use crate::error::TfError;
use crate::Result;

/// Runs the `terraform` binary as a child process.
///
/// Stdout is only forwarded when `verbose` is set; stderr is always inherited
/// so failures stay visible. The child is killed if the returned future is
/// dropped (e.g. on Ctrl-C).
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: PathBuf,
    verbose: bool,
}

impl TerraformCli {
    pub fn new(binary: impl Into<PathBuf>, verbose: bool) -> Self {
        Self {
            binary: binary.into(),
            verbose,
        }
    }

    fn command(&self, dir: &Path, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, subcommand: &str, dir: &Path, args: Vec<String>) -> Result<()> {
        let start = Instant::now();
        debug!(subcommand, dir = %dir.display(), ?args, "Running terraform");

        let status = self
            .command(dir, &args)
            .stdout(if self.verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let duration_ms = start.elapsed().as_millis() as u64;
        if !status.success() {
            return Err(TfError::CommandFailed {
                command: subcommand.to_string(),
                code: status.code(),
            });
        }

        info!(subcommand, duration_ms, "terraform finished");
        Ok(())
    }

    fn spawn_error(&self, err: std::io::Error) -> TfError {
        if err.kind() == std::io::ErrorKind::NotFound {
            TfError::BinaryNotFound(self.binary.display().to_string())
        } else {
            TfError::Io(err)
        }
    }
}

/// Arguments for `terraform init`.
pub fn init_args(options: InitOptions) -> Vec<String> {
    let mut args = vec!["init".to_string(), "-input=false".to_string()];
    if options.migrate_state {
        args.push("-migrate-state".to_string());
        args.push("-force-copy".to_string());
    }
    args
}

/// Arguments for plan/apply/destroy.
pub fn run_args(subcommand: &str, invocation: &Invocation<'_>) -> Vec<String> {
    let mut args = vec![subcommand.to_string(), "-input=false".to_string()];
    if subcommand != "plan" {
        args.push("-auto-approve".to_string());
    }
    args.extend(invocation.var_args());
    args
}

#[async_trait]
impl IacEngine for TerraformCli {
    async fn init(&self, dir: &Path, options: InitOptions) -> Result<()> {
        self.run("init", dir, init_args(options)).await
    }

    async fn plan(&self, invocation: Invocation<'_>) -> Result<()> {
        self.run("plan", invocation.dir, run_args("plan", &invocation))
            .await
    }

    async fn apply(&self, invocation: Invocation<'_>) -> Result<()> {
        self.run("apply", invocation.dir, run_args("apply", &invocation))
            .await
    }

    async fn destroy(&self, invocation: Invocation<'_>) -> Result<()> {
        self.run("destroy", invocation.dir, run_args("destroy", &invocation))
            .await
    }

    async fn output(&self, dir: &Path, name: &str) -> Result<String> {
        let args = vec!["output".to_string(), "-raw".to_string(), name.to_string()];
        let output = self
            .command(dir, &args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            debug!(
                name,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "terraform output failed"
            );
            return Err(TfError::OutputMissing(name.to_string()));
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() {
            return Err(TfError::OutputMissing(name.to_string()));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TfVar;
    use tempfile::tempdir;

    #[test]
    fn test_init_args() {
        assert_eq!(init_args(InitOptions::default()), vec!["init", "-input=false"]);
        assert_eq!(
            init_args(InitOptions::migrate()),
            vec!["init", "-input=false", "-migrate-state", "-force-copy"]
        );
    }

    #[test]
    fn test_run_args_auto_approve() {
        let dir = PathBuf::from(".");
        let files = vec![PathBuf::from("/cfg/pastures.tfvars.json")];
        let vars = vec![TfVar::flag("enable_rag", false)];
        let invocation = Invocation::new(&dir, &files, &vars);

        let plan = run_args("plan", &invocation);
        assert!(!plan.contains(&"-auto-approve".to_string()));

        let apply = run_args("apply", &invocation);
        assert_eq!(apply[0], "apply");
        assert!(apply.contains(&"-auto-approve".to_string()));
        assert_eq!(apply.last().unwrap(), "-var=enable_rag=false");
    }

    #[tokio::test]
    async fn test_successful_command() {
        let dir = tempdir().unwrap();
        let cli = TerraformCli::new("true", false);
        cli.init(dir.path(), InitOptions::default())
            .await
            .expect("init failed");
    }

    #[tokio::test]
    async fn test_failing_command() {
        let dir = tempdir().unwrap();
        let cli = TerraformCli::new("false", false);
        let err = cli
            .apply(Invocation::new(dir.path(), &[], &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, TfError::CommandFailed { ref command, .. } if command == "apply"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempdir().unwrap();
        let cli = TerraformCli::new("definitely-not-terraform-xyz", false);
        let err = cli.init(dir.path(), InitOptions::default()).await.unwrap_err();
        assert!(matches!(err, TfError::BinaryNotFound(_)));
    }

    #[tokio::test]
    async fn test_output_trims_stdout() {
        // `echo output -raw project_id` prints its arguments back.
        let dir = tempdir().unwrap();
        let cli = TerraformCli::new("echo", false);
        let value = cli.output(dir.path(), "project_id").await.unwrap();
        assert_eq!(value, "output -raw project_id");
    }

    #[tokio::test]
    async fn test_output_missing_on_failure() {
        let dir = tempdir().unwrap();
        let cli = TerraformCli::new("false", false);
        let err = cli.output(dir.path(), "project_id").await.unwrap_err();
        assert!(matches!(err, TfError::OutputMissing(_)));
    }
}
