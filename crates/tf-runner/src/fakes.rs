//! In-memory fake engine (testing only)
//!
//! `RecordingEngine` satisfies the `IacEngine` contract without spawning
//! anything, records every call, and can be told to fail.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::{IacEngine, InitOptions, Invocation, TfVar};
use crate::error::TfError;
use crate::Result;

/// Engine operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Init,
    Plan,
    Apply,
    Destroy,
    Output,
}

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCall {
    pub op: EngineOp,
    pub dir: PathBuf,
    pub var_files: Vec<PathBuf>,
    pub vars: Vec<TfVar>,
    pub init: Option<InitOptions>,
}

impl EngineCall {
    /// Last path component of the working directory (the stage name).
    pub fn stage(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    failures: Mutex<HashSet<(EngineOp, String)>>,
    outputs: Mutex<HashMap<String, String>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `op` whenever it runs in a directory named `stage`.
    pub fn fail_on(self, op: EngineOp, stage: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((op, stage.to_string()));
        self
    }

    /// Serve `value` for `terraform output <name>`.
    pub fn with_output(self, name: &str, value: &str) -> Self {
        self.outputs
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls for a single stage, in order.
    pub fn calls_for(&self, stage: &str) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.stage() == stage)
            .collect()
    }

    /// `(stage, op)` pairs, in order.
    pub fn trace(&self) -> Vec<(String, EngineOp)> {
        self.calls().iter().map(|c| (c.stage(), c.op)).collect()
    }

    fn record(
        &self,
        op: EngineOp,
        dir: &Path,
        var_files: &[PathBuf],
        vars: &[TfVar],
        init: Option<InitOptions>,
    ) -> Result<()> {
        let call = EngineCall {
            op,
            dir: dir.to_path_buf(),
            var_files: var_files.to_vec(),
            vars: vars.to_vec(),
            init,
        };
        let stage = call.stage();
        self.calls.lock().unwrap().push(call);

        if self.failures.lock().unwrap().contains(&(op, stage)) {
            return Err(TfError::CommandFailed {
                command: format!("{:?}", op).to_lowercase(),
                code: Some(1),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IacEngine for RecordingEngine {
    async fn init(&self, dir: &Path, options: InitOptions) -> Result<()> {
        self.record(EngineOp::Init, dir, &[], &[], Some(options))
    }

    async fn plan(&self, invocation: Invocation<'_>) -> Result<()> {
        self.record(
            EngineOp::Plan,
            invocation.dir,
            invocation.var_files,
            invocation.vars,
            None,
        )
    }

    async fn apply(&self, invocation: Invocation<'_>) -> Result<()> {
        self.record(
            EngineOp::Apply,
            invocation.dir,
            invocation.var_files,
            invocation.vars,
            None,
        )
    }

    async fn destroy(&self, invocation: Invocation<'_>) -> Result<()> {
        self.record(
            EngineOp::Destroy,
            invocation.dir,
            invocation.var_files,
            invocation.vars,
            None,
        )
    }

    async fn output(&self, dir: &Path, name: &str) -> Result<String> {
        self.record(EngineOp::Output, dir, &[], &[], None)?;
        self.outputs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| TfError::OutputMissing(name.to_string()))
    }
}
