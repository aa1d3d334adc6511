//! A single Terraform root module run by the pipeline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gcp_facade::{ObjectRef, ObjectStore};
use pasture_core::{PastureError, Result, VarFile};
use tf_runner::{IacEngine, InitOptions, Invocation, TfVar};
use tracing::{debug, info};

use crate::provider::ProviderFile;
use crate::seed::SeedTemplate;

/// Name of the stage that creates the outputs bucket.
pub const BOOTSTRAP_STAGE: &str = "0-bootstrap";

const LOCAL_STATE: &str = "terraform.tfstate";
const MIGRATED_STATE: &str = "terraform.tfstate.migrated";

/// What kind of stage this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// FAST foundation stage, ordered by the leading integer of its name.
    Foundation { order: u32 },

    /// Pasture seed, always last.
    Seed { template: SeedTemplate },
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Foundation { .. } => write!(f, "foundation"),
            StageKind::Seed { .. } => write!(f, "seed"),
        }
    }
}

#[derive(Debug)]
pub struct Stage {
    pub name: String,
    pub kind: StageKind,

    /// Working directory Terraform runs in.
    pub path: PathBuf,

    pub provider: ProviderFile,

    /// Objects in the outputs bucket copied into `path` before running.
    pub dependencies: Vec<ObjectRef>,

    var_files: Vec<Arc<VarFile>>,
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        kind: StageKind,
        path: impl Into<PathBuf>,
        provider: ProviderFile,
        dependencies: Vec<ObjectRef>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            path: path.into(),
            provider,
            dependencies,
            var_files: Vec::new(),
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.name == BOOTSTRAP_STAGE
    }

    pub fn is_foundation(&self) -> bool {
        matches!(self.kind, StageKind::Foundation { .. })
    }

    pub fn is_seed(&self) -> bool {
        matches!(self.kind, StageKind::Seed { .. })
    }

    /// Foundation order, if this is a foundation stage.
    pub fn order(&self) -> Option<u32> {
        match self.kind {
            StageKind::Foundation { order } => Some(order),
            StageKind::Seed { .. } => None,
        }
    }

    /// Attach a var file. Later files override earlier ones.
    pub fn add_var_file(&mut self, var_file: Arc<VarFile>) {
        self.var_files.push(var_file);
    }

    pub fn var_files(&self) -> &[Arc<VarFile>] {
        &self.var_files
    }

    fn var_file_paths(&self) -> Vec<PathBuf> {
        self.var_files
            .iter()
            .map(|v| v.local_path().to_path_buf())
            .collect()
    }

    fn provider_path(&self) -> PathBuf {
        self.path.join(&self.provider.file_name)
    }

    /// Copy every dependency object into the stage directory.
    ///
    /// The provider descriptor is refreshed from the fetched provider file.
    pub async fn discover_files(&mut self, store: &dyn ObjectStore) -> Result<()> {
        for object in &self.dependencies {
            let missing = |reason: String| PastureError::DependenciesMissing {
                stage: self.name.clone(),
                object: object.to_string(),
                reason,
            };

            let data = store.get(object).await.map_err(|e| missing(e.to_string()))?;
            let file_name = object_file_name(object);
            tokio::fs::write(self.path.join(file_name), &data)
                .await
                .map_err(|e| missing(e.to_string()))?;
            debug!(object = %object, "Fetched dependency");

            if file_name == self.provider.file_name {
                let text = String::from_utf8_lossy(&data);
                let provider = ProviderFile::parse(file_name, &text)
                    .ok_or_else(|| missing("no gcs backend bucket in provider file".to_string()))?;
                debug!(bucket = %provider.bucket, remote_path = %provider.remote_path, "Provider refreshed");
                self.provider = provider;
            }
        }
        Ok(())
    }

    /// Initialise the working directory, migrating local state when a
    /// remote backend is now configured.
    pub async fn init(&self, engine: &dyn IacEngine) -> Result<()> {
        let local_state = self.path.join(LOCAL_STATE);
        if local_state.exists() && self.provider_path().exists() {
            info!(
                stage = %self.name,
                bucket = %self.provider.bucket,
                remote_path = %self.provider.remote_path,
                "Migrating local state to remote backend"
            );
            engine.init(&self.path, InitOptions::migrate()).await?;
            tokio::fs::rename(&local_state, self.path.join(MIGRATED_STATE)).await?;
            return Ok(());
        }

        engine.init(&self.path, InitOptions::default()).await?;
        Ok(())
    }

    pub async fn plan(&self, engine: &dyn IacEngine) -> Result<()> {
        let files = self.var_file_paths();
        engine.plan(Invocation::new(&self.path, &files, &[])).await?;
        Ok(())
    }

    pub async fn apply(&self, engine: &dyn IacEngine, vars: &[TfVar]) -> Result<()> {
        let files = self.var_file_paths();
        engine.apply(Invocation::new(&self.path, &files, vars)).await?;
        Ok(())
    }

    pub async fn destroy(&self, engine: &dyn IacEngine, vars: &[TfVar]) -> Result<()> {
        let files = self.var_file_paths();
        engine.destroy(Invocation::new(&self.path, &files, vars)).await?;
        Ok(())
    }

    pub async fn output(&self, engine: &dyn IacEngine, name: &str) -> Result<String> {
        Ok(engine.output(&self.path, name).await?)
    }
}

fn object_file_name(object: &ObjectRef) -> &str {
    object.object.rsplit('/').next().unwrap_or(&object.object)
}

/// Object in `bucket` named `<dir>/<file>`.
pub(crate) fn bucket_object(bucket: &str, dir: &str, file: &str) -> ObjectRef {
    ObjectRef::new(bucket, format!("{}/{}", dir, file))
}

/// Ensure `path` is a directory, reporting `StageSourceMissing` otherwise.
pub(crate) fn require_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(PastureError::StageSourceMissing(path.display().to_string()))
    }
}
