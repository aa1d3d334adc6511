//! Stage pipeline: runs foundation stages then the seed, in order.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use gcp_facade::ObjectStore;
use pasture_core::obs::{
    emit_first_run_detected, emit_output_missing, emit_pipeline_finished, emit_stage_completed,
    emit_stage_skipped, emit_stage_started, emit_var_file_uploaded, StageSpan,
};
use pasture_core::{Hydrated, PastureError, Result, Settings, VarFile};
use tf_runner::{IacEngine, TfVar};
use tracing::{info, warn};

use crate::catalog::initialize_stages;
use crate::seed::{hydrate_seed, SeedOptions, SeedTemplate};
use crate::stage::Stage;

const CONSOLE_WELCOME_URL: &str = "https://console.cloud.google.com/welcome?project=";
const PROJECT_ID_OUTPUT: &str = "project_id";

/// Whether the run creates or tears down the pasture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Plant,
    Burn,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Plant => "plant",
            Mode::Burn => "burn",
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Mode::Plant => "deploy",
            Mode::Burn => "destroy",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-invocation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// Plan `0-bootstrap` and stop.
    pub dry_run: bool,

    /// Leave every foundation stage alone.
    pub skip_foundation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Applied,
    Destroyed,
    Planned,
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: String,
    pub outcome: StageOutcome,

    /// Dependencies were missing and the stage ran with local state.
    pub first_run: bool,
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub mode: Mode,
    pub stages: Vec<StageReport>,

    /// Set when a dry run planned `0-bootstrap` successfully.
    pub dry_run_verified: bool,

    /// Seed project, when the seed was planted and reported one.
    pub project_id: Option<String>,
}

impl PipelineReport {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            stages: Vec::new(),
            dry_run_verified: false,
            project_id: None,
        }
    }

    fn record(&mut self, stage: &Stage, outcome: StageOutcome, first_run: bool) {
        self.stages.push(StageReport {
            stage: stage.name.clone(),
            outcome,
            first_run,
        });
    }

    fn skip(&mut self, stage: &Stage, reason: &str) {
        emit_stage_skipped(&stage.name, reason);
        self.record(stage, StageOutcome::Skipped(reason.to_string()), false);
    }

    /// Cloud console landing page for the seed project.
    pub fn console_url(&self) -> Option<String> {
        self.project_id
            .as_ref()
            .map(|id| format!("{}{}", CONSOLE_WELCOME_URL, id))
    }

    /// Number of stages that were not skipped.
    pub fn executed_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| !matches!(s.outcome, StageOutcome::Skipped(_)))
            .count()
    }
}

/// Ordered stages for one invocation.
pub struct Pipeline {
    stages: Vec<Stage>,
    mode: Mode,
    flags: RunFlags,
    seed: SeedOptions,
    var_file: Arc<VarFile>,
    uploaded: bool,
}

impl Pipeline {
    /// Assemble a pipeline from prepared stages.
    ///
    /// Foundation stages must be strictly ascending and at most one seed may
    /// follow them.
    pub fn new(
        stages: Vec<Stage>,
        mode: Mode,
        flags: RunFlags,
        seed: SeedOptions,
        var_file: Arc<VarFile>,
    ) -> Result<Self> {
        let mut last_order = None;
        let mut seen_seed = false;
        for stage in &stages {
            match stage.order() {
                Some(order) => {
                    if seen_seed {
                        return Err(PastureError::InvalidPipeline(format!(
                            "foundation stage {} follows the seed",
                            stage.name
                        )));
                    }
                    if last_order.is_some_and(|last| order <= last) {
                        return Err(PastureError::InvalidPipeline(format!(
                            "foundation stage {} is out of order",
                            stage.name
                        )));
                    }
                    last_order = Some(order);
                }
                None => {
                    if seen_seed {
                        return Err(PastureError::InvalidPipeline(
                            "more than one seed stage".to_string(),
                        ));
                    }
                    seen_seed = true;
                }
            }
        }

        Ok(Self {
            stages,
            mode,
            flags,
            seed,
            var_file,
            uploaded: false,
        })
    }

    /// Foundation stages from the Fabric checkout followed by the hydrated seed.
    pub fn build(
        settings: &Settings,
        hydrated: &Hydrated,
        template: SeedTemplate,
        mode: Mode,
        flags: RunFlags,
        seed: SeedOptions,
    ) -> Result<Self> {
        seed.jumpstarts.validate()?;

        let mut stages =
            initialize_stages(&settings.fabric_dir, &hydrated.prefix, &hydrated.var_file)?;
        stages.push(hydrate_seed(
            template,
            &hydrated.prefix,
            &settings.config_dir,
            &settings.seeds_dir,
            &hydrated.var_file,
        )?);

        Self::new(stages, mode, flags, seed, Arc::clone(&hydrated.var_file))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage in order, stopping at the first fatal error.
    pub async fn run(
        &mut self,
        engine: &dyn IacEngine,
        store: &dyn ObjectStore,
    ) -> Result<PipelineReport> {
        let start = Instant::now();
        let mode = self.mode;
        let mut report = PipelineReport::new(mode);

        info!(mode = %mode, stages = self.stages.len(), dry_run = self.flags.dry_run, "Starting pipeline");

        for stage in self.stages.iter_mut() {
            let _span = StageSpan::enter(&stage.name);

            if stage.is_foundation() && mode == Mode::Burn {
                report.skip(stage, "burn is not supported for foundation stages");
                continue;
            }
            if stage.is_foundation() && self.flags.skip_foundation {
                report.skip(stage, "foundation stages skipped");
                continue;
            }

            if self.flags.dry_run {
                if !stage.is_bootstrap() {
                    report.skip(stage, "dry run only plans 0-bootstrap");
                    continue;
                }

                info!("Testing if foundation can be applied to GCP organization");
                stage
                    .init(engine)
                    .await
                    .map_err(|e| e.in_stage(&stage.name, "Cannot initialize stage for dry run"))?;
                stage.plan(engine).await.map_err(|e| {
                    e.in_stage(&stage.name, "Foundation cannot be applied to GCP organization")
                })?;
                info!("Foundation can be applied to GCP organization");

                report.dry_run_verified = true;
                report.record(stage, StageOutcome::Planned, false);
                break;
            }

            let vars: Vec<TfVar> = if stage.is_seed() {
                self.seed.seed_vars(&stage.provider)
            } else {
                Vec::new()
            };

            emit_stage_started(&stage.name, mode.action());
            let stage_start = Instant::now();

            let mut first_run = false;
            if let Err(e) = stage.discover_files(store).await {
                if !stage.is_bootstrap() {
                    return Err(e.in_stage(&stage.name, "Unable to retrieve stage dependencies"));
                }
                warn!(error = %e, "Bootstrap dependencies unavailable");
                emit_first_run_detected(&stage.name);
                first_run = true;
            }

            stage
                .init(engine)
                .await
                .map_err(|e| e.in_stage(&stage.name, "Failed to initialize stage"))?;

            let outcome = match mode {
                Mode::Burn => {
                    stage
                        .destroy(engine, &vars)
                        .await
                        .map_err(|e| e.in_stage(&stage.name, "Stage failed to destroy"))?;
                    info!("Successfully destroyed stage {}", stage.name);
                    StageOutcome::Destroyed
                }
                Mode::Plant => {
                    stage
                        .apply(engine, &vars)
                        .await
                        .map_err(|e| e.in_stage(&stage.name, "Stage failed to deploy"))?;
                    info!("Successfully applied stage {}", stage.name);

                    if stage.is_bootstrap() && !self.uploaded {
                        self.var_file
                            .upload_file(store)
                            .await
                            .map_err(|e| e.in_stage(&stage.name, "Failed to upload pasture var file"))?;
                        self.uploaded = true;
                        if let Some(remote) = self.var_file.remote() {
                            emit_var_file_uploaded(&remote.to_string());
                        }
                    }

                    if first_run {
                        stage.discover_files(store).await.map_err(|e| {
                            e.in_stage(&stage.name, "Unable to retrieve stage dependencies")
                        })?;
                        stage.init(engine).await.map_err(|e| {
                            e.in_stage(&stage.name, "Failed to migrate state to remote backend")
                        })?;
                    }

                    if stage.is_seed() {
                        match stage.output(engine, PROJECT_ID_OUTPUT).await {
                            Ok(project_id) => report.project_id = Some(project_id),
                            Err(_) => emit_output_missing(&stage.name, PROJECT_ID_OUTPUT),
                        }
                    }
                    StageOutcome::Applied
                }
            };

            emit_stage_completed(
                &stage.name,
                mode.action(),
                stage_start.elapsed().as_millis() as u64,
            );
            report.record(stage, outcome, first_run);
        }

        emit_pipeline_finished(
            mode.as_str(),
            report.executed_count(),
            start.elapsed().as_millis() as u64,
            self.flags.dry_run,
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderFile;
    use crate::seed::{Jumpstarts, PastureSize};
    use crate::stage::StageKind;

    fn stage(name: &str, kind: StageKind) -> Stage {
        Stage::new(
            name,
            kind,
            format!("/tmp/{}", name),
            ProviderFile::with_state_dir(name, "b", name),
            vec![],
        )
    }

    fn options() -> SeedOptions {
        SeedOptions {
            region: "us-central1".to_string(),
            size: PastureSize::Big,
            jumpstarts: Jumpstarts {
                knowledge_base: true,
                ..Default::default()
            },
        }
    }

    fn var_file() -> (tempfile::TempDir, Arc<VarFile>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pastures.tfvars.json");
        std::fs::write(&path, r#"{"prefix": "pst"}"#).unwrap();
        let vf = Arc::new(VarFile::load(path).unwrap());
        (dir, vf)
    }

    #[test]
    fn test_rejects_seed_before_foundation() {
        let (_dir, vf) = var_file();
        let stages = vec![
            stage("data-cloud", StageKind::Seed { template: SeedTemplate::DataCloud }),
            stage("0-bootstrap", StageKind::Foundation { order: 0 }),
        ];
        let result = Pipeline::new(stages, Mode::Plant, RunFlags::default(), options(), vf);
        assert!(matches!(result, Err(PastureError::InvalidPipeline(_))));
    }

    #[test]
    fn test_rejects_descending_foundation() {
        let (_dir, vf) = var_file();
        let stages = vec![
            stage("1-resman", StageKind::Foundation { order: 1 }),
            stage("0-bootstrap", StageKind::Foundation { order: 0 }),
        ];
        let result = Pipeline::new(stages, Mode::Plant, RunFlags::default(), options(), vf);
        assert!(matches!(result, Err(PastureError::InvalidPipeline(_))));
    }

    #[test]
    fn test_console_url() {
        let mut report = PipelineReport::new(Mode::Plant);
        assert!(report.console_url().is_none());
        report.project_id = Some("pst-dc-123".to_string());
        assert_eq!(
            report.console_url().as_deref(),
            Some("https://console.cloud.google.com/welcome?project=pst-dc-123")
        );
    }
}
