//! FAST foundation stages deployed beneath every pasture.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gcp_facade::ObjectRef;
use pasture_core::{outputs_bucket, PastureError, Result, VarFile};
use tracing::debug;

use crate::provider::ProviderFile;
use crate::stage::{bucket_object, require_dir, Stage, StageKind};

/// A foundation stage and the Fabric directory it is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundationStage {
    pub name: &'static str,
    pub order: u32,

    /// Directory under `<fabric_dir>/fast/stages`.
    pub source: &'static str,
}

pub const FOUNDATION_STAGES: &[FoundationStage] = &[
    FoundationStage {
        name: "0-bootstrap",
        order: 0,
        source: "0-bootstrap",
    },
    FoundationStage {
        name: "1-resman",
        order: 1,
        source: "1-resman",
    },
    FoundationStage {
        name: "2-networking",
        order: 2,
        source: "2-networking-a-simple",
    },
];

const GLOBALS_TFVARS: &str = "0-globals.auto.tfvars.json";

/// Directory holding the stage sources of a Fabric checkout.
pub fn stages_root(fabric_dir: &Path) -> PathBuf {
    fabric_dir.join("fast").join("stages")
}

/// Outputs a foundation stage needs: its provider file, then (after
/// bootstrap) the globals and every earlier stage's tfvars.
pub fn foundation_dependencies(bucket: &str, stage: &FoundationStage) -> Vec<ObjectRef> {
    let mut deps = vec![bucket_object(
        bucket,
        "providers",
        &ProviderFile::file_name_for(stage.name),
    )];

    if stage.order > 0 {
        deps.push(bucket_object(bucket, "tfvars", GLOBALS_TFVARS));
        deps.extend(
            FOUNDATION_STAGES
                .iter()
                .filter(|earlier| earlier.order < stage.order)
                .map(|earlier| {
                    bucket_object(bucket, "tfvars", &format!("{}.auto.tfvars.json", earlier.name))
                }),
        );
    }
    deps
}

/// Build the foundation stages from a Fabric checkout.
pub fn initialize_stages(
    fabric_dir: &Path,
    prefix: &str,
    var_file: &Arc<VarFile>,
) -> Result<Vec<Stage>> {
    let root = stages_root(fabric_dir);
    let bucket = outputs_bucket(prefix);

    let mut stages = Vec::with_capacity(FOUNDATION_STAGES.len());
    for def in FOUNDATION_STAGES {
        let path = root.join(def.source);
        require_dir(&path)?;

        let mut stage = Stage::new(
            def.name,
            StageKind::Foundation { order: def.order },
            path,
            ProviderFile::with_state_dir(def.name, bucket.as_str(), def.name),
            foundation_dependencies(&bucket, def),
        );
        stage.add_var_file(Arc::clone(var_file));
        debug!(stage = %stage.name, path = %stage.path.display(), "Foundation stage loaded");
        stages.push(stage);
    }

    sort_foundation(stages)
}

/// Sort by order, rejecting two stages with the same order.
pub fn sort_foundation(mut stages: Vec<Stage>) -> Result<Vec<Stage>> {
    stages.sort_by_key(|s| s.order());
    for pair in stages.windows(2) {
        if pair[0].order() == pair[1].order() {
            return Err(PastureError::InvalidPipeline(format!(
                "stages {} and {} share order {:?}",
                pair[0].name,
                pair[1].name,
                pair[0].order()
            )));
        }
    }
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fabric_checkout(root: &Path) -> PathBuf {
        let fabric = root.join("fabric");
        for def in FOUNDATION_STAGES {
            std::fs::create_dir_all(stages_root(&fabric).join(def.source)).unwrap();
        }
        fabric
    }

    fn var_file(root: &Path) -> Arc<VarFile> {
        let path = root.join("pastures.tfvars.json");
        std::fs::write(&path, r#"{"prefix": "pst"}"#).unwrap();
        Arc::new(VarFile::load(path).unwrap())
    }

    #[test]
    fn test_initialize_stages_in_order() {
        let root = tempdir().unwrap();
        let fabric = fabric_checkout(root.path());
        let stages = initialize_stages(&fabric, "pst", &var_file(root.path())).unwrap();

        let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["0-bootstrap", "1-resman", "2-networking"]);
        assert!(stages[2].path.ends_with("fast/stages/2-networking-a-simple"));
        assert!(stages.iter().all(|s| s.var_files().len() == 1));
    }

    #[test]
    fn test_dependencies_reference_earlier_stages() {
        let bucket = "pst-prod-iac-core-outputs";
        let objects = |i: usize| -> Vec<String> {
            foundation_dependencies(bucket, &FOUNDATION_STAGES[i])
                .into_iter()
                .map(|o| o.object)
                .collect()
        };

        assert_eq!(objects(0), vec!["providers/0-bootstrap-providers.tf"]);
        assert_eq!(
            objects(2),
            vec![
                "providers/2-networking-providers.tf",
                "tfvars/0-globals.auto.tfvars.json",
                "tfvars/0-bootstrap.auto.tfvars.json",
                "tfvars/1-resman.auto.tfvars.json",
            ]
        );
        assert!(foundation_dependencies(bucket, &FOUNDATION_STAGES[1])
            .iter()
            .all(|o| o.bucket == bucket));
    }

    #[test]
    fn test_missing_stage_source() {
        let root = tempdir().unwrap();
        let fabric = root.path().join("fabric");
        std::fs::create_dir_all(stages_root(&fabric).join("0-bootstrap")).unwrap();

        let err = initialize_stages(&fabric, "pst", &var_file(root.path())).unwrap_err();
        match err {
            PastureError::StageSourceMissing(path) => assert!(path.ends_with("1-resman")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_order_rejected() {
        let stage = |name: &str| {
            Stage::new(
                name,
                StageKind::Foundation { order: 1 },
                "/tmp",
                ProviderFile::with_state_dir(name, "b", name),
                vec![],
            )
        };
        let err = sort_foundation(vec![stage("1-resman"), stage("1-other")]).unwrap_err();
        assert!(matches!(err, PastureError::InvalidPipeline(_)));
    }
}
