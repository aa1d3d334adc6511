//! Pasture seed templates.
//!
//! A seed is a Terraform root module shipped under `<seeds_dir>/<template>`.
//! Hydration copies it into the per-user config directory, renders a backend
//! that keeps its state in the outputs bucket, and wires in the FAST outputs
//! it depends on.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use pasture_core::{outputs_bucket, PastureError, Result, VarFile};
use tf_runner::TfVar;
use tracing::{debug, info};

use crate::provider::ProviderFile;
use crate::stage::{bucket_object, require_dir, Stage, StageKind};

/// Directory under the config dir holding hydrated seeds.
pub const PASTURES_DIR: &str = "pastures";

/// FAST outputs every seed reads.
const SEED_DEPENDENCIES: &[&str] = &[
    "0-globals.auto.tfvars.json",
    "0-bootstrap.auto.tfvars.json",
    "1-resman.auto.tfvars.json",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeedTemplate {
    DataCloud,
}

impl SeedTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            SeedTemplate::DataCloud => "data-cloud",
        }
    }
}

impl fmt::Display for SeedTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Environment size passed to the seed as `pasture_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PastureSize {
    Big,
    Small,
}

impl PastureSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            PastureSize::Big => "big",
            PastureSize::Small => "small",
        }
    }
}

impl fmt::Display for PastureSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PastureSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "big" => Ok(PastureSize::Big),
            "small" => Ok(PastureSize::Small),
            other => Err(format!("pasture size must be 'big' or 'small', got '{}'", other)),
        }
    }
}

/// Optional features deployed into the seed project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Jumpstarts {
    pub knowledge_base: bool,
    pub data_warehouse: bool,
    pub analytics_lakehouse: bool,
    pub genai_rag: bool,
}

impl Jumpstarts {
    pub fn any(&self) -> bool {
        self.knowledge_base || self.data_warehouse || self.analytics_lakehouse || self.genai_rag
    }

    pub fn validate(&self) -> Result<()> {
        if self.any() {
            Ok(())
        } else {
            Err(PastureError::InvalidPipeline(
                "at least one jumpstart must be enabled".to_string(),
            ))
        }
    }
}

/// Per-invocation seed settings from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedOptions {
    pub region: String,
    pub size: PastureSize,
    pub jumpstarts: Jumpstarts,
}

impl SeedOptions {
    /// Extra variables for the seed stage, in the order Terraform receives them.
    pub fn seed_vars(&self, provider: &ProviderFile) -> Vec<TfVar> {
        vec![
            TfVar::new("region", &self.region),
            TfVar::new("state_bucket", &provider.bucket),
            TfVar::new("state_dir", provider.state_dir()),
            TfVar::new("pasture_size", self.size),
            TfVar::flag("enable_summarization", self.jumpstarts.knowledge_base),
            TfVar::flag("enable_warehouse", self.jumpstarts.data_warehouse),
            TfVar::flag("enable_analytics", self.jumpstarts.analytics_lakehouse),
            TfVar::flag("enable_rag", self.jumpstarts.genai_rag),
        ]
    }
}

/// Materialise `template` into `<config_dir>/pastures/<template>` and build
/// its stage.
pub fn hydrate_seed(
    template: SeedTemplate,
    prefix: &str,
    config_dir: &Path,
    seeds_dir: &Path,
    var_file: &Arc<VarFile>,
) -> Result<Stage> {
    let source = seeds_dir.join(template.name());
    require_dir(&source)?;

    let dest = config_dir.join(PASTURES_DIR).join(template.name());
    clear_dir(&dest)?;
    copy_tree(&source, &dest)?;

    let bucket = outputs_bucket(prefix);
    let provider = ProviderFile::with_state_dir(template.name(), bucket.as_str(), template.name());
    std::fs::write(dest.join(&provider.file_name), provider.render())?;

    let dependencies = SEED_DEPENDENCIES
        .iter()
        .map(|file| bucket_object(&bucket, "tfvars", file))
        .collect();

    let mut stage = Stage::new(
        template.name(),
        StageKind::Seed { template },
        dest,
        provider,
        dependencies,
    );
    stage.add_var_file(Arc::clone(var_file));

    info!(template = %template, path = %stage.path.display(), "Seed hydrated");
    Ok(stage)
}

fn skip_entry(name: &str) -> bool {
    name == ".terraform" || name.starts_with("terraform.tfstate")
}

/// Empty a previous hydration so files dropped from the template go away.
/// The provider cache in `.terraform` is kept; seed state lives in the bucket.
fn clear_dir(dest: &Path) -> Result<()> {
    if !dest.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dest)? {
        let entry = entry?;
        if entry.file_name() == ".terraform" {
            continue;
        }
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        if skip_entry(&name.to_string_lossy()) {
            debug!(entry = %entry.path().display(), "Skipping");
            continue;
        }

        let target: PathBuf = dest.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn var_file(dir: &Path) -> Arc<VarFile> {
        let path = dir.join("pastures.tfvars.json");
        std::fs::write(&path, r#"{"prefix": "pst"}"#).unwrap();
        Arc::new(VarFile::load(path).unwrap())
    }

    #[test]
    fn test_seed_vars_order_and_values() {
        let options = SeedOptions {
            region: "europe-west4".to_string(),
            size: PastureSize::Small,
            jumpstarts: Jumpstarts {
                data_warehouse: true,
                ..Default::default()
            },
        };
        let provider = ProviderFile::with_state_dir("data-cloud", "pst-prod-iac-core-outputs", "data-cloud");
        let vars = options.seed_vars(&provider);

        let rendered: Vec<(&str, &str)> =
            vars.iter().map(|v| (v.name.as_str(), v.value.as_str())).collect();
        assert_eq!(
            rendered,
            vec![
                ("region", "europe-west4"),
                ("state_bucket", "pst-prod-iac-core-outputs"),
                ("state_dir", "data-cloud"),
                ("pasture_size", "small"),
                ("enable_summarization", "false"),
                ("enable_warehouse", "true"),
                ("enable_analytics", "false"),
                ("enable_rag", "false"),
            ]
        );
    }

    #[test]
    fn test_jumpstarts_require_one() {
        assert!(Jumpstarts::default().validate().is_err());
        let one = Jumpstarts {
            genai_rag: true,
            ..Default::default()
        };
        assert!(one.validate().is_ok());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!("big".parse::<PastureSize>().unwrap(), PastureSize::Big);
        assert_eq!("small".parse::<PastureSize>().unwrap(), PastureSize::Small);
        assert!("medium".parse::<PastureSize>().is_err());
    }

    #[test]
    fn test_hydrate_seed_copies_tree() {
        let root = tempdir().unwrap();
        let seeds = root.path().join("seeds");
        let source = seeds.join("data-cloud");
        std::fs::create_dir_all(source.join("modules/bq")).unwrap();
        std::fs::create_dir_all(source.join(".terraform/providers")).unwrap();
        std::fs::write(source.join("main.tf"), "# main").unwrap();
        std::fs::write(source.join("modules/bq/main.tf"), "# bq").unwrap();
        std::fs::write(source.join("terraform.tfstate"), "{}").unwrap();
        std::fs::write(source.join("terraform.tfstate.backup"), "{}").unwrap();

        let config_dir = root.path().join("config");
        let vf = var_file(root.path());
        let stage = hydrate_seed(SeedTemplate::DataCloud, "pst", &config_dir, &seeds, &vf).unwrap();

        let dest = config_dir.join("pastures").join("data-cloud");
        assert_eq!(stage.path, dest);
        assert!(stage.is_seed());
        assert!(dest.join("main.tf").exists());
        assert!(dest.join("modules/bq/main.tf").exists());
        assert!(!dest.join(".terraform").exists());
        assert!(!dest.join("terraform.tfstate").exists());
        assert!(!dest.join("terraform.tfstate.backup").exists());

        let provider = std::fs::read_to_string(dest.join("data-cloud-providers.tf")).unwrap();
        assert!(provider.contains("pst-prod-iac-core-outputs"));
        assert_eq!(stage.provider.remote_path, "data-cloud/default.tfstate");

        let deps: Vec<String> = stage.dependencies.iter().map(|d| d.object.clone()).collect();
        assert_eq!(
            deps,
            vec![
                "tfvars/0-globals.auto.tfvars.json",
                "tfvars/0-bootstrap.auto.tfvars.json",
                "tfvars/1-resman.auto.tfvars.json",
            ]
        );
        assert_eq!(stage.var_files().len(), 1);
    }

    #[test]
    fn test_rehydration_drops_stale_files() {
        let root = tempdir().unwrap();
        let seeds = root.path().join("seeds");
        let source = seeds.join("data-cloud");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("main.tf"), "# v2").unwrap();

        let config_dir = root.path().join("config");
        let dest = config_dir.join("pastures").join("data-cloud");
        std::fs::create_dir_all(dest.join("old_module")).unwrap();
        std::fs::create_dir_all(dest.join(".terraform/providers")).unwrap();
        std::fs::write(dest.join("removed_in_new_template.tf"), "# v1").unwrap();
        std::fs::write(dest.join("old_module/main.tf"), "# v1").unwrap();
        std::fs::write(dest.join("main.tf"), "# v1").unwrap();

        let vf = var_file(root.path());
        hydrate_seed(SeedTemplate::DataCloud, "pst", &config_dir, &seeds, &vf).unwrap();

        assert!(!dest.join("removed_in_new_template.tf").exists());
        assert!(!dest.join("old_module").exists());
        assert_eq!(std::fs::read_to_string(dest.join("main.tf")).unwrap(), "# v2");
        assert!(dest.join("data-cloud-providers.tf").exists());
        assert!(dest.join(".terraform/providers").is_dir());
    }

    #[test]
    fn test_hydrate_seed_missing_template() {
        let root = tempdir().unwrap();
        let vf = var_file(root.path());
        let err = hydrate_seed(
            SeedTemplate::DataCloud,
            "pst",
            root.path(),
            &root.path().join("seeds"),
            &vf,
        )
        .unwrap_err();
        assert!(matches!(err, PastureError::StageSourceMissing(_)));
    }
}
