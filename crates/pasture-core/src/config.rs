//! Settings and config hydration.
//!
//! Settings come from `~/.pastures.yaml` (or `--config`), overridden by
//! `PASTURE_*` environment variables. Hydration loads the shared var file from
//! the config directory and fixes its remote location.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PastureError;
use crate::varfile::{FastConfig, VarFile, VAR_FILE_NAME};
use crate::Result;

pub const SETTINGS_FILE_NAME: &str = ".pastures.yaml";
pub const CONFIG_DIR_NAME: &str = ".pastures";

pub const ENV_CONFIG_DIR: &str = "PASTURE_CONFIG_DIR";
pub const ENV_TERRAFORM: &str = "PASTURE_TERRAFORM";
pub const ENV_FABRIC_DIR: &str = "PASTURE_FABRIC_DIR";
pub const ENV_SEEDS_DIR: &str = "PASTURE_SEEDS_DIR";

/// On-disk shape of `.pastures.yaml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    pub config_dir: Option<PathBuf>,
    pub terraform: Option<String>,
    pub fabric_dir: Option<PathBuf>,
    pub seeds_dir: Option<PathBuf>,
    pub var_file: Option<String>,

    /// Keys we don't know about; reported, never used.
    #[serde(flatten, skip_serializing)]
    pub unknown: BTreeMap<String, serde_yml::Value>,
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Per-user configuration directory (holds the var file and pasture trees).
    pub config_dir: PathBuf,

    /// Terraform binary.
    pub terraform: String,

    /// Cloud Foundation Fabric checkout with `fast/stages/*`.
    pub fabric_dir: PathBuf,

    /// Directory with one sub-directory per seed template.
    pub seeds_dir: PathBuf,

    /// Var file name inside `config_dir`.
    pub var_file: String,

    /// Settings file that was read, if any.
    pub source: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the process environment and home directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, dirs::home_dir(), |key| std::env::var(key).ok())
    }

    /// Load settings with an explicit home directory and env lookup.
    pub fn load_with<F>(explicit: Option<&Path>, home: Option<PathBuf>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = home.ok_or_else(|| {
            PastureError::SettingsNotFound("unable to determine home directory".to_string())
        })?;

        let (file, source) = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(PastureError::SettingsNotFound(path.display().to_string()));
                }
                (read_settings_file(path)?, Some(path.to_path_buf()))
            }
            None => {
                let path = home.join(SETTINGS_FILE_NAME);
                if path.exists() {
                    (read_settings_file(&path)?, Some(path))
                } else {
                    (SettingsFile::default(), None)
                }
            }
        };

        if let Some(path) = &source {
            info!(path = %path.display(), "Using config file");
        }

        let env_path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let config_dir = env_path(ENV_CONFIG_DIR)
            .or(file.config_dir)
            .map(|p| expand_home(&p, &home))
            .unwrap_or_else(|| home.join(CONFIG_DIR_NAME));

        let terraform = lookup(ENV_TERRAFORM)
            .filter(|v| !v.is_empty())
            .or(file.terraform)
            .unwrap_or_else(|| "terraform".to_string());

        let fabric_dir = env_path(ENV_FABRIC_DIR)
            .or(file.fabric_dir)
            .map(|p| expand_home(&p, &home))
            .unwrap_or_else(|| config_dir.join("cloud-foundation-fabric"));

        let seeds_dir = env_path(ENV_SEEDS_DIR)
            .or(file.seeds_dir)
            .map(|p| expand_home(&p, &home))
            .unwrap_or_else(|| config_dir.join("seeds"));

        let settings = Settings {
            config_dir,
            terraform,
            fabric_dir,
            seeds_dir,
            var_file: file.var_file.unwrap_or_else(|| VAR_FILE_NAME.to_string()),
            source,
        };
        debug!(?settings, "Resolved settings");
        Ok(settings)
    }

    pub fn var_file_path(&self) -> PathBuf {
        self.config_dir.join(&self.var_file)
    }
}

fn read_settings_file(path: &Path) -> Result<SettingsFile> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(SettingsFile::default());
    }
    let file: SettingsFile = serde_yml::from_str(&content).map_err(|e| PastureError::ConfigParse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    for key in file.unknown.keys() {
        warn!(key = %key, path = %path.display(), "Ignoring unknown settings key");
    }
    Ok(file)
}

fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Configuration ready for building a pipeline.
#[derive(Debug, Clone)]
pub struct Hydrated {
    pub prefix: String,
    pub var_file: Arc<VarFile>,
}

/// Load the shared var file and derive the deployment prefix.
pub fn hydrate(settings: &Settings) -> Result<Hydrated> {
    let mut var_file = VarFile::load(settings.var_file_path())?;
    let config = FastConfig::from_var_file(&var_file)?;
    let prefix = config.prefix.clone();

    var_file.add_config(config);
    var_file.set_bucket(&prefix);

    info!(prefix = %prefix, path = %var_file.local_path().display(), "Configuration hydrated");
    Ok(Hydrated {
        prefix,
        var_file: Arc::new(var_file),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_settings_file() {
        let home = tempdir().unwrap();
        let settings = Settings::load_with(None, Some(home.path().to_path_buf()), no_env).unwrap();

        assert_eq!(settings.config_dir, home.path().join(".pastures"));
        assert_eq!(settings.terraform, "terraform");
        assert_eq!(
            settings.fabric_dir,
            home.path().join(".pastures").join("cloud-foundation-fabric")
        );
        assert_eq!(settings.seeds_dir, home.path().join(".pastures").join("seeds"));
        assert_eq!(
            settings.var_file_path(),
            home.path().join(".pastures").join(VAR_FILE_NAME)
        );
        assert!(settings.source.is_none());
    }

    #[test]
    fn test_settings_file_in_home() {
        let home = tempdir().unwrap();
        std::fs::write(
            home.path().join(SETTINGS_FILE_NAME),
            "terraform: /opt/bin/terraform\nfabric_dir: ~/src/fabric\n",
        )
        .unwrap();

        let settings = Settings::load_with(None, Some(home.path().to_path_buf()), no_env).unwrap();
        assert_eq!(settings.terraform, "/opt/bin/terraform");
        assert_eq!(settings.fabric_dir, home.path().join("src").join("fabric"));
        assert!(settings.source.is_some());
    }

    #[test]
    fn test_env_overrides_file() {
        let home = tempdir().unwrap();
        let explicit = home.path().join("custom.yaml");
        std::fs::write(&explicit, "config_dir: /from/file\nterraform: tf-file\n").unwrap();

        let env: HashMap<&str, &str> =
            [(ENV_CONFIG_DIR, "/from/env"), (ENV_TERRAFORM, "tf-env")].into_iter().collect();
        let settings = Settings::load_with(Some(&explicit), Some(home.path().to_path_buf()), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(settings.config_dir, PathBuf::from("/from/env"));
        assert_eq!(settings.terraform, "tf-env");
        assert_eq!(settings.seeds_dir, PathBuf::from("/from/env/seeds"));
    }

    #[test]
    fn test_missing_explicit_file() {
        let home = tempdir().unwrap();
        let err = Settings::load_with(
            Some(&home.path().join("absent.yaml")),
            Some(home.path().to_path_buf()),
            no_env,
        )
        .unwrap_err();
        assert!(matches!(err, PastureError::SettingsNotFound(_)));
    }

    #[test]
    fn test_unknown_settings_keys_are_ignored() {
        let home = tempdir().unwrap();
        std::fs::write(
            home.path().join(SETTINGS_FILE_NAME),
            "unknown_key: 1\nterraform: tf-custom\nlegacy:\n  nested: true\n",
        )
        .unwrap();

        let settings = Settings::load_with(None, Some(home.path().to_path_buf()), no_env).unwrap();
        assert_eq!(settings.terraform, "tf-custom");

        let file = read_settings_file(&home.path().join(SETTINGS_FILE_NAME)).unwrap();
        let unknown: Vec<&str> = file.unknown.keys().map(String::as_str).collect();
        assert_eq!(unknown, vec!["legacy", "unknown_key"]);
    }

    #[test]
    fn test_malformed_settings_file() {
        let home = tempdir().unwrap();
        std::fs::write(home.path().join(SETTINGS_FILE_NAME), "terraform: [unclosed\n").unwrap();
        let err = Settings::load_with(None, Some(home.path().to_path_buf()), no_env).unwrap_err();
        assert!(err.is_config_parse());

        std::fs::write(home.path().join(SETTINGS_FILE_NAME), "terraform: [a, b]\n").unwrap();
        let err = Settings::load_with(None, Some(home.path().to_path_buf()), no_env).unwrap_err();
        assert!(err.is_config_parse());
    }

    #[test]
    fn test_hydrate() {
        let home = tempdir().unwrap();
        let settings = Settings::load_with(None, Some(home.path().to_path_buf()), no_env).unwrap();
        std::fs::create_dir_all(&settings.config_dir).unwrap();
        std::fs::write(settings.var_file_path(), r#"{"prefix": "demo"}"#).unwrap();

        let hydrated = hydrate(&settings).unwrap();
        assert_eq!(hydrated.prefix, "demo");
        assert_eq!(hydrated.var_file.config().unwrap().prefix, "demo");

        let object = hydrated.var_file.remote().unwrap();
        assert_eq!(object.bucket, "demo-prod-iac-core-outputs");
        assert_eq!(object.object, "tfvars/pastures.tfvars.json");
    }

    #[test]
    fn test_hydrate_missing_var_file() {
        let home = tempdir().unwrap();
        let settings = Settings::load_with(None, Some(home.path().to_path_buf()), no_env).unwrap();
        let err = hydrate(&settings).unwrap_err();
        assert!(err.is_config_parse());
    }
}
