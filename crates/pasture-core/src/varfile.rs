//! Shared Terraform variable file.
//!
//! The var file is a `*.tfvars.json` document. Every key is forwarded to
//! Terraform untouched; the handful the orchestrator needs are read through
//! [`FastConfig`]. The on-disk bytes and the in-memory body are kept in sync:
//! mutating methods rewrite the file before they return, and an unmutated
//! document is saved back byte for byte.

use gcp_facade::{ObjectRef, ObjectStore, Organization};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::PastureError;
use crate::Result;

/// Default file name of the shared var file inside the config directory.
pub const VAR_FILE_NAME: &str = "pastures.tfvars.json";

/// Object path of the shared var file inside the outputs bucket.
pub const VAR_FILE_OBJECT: &str = "tfvars/pastures.tfvars.json";

const JSON_CONTENT_TYPE: &str = "application/json";

/// Bucket holding FAST stage outputs, state and the shared var file.
pub fn outputs_bucket(prefix: &str) -> String {
    format!("{}-prod-iac-core-outputs", prefix)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAccount {
    pub id: String,
}

/// Typed view over the keys of the var file the orchestrator relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastConfig {
    pub prefix: String,
    pub organization: Option<Organization>,
    pub billing_account: Option<BillingAccount>,
}

fn prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]{0,8}$").expect("valid prefix regex"))
}

/// Typed view of an optional key. A value of the wrong shape still goes to
/// Terraform as written; only the view is dropped.
fn optional_view<T: serde::de::DeserializeOwned>(var_file: &VarFile, key: &str) -> Option<T> {
    let value = var_file.get(key).filter(|v| !v.is_null())?;
    match serde_json::from_value(value.clone()) {
        Ok(view) => Some(view),
        Err(e) => {
            warn!(
                key,
                path = %var_file.local_path().display(),
                error = %e,
                "Ignoring unreadable var file key"
            );
            None
        }
    }
}

impl FastConfig {
    /// Read the typed view from a loaded var file.
    pub fn from_var_file(var_file: &VarFile) -> Result<Self> {
        let parse_err = |reason: String| PastureError::ConfigParse {
            path: var_file.local_path().display().to_string(),
            reason,
        };

        let prefix = match var_file.get("prefix") {
            Some(Value::String(prefix)) => prefix.clone(),
            Some(other) => return Err(parse_err(format!("prefix must be a string, got {}", other))),
            None => return Err(parse_err("missing field `prefix`".to_string())),
        };
        Self::validate_prefix(&prefix).map_err(parse_err)?;

        Ok(FastConfig {
            prefix,
            organization: optional_view(var_file, "organization"),
            billing_account: optional_view(var_file, "billing_account"),
        })
    }

    /// Prefixes end up in bucket and project names: 1-9 chars, lowercase
    /// letters, digits and hyphens, starting with a letter.
    pub fn validate_prefix(prefix: &str) -> std::result::Result<(), String> {
        if prefix_pattern().is_match(prefix) {
            Ok(())
        } else {
            Err(format!(
                "invalid prefix {:?}: expected 1-9 lowercase letters, digits or hyphens starting with a letter",
                prefix
            ))
        }
    }

    pub fn outputs_bucket(&self) -> String {
        outputs_bucket(&self.prefix)
    }
}

/// The shared variable file.
#[derive(Debug)]
pub struct VarFile {
    local_path: PathBuf,
    raw: Vec<u8>,
    body: Map<String, Value>,
    remote: Option<ObjectRef>,
    config: Option<FastConfig>,
}

impl VarFile {
    /// Parse a var file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let parse_err = |reason: String| PastureError::ConfigParse {
            path: path.display().to_string(),
            reason,
        };

        let raw = std::fs::read(path).map_err(|e| parse_err(e.to_string()))?;
        let body = match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(body)) => body,
            Ok(_) => return Err(parse_err("expected a JSON object at the top level".to_string())),
            Err(e) => return Err(parse_err(e.to_string())),
        };

        debug!(path = %path.display(), keys = body.len(), "Loaded var file");
        Ok(Self {
            local_path: path.to_path_buf(),
            raw,
            body,
            remote: None,
            config: None,
        })
    }

    /// Write a new var file with `body`.
    pub fn create(path: impl AsRef<Path>, body: Map<String, Value>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = render(&body)?;
        std::fs::write(path, &raw)?;

        Ok(Self {
            local_path: path.to_path_buf(),
            raw,
            body,
            remote: None,
            config: None,
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn config(&self) -> Option<&FastConfig> {
        self.config.as_ref()
    }

    /// Remote location, once [`VarFile::set_bucket`] has run.
    pub fn remote(&self) -> Option<&ObjectRef> {
        self.remote.as_ref()
    }

    /// Attach the typed view. Call after `load` and before `set_bucket`.
    pub fn add_config(&mut self, config: FastConfig) {
        self.config = Some(config);
    }

    /// Fix the remote reference for `prefix`. Only the first call has an effect.
    pub fn set_bucket(&mut self, prefix: &str) {
        if let Some(remote) = &self.remote {
            debug!(remote = %remote, "Var file remote already set");
            return;
        }
        self.remote = Some(ObjectRef::new(outputs_bucket(prefix), VAR_FILE_OBJECT));
    }

    /// Set a key and rewrite the file.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.body.insert(key.to_string(), value);
        self.raw = render(&self.body)?;
        self.save()
    }

    /// Write the current document to disk.
    pub fn save(&self) -> Result<()> {
        std::fs::write(&self.local_path, &self.raw)?;
        Ok(())
    }

    /// Upload the file's current bytes to the remote reference.
    pub async fn upload_file(&self, store: &dyn ObjectStore) -> Result<()> {
        let remote = self.remote.as_ref().ok_or_else(|| PastureError::RemoteWrite {
            object: self.local_path.display().to_string(),
            reason: "remote bucket has not been set".to_string(),
        })?;

        let data = tokio::fs::read(&self.local_path).await?;
        store
            .put(remote, data, JSON_CONTENT_TYPE)
            .await
            .map_err(|e| PastureError::RemoteWrite {
                object: remote.to_string(),
                reason: e.to_string(),
            })
    }
}

fn render(body: &Map<String, Value>) -> Result<Vec<u8>> {
    let mut raw = serde_json::to_vec_pretty(body)?;
    raw.push(b'\n');
    Ok(raw)
}
