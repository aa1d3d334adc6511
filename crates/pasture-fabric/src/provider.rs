//! Terraform backend descriptors.
//!
//! FAST publishes one `<stage>-providers.tf` per stage into the outputs
//! bucket. Only the `gcs` backend's `bucket` and `prefix` matter here; the
//! rest of the file is handed to Terraform untouched.

use regex::Regex;
use std::sync::OnceLock;

const STATE_FILE: &str = "default.tfstate";

fn bucket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^\s*bucket\s*=\s*"([^"]+)""#).expect("valid bucket regex"))
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^\s*prefix\s*=\s*"([^"]*)""#).expect("valid prefix regex"))
}

/// Where a stage keeps its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFile {
    /// File name inside the stage directory, e.g. `1-resman-providers.tf`.
    pub file_name: String,

    /// State bucket.
    pub bucket: String,

    /// Object path of the state inside `bucket`, e.g. `data-cloud/default.tfstate`.
    pub remote_path: String,
}

impl ProviderFile {
    pub fn new(
        file_name: impl Into<String>,
        bucket: impl Into<String>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            bucket: bucket.into(),
            remote_path: remote_path.into(),
        }
    }

    /// Conventional file name for `stage`.
    pub fn file_name_for(stage: &str) -> String {
        format!("{}-providers.tf", stage)
    }

    /// Descriptor with state under `<dir>/default.tfstate` in `bucket`.
    pub fn with_state_dir(stage: &str, bucket: impl Into<String>, dir: &str) -> Self {
        Self::new(
            Self::file_name_for(stage),
            bucket,
            format!("{}/{}", dir, STATE_FILE),
        )
    }

    /// First segment of the remote path.
    pub fn state_dir(&self) -> &str {
        self.remote_path
            .split('/')
            .next()
            .unwrap_or(self.remote_path.as_str())
    }

    /// Read the backend settings out of a fetched provider file.
    ///
    /// Returns `None` when no `bucket` attribute is present. A missing
    /// `prefix` puts the state at the bucket root.
    pub fn parse(file_name: impl Into<String>, text: &str) -> Option<Self> {
        let bucket = bucket_re().captures(text)?.get(1)?.as_str().to_string();
        let remote_path = match prefix_re()
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim_matches('/'))
        {
            Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, STATE_FILE),
            _ => STATE_FILE.to_string(),
        };

        Some(Self::new(file_name, bucket, remote_path))
    }

    /// Render a `gcs` backend block for this descriptor.
    pub fn render(&self) -> String {
        let prefix = self
            .remote_path
            .strip_suffix(STATE_FILE)
            .unwrap_or(&self.remote_path)
            .trim_end_matches('/');

        let mut out = String::from("terraform {\n  backend \"gcs\" {\n");
        out.push_str(&format!("    bucket = \"{}\"\n", self.bucket));
        if !prefix.is_empty() {
            out.push_str(&format!("    prefix = \"{}\"\n", prefix));
        }
        out.push_str("  }\n}\n");
        out
    }
}
