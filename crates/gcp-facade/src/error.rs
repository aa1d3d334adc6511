//! Error types for gcp-facade

use thiserror::Error;

/// Errors that can occur when talking to Google Cloud
#[derive(Error, Debug)]
pub enum CloudError {
    /// No usable application default credentials
    #[error("Application default credentials unavailable: {0}")]
    Auth(String),

    /// Object does not exist (or the bucket does not)
    #[error("Object not found: gs://{bucket}/{object}")]
    NotFound { bucket: String, object: String },

    /// Non-success HTTP response
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection or protocol failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reading the organization IAM policy failed
    #[error("Failed to read IAM policy for {resource}: {reason}")]
    PolicyRead { resource: String, reason: String },

    /// Writing the organization IAM policy failed
    #[error("Failed to write IAM policy for {resource}: {reason}")]
    PolicyWrite { resource: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        CloudError::Transport(err.to_string())
    }
}

impl CloudError {
    /// Whether the error is an etag mismatch on a policy write.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CloudError::Http { status: 409, .. })
            || matches!(self, CloudError::Http { status: 412, .. })
            || matches!(self, CloudError::Http { body, .. } if body.contains("ABORTED"))
    }
}
