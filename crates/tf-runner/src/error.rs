//! Error types for tf-runner

use thiserror::Error;

/// Errors that can occur while driving Terraform
#[derive(Error, Debug)]
pub enum TfError {
    /// Terraform binary not found
    #[error("Terraform binary not found: {0}")]
    BinaryNotFound(String),

    /// Terraform exited with a non-zero status
    #[error("terraform {command} failed with {}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
    },

    /// Requested output is absent or empty
    #[error("Terraform output not found: {0}")]
    OutputMissing(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = TfError::CommandFailed {
            command: "apply".to_string(),
            code: Some(1),
        };
        assert_eq!(err.to_string(), "terraform apply failed with exit code 1");

        let err = TfError::CommandFailed {
            command: "init".to_string(),
            code: None,
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_output_missing_display() {
        let err = TfError::OutputMissing("project_id".to_string());
        assert!(err.to_string().contains("project_id"));
    }
}
