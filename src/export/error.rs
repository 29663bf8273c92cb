use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Failures of an export request, one variant per pipeline stage
#[derive(Debug)]
pub enum ExportError {
    /// Malformed or incomplete request
    Validation(String),

    /// The exporter could not be started
    Spawn(String),

    /// The exporter ran and exited with a nonzero code
    ExporterExit { code: Option<i32>, output: String },

    /// The exporter did not finish within the configured limit
    Timeout { seconds: u64 },

    /// Restructuring the emitted files failed
    Normalization(String),

    /// Building or streaming the archive failed
    Archive(String),

    /// The control plane could not list resources
    Enumeration(String),

    /// No usable control-plane credential
    Credential(String),

    /// Workspace I/O
    Io(std::io::Error),
}

impl ExportError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExportError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map an anyhow chain into a stage error, keeping the full context
    pub fn normalization(err: anyhow::Error) -> Self {
        ExportError::Normalization(format!("{:#}", err))
    }

    pub fn archive(err: anyhow::Error) -> Self {
        ExportError::Archive(format!("{:#}", err))
    }

    pub fn enumeration(err: anyhow::Error) -> Self {
        ExportError::Enumeration(format!("{:#}", err))
    }

    pub fn credential(err: anyhow::Error) -> Self {
        ExportError::Credential(format!("{:#}", err))
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Validation(msg) => write!(f, "Invalid request: {}", msg),
            ExportError::Spawn(msg) => write!(f, "Failed to start exporter: {}", msg),
            ExportError::ExporterExit { code, output } => {
                write!(f, "Exporter failed")?;

                if let Some(code) = code {
                    write!(f, " (exit code {})", code)?;
                }

                if output.trim().is_empty() {
                    Ok(())
                } else {
                    write!(f, ": {}", output.trim())
                }
            }
            ExportError::Timeout { seconds } => {
                write!(f, "Exporter did not finish within {} seconds", seconds)
            }
            ExportError::Normalization(msg) => {
                write!(f, "Failed to normalize exported files: {}", msg)
            }
            ExportError::Archive(msg) => write!(f, "Failed to create archive: {}", msg),
            ExportError::Enumeration(msg) => write!(f, "Failed to list resources: {}", msg),
            ExportError::Credential(msg) => write!(f, "Credential error: {}", msg),
            ExportError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ExportError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = Json(ErrorBody {
            success: false,
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ExportError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ExportError::Timeout { seconds: 1 }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ExportError::Spawn("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_exporter_exit_message_includes_diagnostics() {
        let err = ExportError::ExporterExit {
            code: Some(2),
            output: "auth error\n".to_string(),
        };
        assert_eq!(err.to_string(), "Exporter failed (exit code 2): auth error");
    }

    #[test]
    fn test_anyhow_context_is_preserved() {
        let err = anyhow::anyhow!("disk full").context("Failed to write main.tf");
        let mapped = ExportError::normalization(err);
        assert!(mapped.to_string().contains("Failed to write main.tf: disk full"));
    }
}
