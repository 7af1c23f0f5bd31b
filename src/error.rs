//! Error taxonomy shared by the synchronizer, the remote client and the CLI.
//!
//! | Variant | Fatal? | Notes |
//! |---------|--------|-------|
//! | [`DocqError::Config`] | yes | missing credential, bad config file, unreadable directory |
//! | [`DocqError::UploadRejected`] | no | recorded per file in the sync report |
//! | [`DocqError::RemoteUnavailable`] | no | transport fault or timeout after retries |
//! | [`DocqError::EmptyStore`] | no | nothing indexed yet; shown to the user |

use thiserror::Error;

pub type Result<T, E = DocqError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum DocqError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Upload rejected for {file}: {reason}")]
    UploadRejected { file: String, reason: String },
    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("No documents have been indexed in vector store {store_id} yet")]
    EmptyStore { store_id: String },
    #[error("Question must not be empty")]
    InvalidQuestion,
    #[error("Remote API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Assistant run ended with status '{status}'")]
    RunFailed { status: String },
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocqError {
    /// Whether the failure is worth another attempt with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DocqError::RemoteUnavailable(_))
    }

    /// Process exit code used by the binary when this error ends the run.
    pub fn exit_code(&self) -> i32 {
        match self {
            DocqError::Config(_) => 2,
            _ => 1,
        }
    }
}

impl From<reqwest::Error> for DocqError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DocqError::RemoteUnavailable(format!("request timed out: {}", err))
        } else if err.is_decode() {
            DocqError::Api {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: format!("malformed response body: {}", err),
            }
        } else {
            DocqError::RemoteUnavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_remote_unavailable_is_retryable() {
        assert!(DocqError::RemoteUnavailable("reset".into()).is_retryable());
        assert!(!DocqError::EmptyStore {
            store_id: "vs_1".into()
        }
        .is_retryable());
        assert!(!DocqError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn config_errors_exit_with_two() {
        assert_eq!(DocqError::Config("missing key".into()).exit_code(), 2);
        assert_eq!(DocqError::InvalidQuestion.exit_code(), 1);
    }

    #[test]
    fn upload_rejected_names_the_file() {
        let err = DocqError::UploadRejected {
            file: "a.pdf".into(),
            reason: "too large".into(),
        };
        assert_eq!(err.to_string(), "Upload rejected for a.pdf: too large");
    }
}
