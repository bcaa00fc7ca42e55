use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Validation,
    Internal,
}

/// Wire shape for errors on the HTTP and WebSocket surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Failure taxonomy for every store operation.
///
/// `Read` and `Write` are recoverable: the caller may re-invoke the same
/// operation (re-subscribe, re-publish). Nothing retries automatically.
/// `Configuration` is fatal until the endpoint configuration is fixed;
/// operations against a misconfigured client fail fast instead of
/// hanging.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("read failed for '{path}': {reason}")]
    Read { path: String, reason: String },
    #[error("write failed for '{path}': {reason}")]
    Write { path: String, reason: String },
    #[error("store configuration invalid: {0}")]
    Configuration(String),
}

impl StoreError {
    pub fn read(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Read {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn write(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_follows_the_taxonomy() {
        assert!(StoreError::read("sensors", "socket closed").is_recoverable());
        assert!(StoreError::write("commands/buzzer", "timeout").is_recoverable());
        assert!(!StoreError::Configuration("bad endpoint".into()).is_recoverable());
    }

    #[test]
    fn error_codes_serialize_snake_case() {
        let err = ApiError::new(ErrorCode::Unauthorized, "missing token");
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["code"], "unauthorized");
    }
}
