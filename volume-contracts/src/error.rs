// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;
use volume_cel::CelError;
use volume_config::ConfigError;
use volume_types::VolumeErrorKind;

/// Error returned by every adapter and by the reconciler steps.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct VolumeError {
    pub kind: VolumeErrorKind,
    pub message: String,
}

impl VolumeError {
    pub fn new(kind: VolumeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(VolumeErrorKind::Io, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(VolumeErrorKind::InvalidConfig, message)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(VolumeErrorKind::Timeout, format!("{operation} timed out"))
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<std::io::Error> for VolumeError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<CelError> for VolumeError {
    fn from(err: CelError) -> Self {
        let kind = match err {
            CelError::InvalidExpression { .. } | CelError::Decode(_) => {
                VolumeErrorKind::InvalidExpression
            }
            CelError::Eval(_) => VolumeErrorKind::InvalidConfig,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ConfigError> for VolumeError {
    fn from(err: ConfigError) -> Self {
        Self::invalid_config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VolumeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_error_roundtrips() {
        let error = VolumeError::new(VolumeErrorKind::OutOfSpace, "need 2 GiB on /dev/sda");
        let json = serde_json::to_string(&error).expect("serialize error");
        let parsed: VolumeError = serde_json::from_str(&json).expect("deserialize error");
        assert_eq!(parsed, error);
        assert_eq!(error.to_string(), "out_of_space: need 2 GiB on /dev/sda");
    }

    #[test]
    fn conversions_pick_kinds() {
        let err: VolumeError = std::io::Error::other("EIO").into();
        assert_eq!(err.kind, VolumeErrorKind::Io);
        assert!(err.is_retryable());

        let err: VolumeError =
            volume_cel::Expression::parse_bool("disk.", volume_cel::env::disk_locator())
                .unwrap_err()
                .into();
        assert_eq!(err.kind, VolumeErrorKind::InvalidExpression);
        assert!(!err.is_retryable());
    }
}
