// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;
use volume_contracts::VolumeError;
use volume_types::VolumeErrorKind;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    #[error("required tool {0:?} not found in PATH")]
    ToolMissing(String),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("unexpected output from {command}: {message}")]
    Parse { command: String, message: String },

    #[error("KMS request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TPM unseal failed: {0}")]
    TpmUnseal(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl SysError {
    pub(crate) fn parse(command: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            command: command.to_string(),
            message: message.into(),
        }
    }
}

impl From<SysError> for VolumeError {
    fn from(err: SysError) -> Self {
        let kind = match &err {
            SysError::TpmUnseal(_) => VolumeErrorKind::TpmUnsealFailure,
            SysError::Http(e) if e.is_timeout() => VolumeErrorKind::Timeout,
            _ => VolumeErrorKind::Io,
        };
        VolumeError::new(kind, err.to_string())
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
