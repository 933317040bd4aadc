// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of volume lifecycle failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeErrorKind {
    /// A document failed validation.
    InvalidConfig,
    /// A selector failed to parse or type-check.
    InvalidExpression,
    /// A disk selector matched nothing.
    NoDiskMatch,
    /// A volume locator matched more than one volume.
    AmbiguousMatch,
    /// A partition would not fit on its disk.
    OutOfSpace,
    /// No key slot could open the volume.
    EncryptionLocked,
    /// A TPM sealed key no longer unseals under the current PCR state.
    TpmUnsealFailure,
    /// Persisted and declared encryption providers differ.
    EncryptionProviderMismatch,
    Timeout,
    Io,
}

impl VolumeErrorKind {
    /// Whether the controller retries with backoff without a spec change.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NoDiskMatch | Self::EncryptionLocked | Self::Timeout | Self::Io
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConfig => "invalid_config",
            Self::InvalidExpression => "invalid_expression",
            Self::NoDiskMatch => "no_disk_match",
            Self::AmbiguousMatch => "ambiguous_match",
            Self::OutOfSpace => "out_of_space",
            Self::EncryptionLocked => "encryption_locked",
            Self::TpmUnsealFailure => "tpm_unseal_failure",
            Self::EncryptionProviderMismatch => "encryption_provider_mismatch",
            Self::Timeout => "timeout",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for VolumeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy() {
        assert!(VolumeErrorKind::NoDiskMatch.is_retryable());
        assert!(VolumeErrorKind::Io.is_retryable());
        assert!(!VolumeErrorKind::OutOfSpace.is_retryable());
        assert!(!VolumeErrorKind::EncryptionProviderMismatch.is_retryable());
        assert!(!VolumeErrorKind::TpmUnsealFailure.is_retryable());
    }

    #[test]
    fn serde_matches_display() {
        let json = serde_json::to_string(&VolumeErrorKind::TpmUnsealFailure).unwrap();
        assert_eq!(json, "\"tpm_unseal_failure\"");
        assert_eq!(VolumeErrorKind::TpmUnsealFailure.to_string(), "tpm_unseal_failure");
    }
}
