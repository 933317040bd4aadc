// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("document {index}: {message}")]
    Decode { index: usize, message: String },

    #[error("document {index}: unknown kind {kind:?}")]
    UnknownKind { index: usize, kind: String },

    #[error("document {index}: unsupported apiVersion {api_version:?} for {kind}")]
    UnsupportedVersion {
        index: usize,
        kind: String,
        api_version: String,
    },

    #[error("failed to encode {kind}: {message}")]
    Encode { kind: String, message: String },

    #[error("invalid legacy encryption config: {0}")]
    LegacyEncryption(#[from] serde_json::Error),

    #[error("unsupported encryption key type for slot {slot}")]
    UnsupportedKey { slot: u32 },

    /// Validation failed; every problem found is listed.
    #[error("{}", .errors.join("; "))]
    Invalid { errors: Vec<String> },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Warnings and errors gathered while validating a set of documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collects everything `other` found, prefixing each message with `context`.
    pub fn merge_scoped(&mut self, context: &str, other: ValidationReport) {
        self.warnings
            .extend(other.warnings.into_iter().map(|w| format!("{context}: {w}")));
        self.errors
            .extend(other.errors.into_iter().map(|e| format!("{context}: {e}")));
    }

    /// Warnings on success; all errors joined otherwise. `strict` treats
    /// warnings as errors.
    pub fn into_result(self, strict: bool) -> Result<Vec<String>> {
        let mut errors = self.errors;
        if strict {
            errors.extend(self.warnings.iter().cloned());
        }

        if errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ConfigError::Invalid { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_mode_promotes_warnings() {
        let mut report = ValidationReport::default();
        report.warn("grow has no effect");

        assert_eq!(report.clone().into_result(false).unwrap().len(), 1);
        let err = report.into_result(true).unwrap_err();
        assert_eq!(err.to_string(), "grow has no effect");
    }

    #[test]
    fn errors_are_joined() {
        let mut inner = ValidationReport::default();
        inner.error("disk selector is required");
        inner.error("min size or max size is required");

        let mut report = ValidationReport::default();
        report.merge_scoped("UserVolumeConfig \"data\"", inner);

        let err = report.into_result(false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "UserVolumeConfig \"data\": disk selector is required; UserVolumeConfig \"data\": min size or max size is required"
        );
    }
}
