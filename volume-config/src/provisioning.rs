// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use volume_cel::{Expression, env};
use volume_types::{ByteSize, Size};

use crate::error::ValidationReport;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DiskSelectorConfig {
    /// Disk locator expression.
    #[serde(rename = "match", skip_serializing_if = "Expression::is_zero")]
    pub match_: Expression,
}

impl DiskSelectorConfig {
    pub fn is_empty(&self) -> bool {
        self.match_.is_zero()
    }
}

/// Where a volume is carved from and how large it may become.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ProvisioningConfig {
    #[serde(skip_serializing_if = "DiskSelectorConfig::is_empty")]
    pub disk_selector: DiskSelectorConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub grow: Option<bool>,

    #[serde(skip_serializing_if = "ByteSize::is_unset")]
    pub min_size: ByteSize,

    /// Absolute, negative (space left at the end of the disk) or a
    /// percentage of the disk.
    #[serde(skip_serializing_if = "Size::is_unset")]
    pub max_size: Size,
}

impl ProvisioningConfig {
    pub fn is_empty(&self) -> bool {
        self.disk_selector.is_empty()
            && self.grow.is_none()
            && self.min_size.is_unset()
            && self.max_size.is_unset()
    }

    pub fn disk_selector(&self) -> Option<&Expression> {
        (!self.disk_selector.is_empty()).then_some(&self.disk_selector.match_)
    }

    pub fn min_size(&self) -> Option<u64> {
        (!self.min_size.is_unset()).then(|| self.min_size.value())
    }

    /// Byte magnitude of an absolute or negative max size.
    pub fn max_size(&self) -> Option<u64> {
        match &self.max_size {
            Size::Bytes(bytes) if !bytes.is_unset() => Some(bytes.value()),
            _ => None,
        }
    }

    pub fn relative_max_size(&self) -> Option<u64> {
        self.max_size
            .is_relative()
            .then(|| self.max_size.relative_value())
    }

    pub fn max_size_negative(&self) -> bool {
        self.max_size.is_negative()
    }

    /// `required`: the volume must be provisioned, so a selector is needed.
    /// `size_supported`: min/max/grow are meaningful for this volume kind.
    pub fn validate(&self, required: bool, size_supported: bool) -> ValidationReport {
        let mut report = ValidationReport::default();

        match self.disk_selector() {
            Some(selector) => {
                if let Err(err) = Expression::parse_bool(selector.text(), env::disk_locator()) {
                    report.error(format!("disk selector is invalid: {err}"));
                }
            }
            None if required => report.error("disk selector is required"),
            None => {}
        }

        if size_supported {
            if self.min_size() == Some(0) {
                report.error("min size must be greater than zero");
            }
            if self.max_size() == Some(0) {
                report.error("max size must be greater than zero");
            }
        }

        let min = self.min_size();
        let max = self.max_size().filter(|_| !self.max_size_negative());
        let has_max = !self.max_size.is_unset();

        if size_supported && min.is_some() && has_max {
            if let (Some(min), Some(max)) = (min, max)
                && min > max
            {
                report.error("min size is greater than max size");
            }
        } else if required && size_supported && min.is_none() && !has_max {
            report.error("min size or max size is required");
        } else if required && !size_supported && (min.is_some() || has_max || self.grow.is_some()) {
            report.error("min size, max size and grow are not supported");
        }

        if size_supported && self.grow == Some(true) && max.is_some() {
            report.warn("grow is limited by the absolute max size");
        }

        report
    }
}
