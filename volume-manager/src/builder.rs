// SPDX-License-Identifier: GPL-3.0-only

//! Composable edits of a [`VolumeConfigSpec`].
//!
//! Every `with_*` call appends one step. [`Builder::apply`] runs the steps in
//! order and collects every failure instead of stopping at the first, so a
//! later step overwrites whatever an earlier one set on the same field.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use volume_cel::Expression;
use volume_config::EncryptionConfig;
use volume_types::{
    EncryptionSpec, MountSpec, ProvisioningSpec, SymlinkSpec, VolumeConfig, VolumeConfigSpec,
    VolumeType,
};

/// Failure of a single step.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

type Step = Arc<dyn Fn(&mut VolumeConfigSpec) -> Result<(), StepError> + Send + Sync>;

/// Edits a whole [`VolumeConfig`]; produced by [`Builder::writer_func`].
pub type WriterFn = Arc<dyn Fn(&mut VolumeConfig) -> Result<(), BuildErrors> + Send + Sync>;

/// Every step failure from one [`Builder::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .0.join("; "))]
pub struct BuildErrors(pub Vec<String>);

#[derive(Clone, Default)]
pub struct Builder {
    steps: Vec<Step>,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    fn step(
        mut self,
        step: impl Fn(&mut VolumeConfigSpec) -> Result<(), StepError> + Send + Sync + 'static,
    ) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn with_type(self, ty: VolumeType) -> Self {
        self.step(move |spec| {
            spec.ty = ty;
            Ok(())
        })
    }

    pub fn with_locator(self, locator: Expression) -> Self {
        self.step(move |spec| {
            spec.locator.match_ = locator.clone();
            Ok(())
        })
    }

    pub fn with_disk_locator(self, locator: Expression) -> Self {
        self.step(move |spec| {
            spec.locator.disk_match = locator.clone();
            Ok(())
        })
    }

    pub fn with_provisioning(self, provisioning: ProvisioningSpec) -> Self {
        self.step(move |spec| {
            spec.provisioning = provisioning.clone();
            Ok(())
        })
    }

    pub fn with_mount(self, mount: MountSpec) -> Self {
        self.step(move |spec| {
            spec.mount = mount.clone();
            Ok(())
        })
    }

    pub fn with_symlink(self, symlink: SymlinkSpec) -> Self {
        self.step(move |spec| {
            spec.symlink = symlink.clone();
            Ok(())
        })
    }

    pub fn with_parent_id(self, parent_id: impl Into<String>) -> Self {
        let parent_id = parent_id.into();
        self.step(move |spec| {
            spec.parent_id = parent_id.clone();
            Ok(())
        })
    }

    pub fn with_encryption(self, encryption: EncryptionSpec) -> Self {
        self.step(move |spec| {
            spec.encryption = encryption.clone();
            Ok(())
        })
    }

    /// Converts a config document's encryption section; `None` or a disabled
    /// section clears any encryption set earlier.
    pub fn with_convert_encryption_configuration(self, config: Option<&EncryptionConfig>) -> Self {
        let config = config.filter(|c| c.is_enabled()).cloned();
        self.step(move |spec| {
            spec.encryption = match &config {
                Some(config) => config.to_spec()?,
                None => EncryptionSpec::default(),
            };
            Ok(())
        })
    }

    pub fn with_func(
        self,
        func: impl Fn(&mut VolumeConfigSpec) -> Result<(), StepError> + Send + Sync + 'static,
    ) -> Self {
        self.step(func)
    }

    pub fn apply(&self, spec: &mut VolumeConfigSpec) -> Result<(), BuildErrors> {
        let errors: Vec<String> = self
            .steps
            .iter()
            .filter_map(|step| step(spec).err())
            .map(|err| err.to_string())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BuildErrors(errors))
        }
    }

    pub fn writer_func(self) -> WriterFn {
        Arc::new(move |config: &mut VolumeConfig| self.apply(&mut config.spec))
    }
}
