// SPDX-License-Identifier: GPL-3.0-only

//! Config documents to desired [`VolumeConfig`] resources.
//!
//! Transformers turn the document set into [`VolumeResource`]s: system
//! volumes first in a fixed order, then user, raw, existing, external and
//! swap volumes. [`render`] builds each resource and checks the result as a
//! whole before anything is handed to the controller.

pub mod matchers;
pub mod system;
pub mod user;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use volume_cel::CelError;
use volume_config::{Config, ConfigError};
use volume_contracts::VolumeError;
use volume_types::constants::{PARTITION_LABEL_LENGTH, ROOT_MOUNT_ID};
use volume_types::{VolumeConfig, VolumeErrorKind, VolumeLabel, VolumeMountRequest, VolumeType};

use crate::builder::{BuildErrors, WriterFn};

/// Recorded as the requester of every emitted mount request.
pub const REQUESTER: &str = "volume-manager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountAction {
    Emit,
    /// No mount request is created for the volume.
    Skip,
}

pub type MountTransformFn = Arc<dyn Fn(&mut VolumeMountRequest) -> MountAction + Send + Sync>;

/// One desired volume before it is materialized.
#[derive(Clone)]
pub struct VolumeResource {
    pub volume_id: String,
    pub label: VolumeLabel,
    pub transform: WriterFn,
    pub mount_transform: MountTransformFn,
}

impl fmt::Debug for VolumeResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeResource")
            .field("volume_id", &self.volume_id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl VolumeResource {
    pub fn new(volume_id: impl Into<String>, label: VolumeLabel, transform: WriterFn) -> Self {
        Self {
            volume_id: volume_id.into(),
            label,
            transform,
            mount_transform: Arc::new(|_| MountAction::Emit),
        }
    }

    pub fn with_mount_transform(
        mut self,
        mount_transform: impl Fn(&mut VolumeMountRequest) -> MountAction + Send + Sync + 'static,
    ) -> Self {
        self.mount_transform = Arc::new(mount_transform);
        self
    }

    pub fn skip_mount(self) -> Self {
        self.with_mount_transform(|_| MountAction::Skip)
    }

    /// Runs the transform against a fresh resource.
    pub fn build(&self) -> Result<VolumeConfig, TransformError> {
        let mut config = VolumeConfig::new(&self.volume_id, self.label);
        (self.transform)(&mut config).map_err(|errors| TransformError::Build {
            volume_id: self.volume_id.clone(),
            errors,
        })?;
        Ok(config)
    }

    pub fn mount_request(&self) -> Option<VolumeMountRequest> {
        let mut request = VolumeMountRequest {
            id: self.volume_id.clone(),
            volume_id: self.volume_id.clone(),
            requester: REQUESTER.to_string(),
            read_only: false,
        };
        match (self.mount_transform)(&mut request) {
            MountAction::Emit => Some(request),
            MountAction::Skip => None,
        }
    }
}

/// Node facts the transformers depend on besides the documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformContext {
    pub in_container: bool,
    pub agent_mode: bool,
    /// STATE encryption record read from META.
    pub state_encryption_meta: Option<Vec<u8>>,
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("volume {volume_id}: {errors}")]
    Build {
        volume_id: String,
        errors: BuildErrors,
    },

    #[error("invalid built-in selector: {0}")]
    Expression(#[from] CelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown parent directory volume {parent:?} for {path:?}")]
    UnknownParentDirectory { parent: String, path: String },

    #[error("volume {name:?}: unsupported volume type {ty}")]
    UnsupportedType { name: String, ty: VolumeType },

    #[error("duplicate volume ID {0:?}")]
    DuplicateId(String),

    #[error("volume {volume_id}: partition label {label:?} exceeds {PARTITION_LABEL_LENGTH} bytes")]
    LabelTooLong { volume_id: String, label: String },

    #[error("volume {volume_id}: parent {parent_id:?} is not declared")]
    UndeclaredParent {
        volume_id: String,
        parent_id: String,
    },

    #[error("volume {0}: parent relation forms a cycle")]
    Cycle(String),
}

impl From<TransformError> for VolumeError {
    fn from(err: TransformError) -> Self {
        let kind = match err {
            TransformError::Expression(_) => VolumeErrorKind::InvalidExpression,
            _ => VolumeErrorKind::InvalidConfig,
        };
        VolumeError::new(kind, err.to_string())
    }
}

/// Every resource for `config`, system volumes first.
pub fn resources(
    config: &Config,
    ctx: &TransformContext,
) -> Result<Vec<VolumeResource>, TransformError> {
    let mut resources = system::system_volumes(config, ctx)?;
    resources.extend(user::user_volumes(config)?);
    Ok(resources)
}

/// Materialized output of the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Desired {
    /// Sorted by volume ID.
    pub configs: Vec<VolumeConfig>,
    pub mount_requests: Vec<VolumeMountRequest>,
}

impl Desired {
    pub fn config(&self, volume_id: &str) -> Option<&VolumeConfig> {
        self.configs.iter().find(|c| c.id == volume_id)
    }

    pub fn mount_request(&self, volume_id: &str) -> Option<&VolumeMountRequest> {
        self.mount_requests.iter().find(|r| r.volume_id == volume_id)
    }
}

/// Builds every resource and checks the set.
pub fn render(config: &Config, ctx: &TransformContext) -> Result<Desired, TransformError> {
    let resources = resources(config, ctx)?;

    let mut configs = Vec::with_capacity(resources.len());
    let mut mount_requests = Vec::new();
    let mut seen = BTreeSet::new();

    for resource in &resources {
        if !seen.insert(resource.volume_id.clone()) {
            return Err(TransformError::DuplicateId(resource.volume_id.clone()));
        }
        configs.push(resource.build()?);
        mount_requests.extend(resource.mount_request());
    }

    check_labels(&configs)?;
    check_topology(&configs)?;

    configs.sort_by(|a, b| a.id.cmp(&b.id));
    mount_requests.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Desired {
        configs,
        mount_requests,
    })
}

fn check_labels(configs: &[VolumeConfig]) -> Result<(), TransformError> {
    for config in configs {
        let label = &config.spec.provisioning.partition_spec.label;
        if label.len() > PARTITION_LABEL_LENGTH {
            return Err(TransformError::LabelTooLong {
                volume_id: config.id.clone(),
                label: label.clone(),
            });
        }
    }
    Ok(())
}

fn is_root(parent_id: &str) -> bool {
    parent_id.is_empty() || parent_id == ROOT_MOUNT_ID
}

/// Volume and mount parents of a resource, root excluded.
pub fn parents(config: &VolumeConfig) -> impl Iterator<Item = &str> {
    [
        config.spec.parent_id.as_str(),
        config.spec.mount.parent_id.as_str(),
    ]
    .into_iter()
    .filter(|p| !is_root(p))
}

/// Parents must be declared and the parent relation must be a forest.
fn check_topology(configs: &[VolumeConfig]) -> Result<(), TransformError> {
    let graph: BTreeMap<&str, Vec<&str>> = configs
        .iter()
        .map(|c| (c.id.as_str(), parents(c).collect()))
        .collect();

    for (id, parents) in &graph {
        if let Some(parent) = parents.iter().find(|p| !graph.contains_key(*p)) {
            return Err(TransformError::UndeclaredParent {
                volume_id: id.to_string(),
                parent_id: parent.to_string(),
            });
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    for root in graph.keys() {
        let mut stack = vec![(*root, 0usize)];
        while let Some((id, next)) = stack.pop() {
            if next == 0 {
                match marks.get(id) {
                    Some(Mark::Done) => continue,
                    Some(Mark::Visiting) => return Err(TransformError::Cycle(id.to_string())),
                    None => {
                        marks.insert(id, Mark::Visiting);
                    }
                }
            }

            match graph.get(id).and_then(|p| p.get(next)) {
                Some(parent) => {
                    stack.push((id, next + 1));
                    match marks.get(parent) {
                        Some(Mark::Visiting) => {
                            return Err(TransformError::Cycle(parent.to_string()));
                        }
                        Some(Mark::Done) => {}
                        None => stack.push((parent, 0)),
                    }
                }
                None => {
                    marks.insert(id, Mark::Done);
                }
            }
        }
    }

    Ok(())
}
