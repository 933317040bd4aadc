// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for volume lifecycle management
//!
//! This crate defines the resources every other layer exchanges:
//!
//! - **volume-config**: decodes documents into the sizes and specs defined here
//! - **volume-manager**: emits [`VolumeConfig`], [`VolumeStatus`],
//!   [`VolumeMountRequest`] and [`MountStatus`]
//! - **volume-sys**: reports [`DiskSpec`] and [`DiscoveredVolumeSpec`]
//!
//! ## Layout
//!
//! - [`size`] → byte and percentage sizes with human readable I/O
//! - [`volume`], [`spec`], [`encryption`] → the desired state of a volume
//! - [`disk`] → the observed block devices selectors run against
//! - [`status`] → observed lifecycle state

pub mod common;
pub mod constants;
pub mod disk;
pub mod encryption;
pub mod error;
pub mod partition_types;
pub mod size;
pub mod spec;
pub mod status;
pub mod volume;

pub use common::{ByteRange, GPT_ALIGNMENT_BYTES, align_down, align_up, bytes_to_pretty};
pub use disk::{DiscoveredVolumeSpec, DiskSpec, SystemDisk};
pub use encryption::{
    DEFAULT_CIPHER, EncryptionKey, EncryptionKeyKind, EncryptionProvider, EncryptionSpec,
};
pub use error::VolumeErrorKind;
pub use partition_types::{
    LINUX_FILESYSTEM_DATA, LINUX_SWAP, PARTITION_TYPES, PartitionTypeInfo, partition_type_name,
};
pub use size::{ByteSize, PercentageSize, Size, SizeError};
pub use spec::{
    DiskSelector, FilesystemSpec, LocatorSpec, MountParameter, MountSpec, PartitionSpec,
    ProvisioningSpec, SymlinkSpec, VolumeConfigSpec,
};
pub use status::{MountStatus, VolumeMountRequest, VolumePhase, VolumeStatus};
pub use volume::{FilesystemType, VolumeConfig, VolumeLabel, VolumeType};
