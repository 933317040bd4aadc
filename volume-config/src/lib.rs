// SPDX-License-Identifier: GPL-3.0-only

//! Volume configuration documents
//!
//! Decodes the multi-document YAML stream describing user, raw, swap,
//! existing and external volumes, overrides for system volumes, and the
//! legacy machine configuration. [`Config::validate`] checks each document
//! and the relations between them and reports every problem at once.

pub mod container;
pub mod document;
pub mod encryption;
pub mod error;
pub mod legacy;
pub mod provisioning;
pub mod runtime;
pub mod volumes;

pub use container::Config;
pub use document::{API_VERSION, Document, decode, encode};
pub use encryption::{
    EncryptionConfig, EncryptionKeyConfig, KmsKeyConfig, NodeIdKeyConfig, StaticKeyConfig,
    TpmKeyConfig,
};
pub use error::{ConfigError, Result, ValidationReport};
pub use legacy::{LegacyConfig, decode_state_encryption, encode_state_encryption};
pub use provisioning::{DiskSelectorConfig, ProvisioningConfig};
pub use runtime::{FilesystemScrubConfig, ZswapConfig};
pub use volumes::{
    ExistingVolumeConfig, ExternalVolumeConfig, FilesystemConfig, RawVolumeConfig,
    SwapVolumeConfig, SystemVolumeConfig, UserVolumeConfig, split_nfs_source,
};
