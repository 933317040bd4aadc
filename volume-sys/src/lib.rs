// SPDX-License-Identifier: GPL-3.0-only

//! System adapters for the volume manager.
//!
//! Each type implements one of the traits in `volume-contracts` on top of
//! the host: partition tables through sgdisk and sfdisk, filesystems through
//! blkid and mkfs, LUKS2 through cryptsetup, mounts through the kernel, and
//! key sealing through a KMS or the TPM.

pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filesystem;
pub mod identity;
pub mod kms;
pub mod luks;
pub mod meta;
pub mod mount;
pub mod partition;
pub mod path;
pub mod tpm;

pub use config::FileConfigSource;
pub use discovery::LsblkWorld;
pub use error::{Result, SysError};
pub use filesystem::MkfsFilesystems;
pub use identity::DmiIdentity;
pub use kms::HttpKmsClient;
pub use luks::{Cryptsetup, mapper_path};
pub use meta::MetaPartition;
pub use mount::SysMounts;
pub use partition::SgdiskPartitions;
pub use path::SysPaths;
pub use tpm::Tpm2Tools;
