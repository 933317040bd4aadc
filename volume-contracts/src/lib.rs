// SPDX-License-Identifier: GPL-3.0-only

//! Contracts between the volume reconciler and the system it drives
//!
//! Every side effect goes through one of the traits in [`traits`]; the
//! system implementations live in `volume-sys` and in-memory fakes in
//! `volume-testing`. All of them fail with [`VolumeError`].

pub mod error;
pub mod traits;

pub use error::{Result, VolumeError};
pub use traits::{
    ConfigSource, EntryKind, FilesystemOps, FormatRequest, KeyToken, KmsClient, KmsRequest,
    LUKS_SIGNATURE, LuksFormat, LuksOps, MetaStore, MountFlags, MountOps, MountRequest,
    MountedEntry, NodeIdentity, ObservedWorld, PartitionEntry, PartitionOps, PartitionRequest,
    PartitionTable, PathOps, ProbeResult, SECURE_BOOT_PCR, TpmSealer, WorldSource,
};
