// SPDX-License-Identifier: GPL-3.0-only

pub mod filesystem;
pub mod keys;
pub mod luks;
pub mod mount;
pub mod partition;
pub mod path;
pub mod world;

pub use filesystem::{FilesystemOps, FormatRequest, LUKS_SIGNATURE, ProbeResult};
pub use keys::{KmsClient, KmsRequest, NodeIdentity, SECURE_BOOT_PCR, TpmSealer};
pub use luks::{KeyToken, LuksFormat, LuksOps};
pub use mount::{MountFlags, MountOps, MountRequest, MountedEntry};
pub use partition::{PartitionEntry, PartitionOps, PartitionRequest, PartitionTable};
pub use path::{EntryKind, PathOps};
pub use world::{ConfigSource, MetaStore, ObservedWorld, WorldSource};
