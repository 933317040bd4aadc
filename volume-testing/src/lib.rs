// SPDX-License-Identifier: GPL-3.0-only

//! In-memory host for driving the volume reconciler end to end
//!
//! [`FakeHost`] implements every adapter contract over one shared state:
//! disks and partition tables, filesystem signatures, LUKS headers, the mount
//! table, the directory tree and the key services. Every side effect is
//! recorded as an [`Event`] so scenarios can assert on ordering. [`Lab`] wires
//! the host into a [`volume_manager::Controller`] and ticks it.

pub mod config;
pub mod host;
pub mod keys;
pub mod lab;
pub mod luks;
pub mod mounts;

pub use config::StaticConfig;
pub use host::{Event, FakeHost, Op};
pub use lab::Lab;
