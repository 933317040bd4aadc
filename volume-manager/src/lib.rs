// SPDX-License-Identifier: GPL-3.0-only

//! Volume lifecycle reconciler
//!
//! Turns volume configuration documents into desired volumes and drives
//! each of them through discovery, partitioning, encryption, formatting and
//! mounting. All side effects go through the adapters in
//! `volume-contracts`, so the whole pipeline runs against in-memory fakes
//! as well as against the host.

pub mod adapters;
pub mod builder;
pub mod controller;
pub mod encryption;
pub mod logging;
pub mod matcher;
pub mod mount;
pub mod provision;
pub mod settings;
pub mod transform;

pub use adapters::{AdapterSet, Adapters};
pub use controller::{Controller, Snapshot};
pub use settings::Settings;
pub use transform::{Desired, TransformContext, render};
pub use volume_contracts::Result;
