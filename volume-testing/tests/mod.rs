// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end reconcile scenarios against the in-memory host.

pub mod common;
pub mod encryption;
pub mod lifecycle;
pub mod provisioning;
pub mod transforms;
