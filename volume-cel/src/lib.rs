// SPDX-License-Identifier: GPL-3.0-only

//! Sandboxed selector expressions for volume management
//!
//! A small, CEL-shaped language used to pick disks and volumes:
//!
//! ```text
//! disk.transport == "nvme" && disk.size >= 500u * GB && !system_disk
//! volume.partition_label == "STATE" && volume.name != ""
//! ```
//!
//! Expressions are parsed and type-checked against one of the standard
//! environments in [`env`], then evaluated against an [`Activation`] holding
//! the `disk`, `volume` and `system_disk` bindings. Evaluation is pure; a
//! compiled [`Expression`] may be shared across threads.

mod ast;
mod checker;
pub mod env;
mod error;
mod eval;
mod expression;
mod lexer;
mod parser;
mod value;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use env::{DISK_FIELDS, DISK_RECORD, Env, FieldKind, VOLUME_FIELDS, VOLUME_RECORD};
pub use error::{CelError, Result};
pub use eval::Activation;
pub use expression::Expression;
pub use value::{Type, Value};
