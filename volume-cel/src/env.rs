// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide expression environments.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::value::{Type, Value};

/// Record name bound to `disk`.
pub const DISK_RECORD: &str = "disk";

/// Record name bound to `volume`.
pub const VOLUME_RECORD: &str = "volume";

/// Field kinds usable in record schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Uint,
    String,
    StringList,
}

impl FieldKind {
    pub fn as_type(self) -> Type {
        match self {
            FieldKind::Bool => Type::Bool,
            FieldKind::Uint => Type::Uint,
            FieldKind::String => Type::String,
            FieldKind::StringList => Type::List(Box::new(Type::String)),
        }
    }
}

/// Fields of the `disk` record.
pub const DISK_FIELDS: &[(&str, FieldKind)] = &[
    ("dev_path", FieldKind::String),
    ("size", FieldKind::Uint),
    ("io_size", FieldKind::Uint),
    ("sector_size", FieldKind::Uint),
    ("rotational", FieldKind::Bool),
    ("readonly", FieldKind::Bool),
    ("cdrom", FieldKind::Bool),
    ("transport", FieldKind::String),
    ("serial", FieldKind::String),
    ("model", FieldKind::String),
    ("bus_path", FieldKind::String),
    ("modalias", FieldKind::String),
    ("wwid", FieldKind::String),
    ("uuid", FieldKind::String),
    ("sub_system", FieldKind::String),
    ("symlinks", FieldKind::StringList),
];

/// Fields of the `volume` record.
pub const VOLUME_FIELDS: &[(&str, FieldKind)] = &[
    ("dev_path", FieldKind::String),
    ("parent_dev_path", FieldKind::String),
    ("size", FieldKind::Uint),
    ("type", FieldKind::String),
    ("name", FieldKind::String),
    ("label", FieldKind::String),
    ("uuid", FieldKind::String),
    ("partition_label", FieldKind::String),
    ("partition_type", FieldKind::String),
    ("partition_uuid", FieldKind::String),
    ("partition_index", FieldKind::Uint),
    ("offset", FieldKind::Uint),
];

const KIB: u64 = 1024;
const KB: u64 = 1000;

/// Unit constants available in locator environments.
pub const UNIT_CONSTANTS: &[(&str, u64)] = &[
    ("KiB", KIB),
    ("MiB", KIB.pow(2)),
    ("GiB", KIB.pow(3)),
    ("TiB", KIB.pow(4)),
    ("PiB", KIB.pow(5)),
    ("EiB", KIB.pow(6)),
    ("kB", KB),
    ("KB", KB),
    ("MB", KB.pow(2)),
    ("GB", KB.pow(3)),
    ("TB", KB.pow(4)),
    ("PB", KB.pow(5)),
    ("EB", KB.pow(6)),
];

/// Declarations an expression is checked against.
///
/// Environments are immutable once built; the standard ones live for the
/// whole process and are shared by reference.
#[derive(Debug, Clone)]
pub struct Env {
    name: &'static str,
    variables: BTreeMap<String, Type>,
    constants: BTreeMap<String, Value>,
    records: BTreeMap<String, BTreeMap<String, Type>>,
    glob: bool,
}

impl Env {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            variables: BTreeMap::new(),
            constants: BTreeMap::new(),
            records: BTreeMap::new(),
            glob: false,
        }
    }

    fn with_record(mut self, record: &str, fields: &[(&str, FieldKind)]) -> Self {
        let schema = fields
            .iter()
            .map(|(name, kind)| (name.to_string(), kind.as_type()))
            .collect();
        self.records.insert(record.to_string(), schema);
        self.variables
            .insert(record.to_string(), Type::Record(record.to_string()));
        self
    }

    fn with_variable(mut self, name: &str, ty: Type) -> Self {
        self.variables.insert(name.to_string(), ty);
        self
    }

    fn with_units(mut self) -> Self {
        for (name, value) in UNIT_CONSTANTS {
            self.constants.insert(name.to_string(), Value::Uint(*value));
        }
        self
    }

    fn with_glob(mut self) -> Self {
        self.glob = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn variable(&self, name: &str) -> Option<&Type> {
        self.variables.get(name)
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    pub fn field(&self, record: &str, field: &str) -> Option<&Type> {
        self.records.get(record).and_then(|fields| fields.get(field))
    }

    pub fn has_glob(&self) -> bool {
        self.glob
    }
}

static EMPTY: LazyLock<Env> = LazyLock::new(|| Env::new("empty"));

static DISK_LOCATOR: LazyLock<Env> = LazyLock::new(|| {
    Env::new("disk_locator")
        .with_record(DISK_RECORD, DISK_FIELDS)
        .with_variable("system_disk", Type::Bool)
        .with_units()
        .with_glob()
});

static VOLUME_LOCATOR: LazyLock<Env> = LazyLock::new(|| {
    Env::new("volume_locator")
        .with_record(VOLUME_RECORD, VOLUME_FIELDS)
        .with_record(DISK_RECORD, DISK_FIELDS)
        .with_units()
});

/// Environment without any bindings.
pub fn empty() -> &'static Env {
    &EMPTY
}

/// Environment for disk selectors: `disk`, `system_disk`, units, `glob`.
pub fn disk_locator() -> &'static Env {
    &DISK_LOCATOR
}

/// Environment for volume locators: `volume`, `disk`, units.
pub fn volume_locator() -> &'static Env {
    &VOLUME_LOCATOR
}

/// Looks up a standard environment by its name.
pub fn by_name(name: &str) -> Option<&'static Env> {
    match name {
        "empty" => Some(empty()),
        "disk_locator" => Some(disk_locator()),
        "volume_locator" => Some(volume_locator()),
        _ => None,
    }
}
