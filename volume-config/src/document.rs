// SPDX-License-Identifier: GPL-3.0-only

//! Multi-document YAML decoding and encoding

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::error::{ConfigError, Result};
use crate::legacy::{LEGACY_VERSION, LegacyConfig};
use crate::runtime::{FilesystemScrubConfig, ZswapConfig};
use crate::volumes::{
    ExistingVolumeConfig, ExternalVolumeConfig, RawVolumeConfig, SwapVolumeConfig,
    SystemVolumeConfig, UserVolumeConfig,
};

pub const API_VERSION: &str = "v1alpha1";

/// One decoded configuration document.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    UserVolume(UserVolumeConfig),
    RawVolume(RawVolumeConfig),
    SwapVolume(SwapVolumeConfig),
    ExistingVolume(ExistingVolumeConfig),
    ExternalVolume(ExternalVolumeConfig),
    SystemVolume(SystemVolumeConfig),
    Zswap(ZswapConfig),
    FilesystemScrub(FilesystemScrubConfig),
    /// Recognized but not handled by the volume core; kept verbatim.
    Opaque { kind: String, body: Mapping },
    Legacy(LegacyConfig),
}

/// Kinds accepted but not interpreted.
const OPAQUE_KINDS: [&str; 1] = ["LVMVolumeConfig"];

impl Document {
    pub fn kind(&self) -> &str {
        match self {
            Document::UserVolume(_) => "UserVolumeConfig",
            Document::RawVolume(_) => "RawVolumeConfig",
            Document::SwapVolume(_) => "SwapVolumeConfig",
            Document::ExistingVolume(_) => "ExistingVolumeConfig",
            Document::ExternalVolume(_) => "ExternalVolumeConfig",
            Document::SystemVolume(_) => "VolumeConfig",
            Document::Zswap(_) => "ZswapConfig",
            Document::FilesystemScrub(_) => "FilesystemScrubConfig",
            Document::Opaque { kind, .. } => kind,
            Document::Legacy(_) => "v1alpha1.Config",
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Document::UserVolume(d) => Some(&d.name),
            Document::RawVolume(d) => Some(&d.name),
            Document::SwapVolume(d) => Some(&d.name),
            Document::ExistingVolume(d) => Some(&d.name),
            Document::ExternalVolume(d) => Some(&d.name),
            Document::SystemVolume(d) => Some(&d.name),
            Document::FilesystemScrub(d) => Some(&d.name),
            Document::Opaque { body, .. } => body.get("name").and_then(Value::as_str),
            Document::Zswap(_) | Document::Legacy(_) => None,
        }
    }

    /// `Kind "name"` or just `Kind`, for messages.
    pub fn describe(&self) -> String {
        match self.name() {
            Some(name) => format!("{} {name:?}", self.kind()),
            None => self.kind().to_string(),
        }
    }

    fn body(&self) -> Result<Value> {
        let encoded = match self {
            Document::UserVolume(d) => serde_yaml::to_value(d),
            Document::RawVolume(d) => serde_yaml::to_value(d),
            Document::SwapVolume(d) => serde_yaml::to_value(d),
            Document::ExistingVolume(d) => serde_yaml::to_value(d),
            Document::ExternalVolume(d) => serde_yaml::to_value(d),
            Document::SystemVolume(d) => serde_yaml::to_value(d),
            Document::Zswap(d) => serde_yaml::to_value(d),
            Document::FilesystemScrub(d) => serde_yaml::to_value(d),
            Document::Opaque { body, .. } => Ok(Value::Mapping(body.clone())),
            Document::Legacy(d) => serde_yaml::to_value(d),
        };
        encoded.map_err(|err| ConfigError::Encode {
            kind: self.kind().to_string(),
            message: err.to_string(),
        })
    }

    /// The document as a YAML mapping, header first.
    pub fn to_value(&self) -> Result<Value> {
        let body = self.body()?;
        if matches!(self, Document::Legacy(_)) {
            return Ok(body);
        }

        let mut mapping = Mapping::new();
        mapping.insert("apiVersion".into(), API_VERSION.into());
        mapping.insert("kind".into(), self.kind().into());
        if let Value::Mapping(fields) = body {
            mapping.extend(fields);
        }
        Ok(Value::Mapping(mapping))
    }
}

fn typed<T: DeserializeOwned>(index: usize, body: Mapping) -> Result<T> {
    serde_yaml::from_value(Value::Mapping(body)).map_err(|err| ConfigError::Decode {
        index,
        message: err.to_string(),
    })
}

fn decode_one(index: usize, value: Value) -> Result<Document> {
    let Value::Mapping(mut body) = value else {
        return Err(ConfigError::Decode {
            index,
            message: "document is not a mapping".to_string(),
        });
    };

    let Some(kind) = body.remove("kind") else {
        if body.get("version").and_then(Value::as_str) == Some(LEGACY_VERSION) {
            return typed(index, body).map(Document::Legacy);
        }
        return Err(ConfigError::Decode {
            index,
            message: "missing kind".to_string(),
        });
    };

    let kind = kind.as_str().unwrap_or_default().to_string();
    let api_version = body
        .remove("apiVersion")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    if api_version != API_VERSION {
        return Err(ConfigError::UnsupportedVersion {
            index,
            kind,
            api_version,
        });
    }

    Ok(match kind.as_str() {
        "UserVolumeConfig" => Document::UserVolume(typed(index, body)?),
        "RawVolumeConfig" => Document::RawVolume(typed(index, body)?),
        "SwapVolumeConfig" => Document::SwapVolume(typed(index, body)?),
        "ExistingVolumeConfig" => Document::ExistingVolume(typed(index, body)?),
        "ExternalVolumeConfig" => Document::ExternalVolume(typed(index, body)?),
        "VolumeConfig" => Document::SystemVolume(typed(index, body)?),
        "ZswapConfig" => Document::Zswap(typed(index, body)?),
        "FilesystemScrubConfig" => Document::FilesystemScrub(typed(index, body)?),
        other if OPAQUE_KINDS.contains(&other) => Document::Opaque { kind, body },
        _ => return Err(ConfigError::UnknownKind { index, kind }),
    })
}

/// Decodes `---` separated documents. Empty documents are skipped.
pub fn decode(text: &str) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for (index, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Value::deserialize(de).map_err(|err| ConfigError::Decode {
            index,
            message: err.to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        documents.push(decode_one(index, value)?);
    }

    Ok(documents)
}

/// Encodes documents as a `---` separated stream accepted by [`decode`].
pub fn encode(documents: &[Document]) -> Result<String> {
    let mut out = String::new();

    for (i, document) in documents.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        let text = serde_yaml::to_string(&document.to_value()?).map_err(|err| {
            ConfigError::Encode {
                kind: document.kind().to_string(),
                message: err.to_string(),
            }
        })?;
        out.push_str(&text);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = r#"
apiVersion: v1alpha1
kind: UserVolumeConfig
name: ceph-data
provisioning:
  diskSelector:
    match: disk.transport == "nvme"
  maxSize: 50GiB
---
apiVersion: v1alpha1
kind: RawVolumeConfig
name: raw-data
provisioning:
  diskSelector:
    match: system_disk
  minSize: 1GiB
---
---
apiVersion: v1alpha1
kind: LVMVolumeConfig
name: vg0
---
version: v1alpha1
machine:
  type: controlplane
"#;

    #[test]
    fn decodes_mixed_stream() {
        let documents = decode(STREAM).unwrap();
        let kinds: Vec<_> = documents.iter().map(Document::kind).collect();
        assert_eq!(
            kinds,
            vec!["UserVolumeConfig", "RawVolumeConfig", "LVMVolumeConfig", "v1alpha1.Config"]
        );
        assert_eq!(documents[0].describe(), "UserVolumeConfig \"ceph-data\"");
        assert_eq!(documents[2].name(), Some("vg0"));
    }

    #[test]
    fn encode_round_trips() {
        let documents = decode(STREAM).unwrap();
        let text = encode(&documents).unwrap();
        assert!(text.starts_with("apiVersion: v1alpha1\nkind: UserVolumeConfig\n"));
        assert_eq!(decode(&text).unwrap(), documents);
    }

    #[test]
    fn rejects_unknown_kinds_and_fields() {
        let err = decode("apiVersion: v1alpha1\nkind: FancyVolume\nname: x\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKind { .. }));

        let err =
            decode("apiVersion: v1alpha1\nkind: RawVolumeConfig\nname: x\nsize: 1GiB\n").unwrap_err();
        assert!(matches!(err, ConfigError::Decode { index: 0, .. }));

        let err = decode("apiVersion: v1alpha2\nkind: RawVolumeConfig\nname: x\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion { .. }));

        let err = decode("name: x\n").unwrap_err();
        assert!(err.to_string().contains("missing kind"));
    }
}
