// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use tracing::info;
use volume_contracts::{FilesystemOps, FormatRequest, ProbeResult, VolumeError};
use volume_types::FilesystemType;

use crate::command::{run, status};
use crate::{Result, SysError};

/// blkid exit code when no signature was found.
const BLKID_NOTHING_FOUND: i32 = 2;

fn parse_blkid_export(output: &str) -> Option<ProbeResult> {
    let mut probe = ProbeResult::default();

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "TYPE" => probe.name = value.to_string(),
            "LABEL" => probe.label = value.to_string(),
            "UUID" => probe.uuid = value.to_string(),
            _ => {}
        }
    }

    (!probe.name.is_empty()).then_some(probe)
}

/// mkfs command line for `request`, never forcing over an existing signature.
fn mkfs_command(device: &str, request: &FormatRequest) -> Result<(&'static str, Vec<String>)> {
    let (program, mut args, label_flag) = match request.kind {
        FilesystemType::Xfs => ("mkfs.xfs", vec![], "-L"),
        FilesystemType::Ext4 => ("mkfs.ext4", vec![], "-L"),
        FilesystemType::Vfat => ("mkfs.vfat", vec!["-F".to_string(), "32".to_string()], "-n"),
        FilesystemType::Swap => ("mkswap", vec![], "-L"),
        other => {
            return Err(SysError::OperationFailed(format!(
                "cannot format {}",
                other.as_str()
            )));
        }
    };

    if !request.label.is_empty() {
        args.push(label_flag.to_string());
        args.push(request.label.clone());
    }
    args.push(device.to_string());
    Ok((program, args))
}

/// Probing with blkid and formatting with the mkfs family.
#[derive(Debug, Default, Clone)]
pub struct MkfsFilesystems;

#[async_trait]
impl FilesystemOps for MkfsFilesystems {
    async fn probe(&self, device: &str) -> std::result::Result<Option<ProbeResult>, VolumeError> {
        let (code, stdout) = status("blkid", &["-p", "-o", "export", device], None).await?;
        match code {
            0 => Ok(parse_blkid_export(&stdout)),
            BLKID_NOTHING_FOUND => Ok(None),
            code => Err(SysError::CommandFailed {
                command: "blkid".to_string(),
                stderr: format!("exit code {code} probing {device}"),
            }
            .into()),
        }
    }

    async fn format(
        &self,
        device: &str,
        request: &FormatRequest,
    ) -> std::result::Result<(), VolumeError> {
        let (program, args) = mkfs_command(device, request)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run(program, &args).await?;

        info!(device, filesystem = request.kind.as_str(), label = %request.label, "formatted");
        Ok(())
    }
}
