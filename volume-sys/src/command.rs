// SPDX-License-Identifier: GPL-3.0-only

use std::process::{Output, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

use crate::{Result, SysError};

/// Fails with [`SysError::ToolMissing`] unless `tool` is on PATH.
pub fn require_tool(tool: &str) -> Result<()> {
    which::which(tool)
        .map(drop)
        .map_err(|_| SysError::ToolMissing(tool.to_string()))
}

async fn output(program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<Output> {
    require_tool(program)?;
    trace!(program, ?args, "running command");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Only read-only commands run under a timeout.
        .kill_on_drop(true)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = command.spawn()?;
    if let Some(input) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        pipe.write_all(input).await?;
        drop(pipe);
    }

    Ok(child.wait_with_output().await?)
}

fn check(program: &str, output: Output) -> Result<String> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SysError::CommandFailed {
            command: program.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Runs `program` and returns its stdout, failing on a non-zero exit.
pub async fn run(program: &str, args: &[&str]) -> Result<String> {
    let out = output(program, args, None).await?;
    check(program, out)
}

/// Like [`run`], feeding `input` on stdin. Used to pass key material.
pub async fn run_with_stdin(program: &str, args: &[&str], input: &[u8]) -> Result<String> {
    let out = output(program, args, Some(input)).await?;
    check(program, out)
}

/// Runs `program` and returns its exit code and stdout without treating
/// failure as an error.
pub async fn status(program: &str, args: &[&str], input: Option<&[u8]>) -> Result<(i32, String)> {
    let out = output(program, args, input).await?;
    Ok((
        out.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&out.stdout).to_string(),
    ))
}
