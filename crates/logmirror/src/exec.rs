//! Thin wrappers around external commands (ssh, scp, aws, mail).

use crate::error::{MirrorError, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const MAX_STDERR_LEN: usize = 500;

/// Run a command to completion and return its stdout.
///
/// A non-zero exit becomes `MirrorError::Command` carrying the (truncated)
/// stderr.
pub async fn capture(program: &str, args: &[String]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| spawn_error(program, e))?;

    if !output.status.success() {
        return Err(MirrorError::command(
            program,
            exit_message(output.status, &output.stderr),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command, feeding `input` on stdin, and discard its output.
pub async fn run_with_stdin(program: &str, args: &[String], input: &str) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).await?;
        stdin.shutdown().await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(MirrorError::command(
            program,
            exit_message(output.status, &output.stderr),
        ));
    }
    Ok(())
}

fn spawn_error(program: &str, e: std::io::Error) -> MirrorError {
    if e.kind() == std::io::ErrorKind::NotFound {
        MirrorError::command(program, "program not found on PATH")
    } else {
        MirrorError::command(program, format!("failed to spawn: {e}"))
    }
}

fn exit_message(status: std::process::ExitStatus, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return format!("exited with {status}");
    }
    let mut end = stderr.len().min(MAX_STDERR_LEN);
    while !stderr.is_char_boundary(end) {
        end -= 1;
    }
    if end < stderr.len() {
        format!("exited with {status}: {}... (truncated)", &stderr[..end])
    } else {
        format!("exited with {status}: {stderr}")
    }
}
