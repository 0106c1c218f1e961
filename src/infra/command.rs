//! 外部命令执行 - 带超时

use anyhow::{anyhow, bail, Result};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Run `program args...` and return trimmed stdout.
///
/// The child is killed if it outlives `limit`. A non-zero exit is an error
/// carrying stderr.
pub async fn run_bounded(program: &str, args: &[&str], limit: Duration) -> Result<String> {
    debug!(program = %program, args = ?args, "Running command");

    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = timeout(limit, child)
        .await
        .map_err(|_| anyhow!("{} timed out after {:?}", program, limit))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
