//! Timeout-bounded subprocess execution shared by the CLI adapters.

use std::time::Duration;

use capstan_core::AdapterError;
use tokio::process::Command;
use tracing::debug;

/// Runs a command to completion, capturing output.
///
/// Expiry of `timeout` is reported as a failure of `op`; the child is
/// killed through `kill_on_drop`, which both adapters set on every
/// command they build.
pub(crate) async fn run(op: &str, cmd: &mut Command, timeout: Duration) -> Result<String, AdapterError> {
    debug!(op, "running subprocess");
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|err| AdapterError::new(op, format!("spawn failed: {err}")))?,
        Err(_) => {
            return Err(AdapterError::new(
                op,
                format!("timed out after {}s", timeout.as_secs()),
            ));
        }
    };
    if !output.status.success() {
        return Err(AdapterError::new(op, stderr_summary(&output.stderr)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// First non-empty stderr line, for one-line diagnostics.
pub(crate) fn stderr_summary(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no error output")
        .to_string()
}
