//! User-supplied sensor programs.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::process::Command;

/// Wall-clock budget of one sensor program run.
pub const EXTERNAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs `path` without arguments and parses its stdout as integer °C.
pub async fn run(path: &Path) -> Result<f32> {
    let mut cmd = Command::new(path);
    cmd.kill_on_drop(true);
    let output = tokio::time::timeout(EXTERNAL_TIMEOUT, cmd.output())
        .await
        .map_err(|_| anyhow!("{} exceeded {EXTERNAL_TIMEOUT:?}", path.display()))?
        .with_context(|| format!("spawning {}", path.display()))?;
    if !output.status.success() {
        bail!("{} exited with {}", path.display(), output.status);
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = stdout.trim();
    let celsius: i64 = value
        .parse()
        .with_context(|| format!("{} printed '{value}'", path.display()))?;
    Ok(celsius as f32)
}
