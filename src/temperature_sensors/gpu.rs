//! GPU temperature helpers: `nvidia-smi` first, AMD hwmon second.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::process::Command;

use super::hwmon;

const NVIDIA_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn nvidia(index: u32) -> Result<f32> {
    let index_arg = index.to_string();
    let mut cmd = Command::new("nvidia-smi");
    cmd.args([
        "--query-gpu=temperature.gpu",
        "--format=csv,noheader,nounits",
        "-i",
        index_arg.as_str(),
    ])
    .kill_on_drop(true);
    let output = tokio::time::timeout(NVIDIA_TIMEOUT, cmd.output())
        .await
        .context("nvidia-smi timed out")?
        .context("nvidia-smi not found")?;
    if !output.status.success() {
        bail!("nvidia-smi failed for gpu {index}");
    }
    parse_nvidia(&String::from_utf8_lossy(&output.stdout))
}

fn parse_nvidia(stdout: &str) -> Result<f32> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("empty nvidia-smi output"))?;
    line.parse::<f32>()
        .with_context(|| format!("unexpected nvidia-smi value '{line}'"))
}

/// Edge temperature of the `index`-th `amdgpu` hwmon chip.
pub fn amd(root: &str, index: u32) -> Result<f32> {
    let dirs = hwmon::chip_dirs(Path::new(root), "amdgpu");
    let dir = dirs
        .get(index as usize)
        .ok_or_else(|| anyhow!("amdgpu {index} not present"))?;
    hwmon::read_millidegrees(&dir.join("temp1_input"))
}
