//! Named sysfs hwmon temperatures.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

pub const HWMON_ROOT: &str = "/sys/class/hwmon";

fn read_trimmed(path: &Path) -> std::io::Result<String> {
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Every `hwmonN` directory under `root` whose `name` file equals `chip`,
/// sorted by directory name.
pub fn chip_dirs(root: &Path, chip: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|dir| read_trimmed(&dir.join("name")).is_ok_and(|n| n == chip))
        .collect();
    dirs.sort();
    dirs
}

/// Reads a millidegree file and converts it to °C.
pub fn read_millidegrees(path: &Path) -> Result<f32> {
    let raw = read_trimmed(path).with_context(|| format!("reading {}", path.display()))?;
    let milli: i64 = raw
        .parse()
        .with_context(|| format!("parsing {} value '{raw}'", path.display()))?;
    Ok(milli as f32 / 1000.0)
}

/// `input` may be given as `temp2` or `temp2_input`.
pub fn read(root: &Path, chip: &str, input: &str) -> Result<f32> {
    let dir = chip_dirs(root, chip)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("hwmon chip '{chip}' not found"))?;
    let file = if input.ends_with("_input") {
        input.to_string()
    } else {
        format!("{input}_input")
    };
    read_millidegrees(&dir.join(file))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    pub(crate) fn fake_chip(root: &Path, dir: &str, name: &str, temps: &[(&str, &str)]) {
        let chip = root.join(dir);
        fs::create_dir_all(&chip).unwrap();
        fs::write(chip.join("name"), format!("{name}\n")).unwrap();
        for (file, value) in temps {
            fs::write(chip.join(file), format!("{value}\n")).unwrap();
        }
    }

    #[test]
    fn reads_named_chip_input() {
        let root = TempDir::new().unwrap();
        fake_chip(root.path(), "hwmon0", "nvme", &[("temp1_input", "38850")]);
        fake_chip(root.path(), "hwmon3", "k10temp", &[("temp1_input", "51250")]);
        assert_eq!(read(root.path(), "k10temp", "temp1").unwrap(), 51.25);
        assert_eq!(read(root.path(), "nvme", "temp1_input").unwrap(), 38.85);
    }

    #[test]
    fn missing_chip_or_input_is_an_error() {
        let root = TempDir::new().unwrap();
        fake_chip(root.path(), "hwmon0", "nvme", &[("temp1_input", "garbage")]);
        assert!(read(root.path(), "k10temp", "temp1").is_err());
        assert!(read(root.path(), "nvme", "temp1").is_err());
        assert!(read(root.path(), "nvme", "temp9").is_err());
    }
}
