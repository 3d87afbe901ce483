//! Daemon configuration.
//!
//! A YAML file selects the profile store, the temperature unit, optional
//! subsystems (memory, D-Bus) and the named speed profiles. Every field has a
//! default, so an absent file is not an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result, bail};
use log::info;
use serde::{Deserialize, Serialize};

use crate::descriptor::{self, DeviceDescriptor, Family};
use crate::drivers::memory::{DdrKind, SkuSource};
use crate::profile::SpeedProfile;
use crate::profile::speed::builtin_profiles;
use crate::runtime::RuntimeOptions;
use crate::state::TemperatureUnit;

pub const ENV_CONFIG: &str = "LINKHUBD_CONFIG";

/// Main configuration structure.
///
/// ```yaml
/// version: 1
/// database: /var/lib/linkhubd
/// temperature_unit: celsius
/// memory:
///   enabled: true
///   kind: 4
///   smbus: i2c-0
/// devices:
///   - kind: platinum
///     usb: { vid: 0x1b1c, pid: 0x0c19 }
/// dbus:
///   control: true
///   monitor: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Root of the profile store.
    #[serde(default = "defaults::database")]
    pub database: PathBuf,

    #[serde(default)]
    pub temperature_unit: TemperatureUnit,

    /// Leave fans and pumps under firmware control.
    #[serde(default)]
    pub manual: bool,

    /// Evaluate table profiles as interpolated curves.
    #[serde(default)]
    pub graph_profiles: bool,

    #[serde(default = "defaults::resume_delay_ms")]
    pub resume_delay_ms: u64,

    /// TrueType font for LCD text. The bundled search path is used when unset.
    #[serde(default)]
    pub font_path: Option<PathBuf>,

    #[serde(default)]
    pub memory: MemoryCfg,

    /// Named speed profiles. The built-in set is used when empty.
    #[serde(default)]
    pub speed_profiles: BTreeMap<String, SpeedProfile>,

    /// Extra or restricted USB devices. When non-empty only these start.
    #[serde(default)]
    pub devices: Vec<DeviceSelector>,

    #[serde(default)]
    pub dbus: DbusCfg,
}

/// RGB memory on an SMBus adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCfg {
    #[serde(default)]
    pub enabled: bool,

    /// Read the part number from SPD instead of trusting `sku`.
    #[serde(default)]
    pub decode_sku: bool,

    #[serde(default)]
    pub sku: Option<String>,

    /// DDR generation, 4 or 5.
    #[serde(default = "defaults::memory_kind")]
    pub kind: u8,

    #[serde(default = "defaults::smbus")]
    pub smbus: String,
}

impl Default for MemoryCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            decode_sku: false,
            sku: None,
            kind: defaults::memory_kind(),
            smbus: defaults::smbus(),
        }
    }
}

impl MemoryCfg {
    pub fn ddr_kind(&self) -> Option<DdrKind> {
        DdrKind::from_generation(self.kind)
    }

    /// A fixed part number wins unless decoding was asked for.
    pub fn sku_source(&self) -> SkuSource {
        match &self.sku {
            Some(sku) if !self.decode_sku => SkuSource::Fixed(sku.clone()),
            _ => SkuSource::Decode,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbusCfg {
    /// Publish the control interface on the session bus.
    #[serde(default)]
    pub control: bool,

    /// Follow login1 sleep signals.
    #[serde(default)]
    pub monitor: bool,
}

/// USB device selector for hardware identification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbSelector {
    pub vid: u16,
    pub pid: u16,
    #[serde(default)]
    pub serial: Option<String>,
}

/// One USB device the daemon should drive, by family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DeviceSelector {
    Hydro {
        usb: UsbSelector,
        #[serde(default = "defaults::hydro_fans")]
        fans: u8,
    },
    Platinum { usb: UsbSelector },
    LcdCover { usb: UsbSelector },
    Nexus { usb: UsbSelector },
    Headset {
        usb: UsbSelector,
        #[serde(default)]
        wireless: bool,
    },
    Mouse {
        usb: UsbSelector,
        #[serde(default)]
        wireless: bool,
    },
}

impl DeviceSelector {
    pub fn usb(&self) -> &UsbSelector {
        match self {
            DeviceSelector::Hydro { usb, .. }
            | DeviceSelector::Platinum { usb }
            | DeviceSelector::LcdCover { usb }
            | DeviceSelector::Nexus { usb }
            | DeviceSelector::Headset { usb, .. }
            | DeviceSelector::Mouse { usb, .. } => usb,
        }
    }

    pub fn family(&self) -> Family {
        match self {
            DeviceSelector::Hydro { .. } => Family::Hydro,
            DeviceSelector::Platinum { .. } => Family::Platinum,
            DeviceSelector::LcdCover { .. } => Family::LcdCover,
            DeviceSelector::Nexus { .. } => Family::Nexus,
            DeviceSelector::Headset { .. } => Family::Headset,
            DeviceSelector::Mouse { .. } => Family::Mouse,
        }
    }

    /// Catalog descriptor when the product is known, otherwise one built
    /// for the selected family.
    pub fn descriptor(&self) -> DeviceDescriptor {
        let usb = self.usb();
        if let Some(d) = descriptor::lookup(usb.vid, usb.pid)
            && d.family == self.family()
        {
            return d;
        }
        let mut d = match self {
            DeviceSelector::Hydro { fans, .. } => descriptor::hydro(usb.pid, "Hydro", *fans),
            DeviceSelector::Platinum { .. } => descriptor::platinum(usb.pid, "Platinum"),
            DeviceSelector::LcdCover { .. } => descriptor::lcd_cover(usb.pid, "LCD Cover"),
            DeviceSelector::Nexus { .. } => descriptor::nexus(usb.pid),
            DeviceSelector::Headset { wireless, .. } => {
                descriptor::headset(usb.pid, "Headset", *wireless)
            }
            DeviceSelector::Mouse { wireless, .. } => descriptor::mouse(usb.pid, "Mouse", *wireless),
        };
        d.vendor_id = usb.vid;
        d
    }

    /// Whether an enumerated USB device is the one this selector names.
    pub fn matches(&self, vid: u16, pid: u16, serial: Option<&str>) -> bool {
        let usb = self.usb();
        usb.vid == vid
            && usb.pid == pid
            && usb
                .serial
                .as_deref()
                .is_none_or(|wanted| serial == Some(wanted))
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn database() -> PathBuf {
        PathBuf::from("/var/lib/linkhubd")
    }

    pub fn resume_delay_ms() -> u64 {
        5000
    }

    pub fn memory_kind() -> u8 {
        4
    }

    pub fn smbus() -> String {
        "i2c-0".to_string()
    }

    pub fn hydro_fans() -> u8 {
        2
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            database: defaults::database(),
            temperature_unit: TemperatureUnit::default(),
            manual: false,
            graph_profiles: false,
            resume_delay_ms: defaults::resume_delay_ms(),
            font_path: None,
            memory: MemoryCfg::default(),
            speed_profiles: BTreeMap::new(),
            devices: Vec::new(),
            dbus: DbusCfg::default(),
        }
    }
}

impl Config {
    /// Checks values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            bail!("Unsupported configuration version {}", self.version);
        }
        if self.memory.enabled && self.memory.ddr_kind().is_none() {
            bail!("Memory kind must be 4 or 5, got {}", self.memory.kind);
        }
        for selector in &self.devices {
            if let DeviceSelector::Hydro { fans, usb } = selector
                && *fans > descriptor::HYDRO_MAX_FANS
            {
                bail!(
                    "Hydro {:04x}:{:04x} has {fans} fans, at most {} are supported",
                    usb.vid,
                    usb.pid,
                    descriptor::HYDRO_MAX_FANS
                );
            }
        }
        for (name, profile) in &self.speed_profiles {
            if let crate::profile::SpeedMode::Table { rows } = &profile.mode {
                if rows.is_empty() {
                    bail!("Speed profile '{name}' has no rows");
                }
                if let Some(row) = rows.iter().find(|r| r.min >= r.max) {
                    bail!(
                        "Speed profile '{name}' has an empty row [{}, {})",
                        row.min,
                        row.max
                    );
                }
            }
        }
        Ok(())
    }

    /// Configured profiles, or the built-in set when none are given.
    pub fn speed_profiles(&self) -> BTreeMap<String, SpeedProfile> {
        if self.speed_profiles.is_empty() {
            builtin_profiles()
        } else {
            self.speed_profiles.clone()
        }
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            manual: self.manual,
            graph_profiles: self.graph_profiles,
            temperature_unit: self.temperature_unit,
            resume_delay: Duration::from_millis(self.resume_delay_ms),
            font_path: self.font_path.clone(),
        }
    }
}

/// First existing file of: `LINKHUBD_CONFIG`, the XDG config dir, `/etc`.
fn locate_config() -> Option<PathBuf> {
    if let Ok(env_path) = env::var(ENV_CONFIG) {
        return Some(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("linkhubd/config.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    let etc = Path::new("/etc/linkhubd/config.yml");
    etc.exists().then(|| etc.to_path_buf())
}

/// Configuration plus the file it came from.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Config,
    path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self { config, path }
    }

    /// Loads `path`, or the first file found in the standard locations.
    /// Without any file the defaults are used.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let Some(config_path) = path.or_else(locate_config) else {
            info!("No configuration file found, using defaults");
            return Ok(Self::new(Config::default(), None));
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path)?;
        Ok(Self::new(config, Some(config_path)))
    }

    pub fn get(&self) -> &Config {
        &self.config
    }

    pub fn get_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-reads the file the configuration came from.
    pub fn reload(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        info!("Reloading config from: {}", path.display());
        self.config = Self::load_config_from_path(path)?;
        Ok(())
    }

    /// Writes the configuration back atomically through a temporary file.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let config_yaml =
            serde_yaml::to_string(&self.config).context("Failed to serialize configuration")?;

        let tmp_path = path.with_extension("yml.tmp");
        fs::write(&tmp_path, config_yaml).with_context(|| {
            format!("Failed to write temporary config to {}", tmp_path.display())
        })?;

        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move config to {}", path.display()))?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML config from: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }
}
