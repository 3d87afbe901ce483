use clap::Parser;
use std::path::PathBuf;

use crate::config::Config;

/// linkhubd: daemon for AIO coolers, RGB memory, LCD covers and peripherals
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Leave fans and pumps under firmware control
    #[arg(long)]
    pub manual: bool,

    /// Follow login1 sleep and resume signals
    #[arg(long = "dbus-monitor")]
    pub dbus_monitor: bool,

    /// Read the memory part number from SPD
    #[arg(long = "decode-memory-sku")]
    pub decode_memory_sku: bool,

    /// Part number of the installed memory kit; enables memory support
    #[arg(long = "memory-sku", value_name = "SKU")]
    pub memory_sku: Option<String>,

    /// DDR generation of the installed memory
    #[arg(long = "memory-type", value_name = "4|5", value_parser = clap::value_parser!(u8).range(4..=5))]
    pub memory_type: Option<u8>,

    /// SMBus adapter of the memory, e.g. i2c-0
    #[arg(long = "memory-smbus", value_name = "i2c-N")]
    pub memory_smbus: Option<String>,

    /// Evaluate table speed profiles as curves
    #[arg(long = "graph-profiles")]
    pub graph_profiles: bool,

    /// Delay before re-enumerating devices after resume
    #[arg(long = "resume-delay", value_name = "ms")]
    pub resume_delay: Option<u64>,

    /// Profile store root
    #[arg(long = "database", value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Flags win over the file. Switches only ever turn features on.
    pub fn apply(&self, config: &mut Config) {
        config.manual |= self.manual;
        config.graph_profiles |= self.graph_profiles;
        config.dbus.monitor |= self.dbus_monitor;

        let memory = &mut config.memory;
        if self.decode_memory_sku {
            memory.decode_sku = true;
            memory.enabled = true;
        }
        if let Some(sku) = &self.memory_sku {
            memory.sku = Some(sku.clone());
            memory.enabled = true;
        }
        if let Some(kind) = self.memory_type {
            memory.kind = kind;
        }
        if let Some(smbus) = &self.memory_smbus {
            memory.smbus = smbus.clone();
        }

        if let Some(delay) = self.resume_delay {
            config.resume_delay_ms = delay;
        }
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
    }
}
