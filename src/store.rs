//! JSON profile store under the database root.
//!
//! Layout:
//!
//! ```text
//! <root>/profiles/<serial>.json         active device profile
//! <root>/profiles/<serial>-<name>.json  saved presets
//! <root>/rgb/<serial>.json              RGB catalog
//! <root>/lcd/{arc,double-arc,animation}.json, lcd/images/*.gif
//! <root>/audio.json
//! ```
//!
//! Writes go through a temporary file and a rename so readers never observe
//! a half-written profile.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{ConfigError, DeviceError};

pub const PROFILES_DIR: &str = "profiles";
pub const RGB_DIR: &str = "rgb";
pub const LCD_DIR: &str = "lcd";
pub const LCD_IMAGES_DIR: &str = "lcd/images";

/// Creates the directory skeleton. Failure here is a bootstrap error.
pub fn prepare_root(root: &Path) -> std::io::Result<()> {
    for dir in [PROFILES_DIR, RGB_DIR, LCD_DIR, LCD_IMAGES_DIR] {
        fs::create_dir_all(root.join(dir))?;
    }
    Ok(())
}

/// Typed view on one directory of the store.
#[derive(Debug, Clone)]
pub struct ProfileStore<T> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ProfileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// `subdir` may be empty for files directly under the root.
    pub fn new(root: &Path, subdir: &str) -> Self {
        Self {
            dir: root.join(subdir),
            _marker: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn try_load(&self, key: &str) -> Result<T, ConfigError> {
        let path = self.path(key);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::MissingFile(path));
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        serde_json::from_str(&content).map_err(|e| ConfigError::BadJson {
            path,
            message: e.to_string(),
        })
    }

    pub fn save(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let path = self.path(key);
        let json = serde_json::to_string_pretty(value).map_err(|e| ConfigError::BadJson {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::create_dir_all(&self.dir).map_err(|source| ConfigError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| ConfigError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("saved {}", path.display());
        Ok(())
    }

    pub fn save_named(&self, serial: &str, name: &str, value: &T) -> Result<(), ConfigError> {
        self.save(&named_key(serial, name), value)
    }

    pub fn load_named(&self, serial: &str, name: &str) -> Result<T, ConfigError> {
        self.try_load(&named_key(serial, name))
    }

    /// Removes a saved preset. Missing presets are not an error.
    pub fn delete(&self, serial: &str, name: &str) -> Result<(), ConfigError> {
        let path = self.path(&named_key(serial, name));
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    /// Names of the presets saved for `serial`, sorted.
    ///
    /// A store directory that cannot be listed is fatal for the device.
    pub fn list(&self, serial: &str) -> Result<Vec<String>, DeviceError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            DeviceError::Fatal(format!("cannot list {}: {e}", self.dir.display()))
        })?;
        let prefix = format!("{serial}-");
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|file| {
                file.strip_suffix(".json")
                    .and_then(|stem| stem.strip_prefix(&prefix))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }
}

impl<T> ProfileStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Loads `key`, falling back to `T::default()` on a missing or bad file.
    pub fn load(&self, key: &str) -> T {
        match self.try_load(key) {
            Ok(value) => value,
            Err(ConfigError::MissingFile(path)) => {
                debug!("{} not found, using defaults", path.display());
                T::default()
            }
            Err(e) => {
                warn!("{e}, using defaults");
                T::default()
            }
        }
    }
}

fn named_key(serial: &str, name: &str) -> String {
    format!("{serial}-{name}")
}
